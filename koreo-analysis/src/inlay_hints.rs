//! FunctionTest status hints.
//!
//! Each FunctionTest in a document gets a hint at the end of its name line
//! showing the latest recorded run: `Success`, `Error`, or `Not Ran` when
//! nothing was recorded since the document last changed.

use std::ops::RangeInclusive;

use lsp_types::Url;

use crate::diagnostics::DocumentAnalysis;
use crate::function_test::RunStatus;
use crate::model::ResourceKind;
use crate::source::{Position, SourceLocation};
use crate::workspace::WorkspaceSymbols;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Success,
    Error,
    NotRan,
}

impl TestStatus {
    pub fn label(self) -> &'static str {
        match self {
            TestStatus::Success => "Success",
            TestStatus::Error => "Error",
            TestStatus::NotRan => "Not Ran",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStatusHint {
    pub test_name: String,
    pub position: Position,
    pub status: TestStatus,
}

/// Hints for the FunctionTests whose name sits on one of `lines`.
pub fn test_status_hints(
    source: &str,
    uri: &Url,
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    lines: RangeInclusive<usize>,
) -> Vec<TestStatusHint> {
    let location = SourceLocation::new(source);
    let runs = workspace.runs_in(uri);
    analysis
        .resources
        .iter()
        .filter(|resource| resource.kind == ResourceKind::FunctionTest)
        .filter(|resource| lines.contains(&resource.name_range.end.line))
        .map(|resource| {
            let status = match runs.iter().find(|run| run.test_name == resource.name) {
                None => TestStatus::NotRan,
                Some(run) if run.status == RunStatus::Passed => TestStatus::Success,
                Some(_) => TestStatus::Error,
            };
            let name_end = resource.name_range.span.end.min(source.len());
            let line_end = source[name_end..]
                .find('\n')
                .map(|offset| name_end + offset)
                .unwrap_or(source.len());
            let line_end = source[..line_end].strip_suffix('\r').map_or(line_end, str::len);
            TestStatusHint {
                test_name: resource.name.clone(),
                position: location.byte_to_position(line_end),
                status,
            }
        })
        .collect()
}
