use std::collections::HashMap;

use koreo_analysis::function_test::{RunStatus, TestRun};
use serde::Serialize;
use serde_json::Value;
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::{Range, TextEdit, Url, WorkspaceEdit};

pub const COMMAND_RUN_FUNCTION_TESTS: &str = "koreo.runFunctionTests";
pub const COMMAND_APPLY_TEST_CORRECTION: &str = "koreo.applyTestCorrection";
pub const COMMAND_COMPLETE_INPUTS: &str = "koreo.completeInputs";

/// Which FunctionTests a `koreo.runFunctionTests` call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTestsTarget {
    /// Every open document.
    All,
    Document(Url),
}

pub fn parse_run_tests_target(arguments: &[Value]) -> Result<RunTestsTarget> {
    match arguments.first() {
        None | Some(Value::Null) => Ok(RunTestsTarget::All),
        Some(Value::String(uri)) => Url::parse(uri)
            .map(RunTestsTarget::Document)
            .map_err(|_| Error::invalid_params("Invalid document URI")),
        Some(_) => Err(Error::invalid_params("Expected a document URI")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunSummary {
    pub uri: String,
    pub test: String,
    pub status: &'static str,
    pub passed: usize,
    pub cases: usize,
}

impl TestRunSummary {
    pub fn new(uri: &Url, run: &TestRun) -> Self {
        Self {
            uri: uri.to_string(),
            test: run.test_name.clone(),
            status: match run.status {
                RunStatus::Passed => "passed",
                RunStatus::Failed => "failed",
                RunStatus::Errored => "errored",
            },
            passed: run.passed(),
            cases: run.cases.len(),
        }
    }
}

/// Builds the edit a correction or inputs lens applies: `[uri, range, newText]`.
pub fn test_correction_edit(arguments: &[Value]) -> Result<Option<Value>> {
    let uri = arguments
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid_params("Missing 'uri' argument"))?;
    let uri = Url::parse(uri).map_err(|_| Error::invalid_params("Invalid document URI"))?;
    let range: Range = arguments
        .get(1)
        .cloned()
        .ok_or_else(|| Error::invalid_params("Missing 'range' argument"))
        .and_then(|value| {
            serde_json::from_value(value).map_err(|_| Error::invalid_params("Invalid 'range' argument"))
        })?;
    let new_text = arguments
        .get(2)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid_params("Missing 'newText' argument"))?;

    let edit = WorkspaceEdit {
        changes: Some(HashMap::from([(
            uri,
            vec![TextEdit {
                range,
                new_text: new_text.to_string(),
            }],
        )])),
        ..Default::default()
    };
    serde_json::to_value(edit)
        .map(Some)
        .map_err(|_| Error::internal_error())
}
