//! Diagnostics engine.
//!
//! Collects lexical, syntax and schema findings from extraction, adds workflow
//! reference checks, and merges cross-document reference resolution and
//! function-test results on request. Every diagnostic has a stable code.

use std::fmt;

use crate::extractor::{extract, Extraction};
use crate::function_test::{CaseStatus, InputFindingKind, RunStatus, TestRun};
use crate::index::SemanticIndex;
use crate::model::{AnchorRole, ResourceDefinition, ResourceKind, SymbolId};
use crate::source::Range;
use crate::workflow;
use crate::workspace::WorkspaceSymbols;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "info",
            Severity::Hint => "hint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    LexicalError,
    ExpressionSyntax,
    YamlSyntax,
    MissingField,
    OneOf,
    InvalidName,
    InvalidType,
    UnknownField,
    UnsupportedResource,
    DuplicateLabel,
    UnresolvedReference,
    ForwardReference,
    TestFailure,
    RunnerFault,
    DuplicateResource,
}

impl DiagnosticCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCode::LexicalError => "lexical-error",
            DiagnosticCode::ExpressionSyntax => "expression-syntax",
            DiagnosticCode::YamlSyntax => "yaml-syntax",
            DiagnosticCode::MissingField => "missing-field",
            DiagnosticCode::OneOf => "one-of",
            DiagnosticCode::InvalidName => "invalid-name",
            DiagnosticCode::InvalidType => "invalid-type",
            DiagnosticCode::UnknownField => "unknown-field",
            DiagnosticCode::UnsupportedResource => "unsupported-resource",
            DiagnosticCode::DuplicateLabel => "duplicate-label",
            DiagnosticCode::UnresolvedReference => "unresolved-reference",
            DiagnosticCode::ForwardReference => "forward-reference",
            DiagnosticCode::TestFailure => "test-failure",
            DiagnosticCode::RunnerFault => "runner-fault",
            DiagnosticCode::DuplicateResource => "duplicate-resource",
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            DiagnosticCode::UnknownField => Severity::Warning,
            DiagnosticCode::UnsupportedResource => Severity::Information,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, range: Range, message: impl Into<String>) -> Self {
        Self {
            range,
            severity: code.default_severity(),
            code,
            message: message.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Immutable analysis of one document revision.
#[derive(Debug, Clone, Default)]
pub struct DocumentAnalysis {
    pub resources: Vec<ResourceDefinition>,
    pub index: SemanticIndex,
    pub diagnostics: Vec<Diagnostic>,
}

impl DocumentAnalysis {
    pub fn resource(&self, kind: ResourceKind, name: &str) -> Option<&ResourceDefinition> {
        self.resources
            .iter()
            .find(|resource| resource.kind == kind && resource.name == name)
    }

    /// The resource whose document contains `position`.
    pub fn resource_at(&self, position: crate::source::Position) -> Option<&ResourceDefinition> {
        self.resources
            .iter()
            .find(|resource| resource.range.contains(position))
    }
}

pub fn analyze_document(text: &str) -> DocumentAnalysis {
    let Extraction {
        resources,
        anchors,
        mut diagnostics,
    } = extract(text);

    for resource in &resources {
        diagnostics.extend(workflow::check_steps(resource.steps()));
    }
    sort_diagnostics(&mut diagnostics);

    let index = SemanticIndex::build(anchors, &resources);
    DocumentAnalysis {
        resources,
        index,
        diagnostics,
    }
}

pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| {
        (a.range.start, a.severity, a.code.as_str()).cmp(&(b.range.start, b.severity, b.code.as_str()))
    });
}

/// Resource references that resolve neither in this document nor in the
/// workspace.
pub fn reference_diagnostics(
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
) -> Vec<Diagnostic> {
    analysis
        .index
        .anchors_with_role(AnchorRole::ResourceRefUse)
        .filter_map(|anchor| {
            let target = anchor.target.as_ref()?;
            let SymbolId::Resource { kind, name } = target else {
                return None;
            };
            if analysis.index.definition(target).is_some() || workspace.contains(target) {
                return None;
            }
            Some(
                Diagnostic::new(
                    DiagnosticCode::UnresolvedReference,
                    anchor.range.clone(),
                    format!("{kind} `{name}` is not defined in the workspace"),
                )
                .with_severity(Severity::Warning),
            )
        })
        .collect()
}

/// Per-case results of one FunctionTest run, placed on the test document.
pub fn test_diagnostics(run: &TestRun) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if let Some(fault) = &run.fault {
        diagnostics.push(Diagnostic::new(
            DiagnosticCode::RunnerFault,
            run.range.clone(),
            format!("function test `{}` could not run: {fault}", run.test_name),
        ));
    }
    for finding in &run.input_findings {
        let (severity, message) = match finding.kind {
            InputFindingKind::Missing => (
                Severity::Error,
                format!("function reads `{}` but the test never provides it", finding.path()),
            ),
            InputFindingKind::Unused => (
                Severity::Warning,
                format!("`{}` is provided but never read by the function", finding.path()),
            ),
        };
        diagnostics.push(
            Diagnostic::new(DiagnosticCode::TestFailure, run.range.clone(), message)
                .with_severity(severity),
        );
    }
    for case in &run.cases {
        match &case.status {
            CaseStatus::Failed(mismatches) => {
                let details: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
                diagnostics.push(Diagnostic::new(
                    DiagnosticCode::TestFailure,
                    case.range.clone(),
                    format!("test case `{}` failed: {}", case.name, details.join("; ")),
                ));
            }
            CaseStatus::Errored(message) => diagnostics.push(Diagnostic::new(
                DiagnosticCode::RunnerFault,
                case.range.clone(),
                format!("test case `{}` errored: {message}", case.name),
            )),
            CaseStatus::Passed | CaseStatus::Skipped => {}
        }
    }
    diagnostics
}

/// Summary placed on the name of a function whose tests do not all pass.
pub fn function_summary(function: &ResourceDefinition, runs: &[&TestRun]) -> Option<Diagnostic> {
    let failing: Vec<&str> = runs
        .iter()
        .filter(|run| run.status != RunStatus::Passed)
        .map(|run| run.test_name.as_str())
        .collect();
    if failing.is_empty() {
        return None;
    }
    Some(Diagnostic::new(
        DiagnosticCode::TestFailure,
        function.name_range.clone(),
        format!(
            "{} of {} function tests failing: {}",
            failing.len(),
            runs.len(),
            failing.join(", ")
        ),
    ))
}
