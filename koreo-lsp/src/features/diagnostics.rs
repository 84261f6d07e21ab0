//! Diagnostics published for one document.
//!
//! Combines the document's own findings with cross-document reference
//! resolution and the latest FunctionTest results, then converts them to
//! LSP diagnostics.

use koreo_analysis::diagnostics::{
    function_summary, reference_diagnostics, sort_diagnostics, test_diagnostics, Diagnostic,
    DiagnosticCode, DocumentAnalysis, Severity,
};
use koreo_analysis::model::ResourceKind;
use koreo_analysis::workspace::WorkspaceSymbols;
use tower_lsp::lsp_types::{
    self, DiagnosticSeverity, NumberOrString, Position as LspPosition, Range as LspRange, Url,
};

pub const DIAGNOSTIC_SOURCE: &str = "koreo";

pub fn collect_diagnostics(
    uri: &Url,
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
) -> Vec<Diagnostic> {
    let mut diagnostics = analysis.diagnostics.clone();
    diagnostics.extend(reference_diagnostics(analysis, workspace));
    for run in workspace.runs_in(uri) {
        diagnostics.extend(test_diagnostics(run));
    }
    for resource in &analysis.resources {
        if !matches!(
            resource.kind,
            ResourceKind::ValueFunction | ResourceKind::ResourceFunction
        ) {
            continue;
        }
        let runs = workspace.runs_for(resource.kind, &resource.name);
        if let Some(summary) = function_summary(resource, &runs) {
            diagnostics.push(summary);
        }
    }
    sort_diagnostics(&mut diagnostics);
    diagnostics
}

/// Drops unknown-field warnings when the client disabled them.
pub fn filter_diagnostics(diagnostics: Vec<Diagnostic>, unknown_field_warnings: bool) -> Vec<Diagnostic> {
    if unknown_field_warnings {
        return diagnostics;
    }
    diagnostics
        .into_iter()
        .filter(|diagnostic| diagnostic.code != DiagnosticCode::UnknownField)
        .collect()
}

pub fn to_lsp_severity(severity: Severity) -> DiagnosticSeverity {
    match severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
        Severity::Information => DiagnosticSeverity::INFORMATION,
        Severity::Hint => DiagnosticSeverity::HINT,
    }
}

pub fn to_lsp_diagnostic(diagnostic: &Diagnostic) -> lsp_types::Diagnostic {
    let range = &diagnostic.range;
    lsp_types::Diagnostic {
        range: LspRange {
            start: LspPosition::new(range.start.line as u32, range.start.column as u32),
            end: LspPosition::new(range.end.line as u32, range.end.column as u32),
        },
        severity: Some(to_lsp_severity(diagnostic.severity)),
        code: Some(NumberOrString::String(diagnostic.code.as_str().to_string())),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message: diagnostic.message.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koreo_analysis::diagnostics::analyze_document;
    use koreo_analysis::test_support::{sample_analysis, sample_uri, sample_workspace};

    #[test]
    fn sample_reports_failing_test_case_and_function_summary() {
        let diagnostics = collect_diagnostics(&sample_uri(), sample_analysis(), sample_workspace());
        let failures: Vec<&str> = diagnostics
            .iter()
            .filter(|d| d.code == DiagnosticCode::TestFailure)
            .map(|d| d.message.as_str())
            .collect();
        assert_eq!(failures.len(), 2);
        assert!(failures
            .iter()
            .any(|message| message.starts_with("1 of 1 function tests failing")));
        assert!(failures
            .iter()
            .any(|message| message.starts_with("test case `wrong tag` failed")));
    }

    #[test]
    fn unresolved_references_need_the_workspace() {
        let text = "apiVersion: koreo.dev/v1beta1\nkind: FunctionTest\nmetadata:\n  name: orphan\nspec:\n  functionRef:\n    kind: ValueFunction\n    name: nowhere\n";
        let uri = Url::parse("file:///workspace/orphan.yaml").unwrap();
        let analysis = analyze_document(text);
        let diagnostics = collect_diagnostics(&uri, &analysis, &WorkspaceSymbols::default());
        assert!(diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::UnresolvedReference));
    }

    #[test]
    fn unknown_field_warnings_can_be_disabled() {
        let text = "apiVersion: koreo.dev/v1beta1\nkind: ValueFunction\nmetadata:\n  name: extra\nspec:\n  retrun:\n    ok: true\n";
        let analysis = analyze_document(text);
        let kept = filter_diagnostics(analysis.diagnostics.clone(), true);
        assert!(kept.iter().any(|d| d.code == DiagnosticCode::UnknownField));
        let filtered = filter_diagnostics(analysis.diagnostics.clone(), false);
        assert!(filtered.iter().all(|d| d.code != DiagnosticCode::UnknownField));
    }

    #[test]
    fn conversion_carries_code_and_source() {
        let diagnostic = &sample_analysis().diagnostics;
        let converted: Vec<lsp_types::Diagnostic> = collect_diagnostics(
            &sample_uri(),
            sample_analysis(),
            sample_workspace(),
        )
        .iter()
        .map(to_lsp_diagnostic)
        .collect();
        assert!(diagnostic.len() <= converted.len());
        for lsp in &converted {
            assert_eq!(lsp.source.as_deref(), Some(DIAGNOSTIC_SOURCE));
            assert!(matches!(lsp.code, Some(NumberOrString::String(_))));
        }
    }
}
