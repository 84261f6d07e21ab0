//! Corrections for failing FunctionTest cases.
//!
//! Each failing case yields one lens placed on its expectation. Applying it
//! rewrites the expectation to what the function actually produced, as a
//! flow mapping on the expectation's key line. A test whose `inputs` miss keys
//! the function reads, or carry keys it never reads, gets one more lens on
//! `inputs` that rewrites them.

use lsp_types::Url;
use serde_json::{json, Value};

use crate::diagnostics::DocumentAnalysis;
use crate::function_test::{
    CaseResult, CaseStatus, FunctionResult, InputFindingKind, InputSource, MutationIntent,
};
use crate::model::{AnchorRole, Outcome, ResourceKind};
use crate::source::Range;
use crate::workspace::WorkspaceSymbols;

/// A proposed edit replacing a test case's expectation.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCorrection {
    pub test_name: String,
    pub case_name: String,
    /// Where the lens is shown: the expectation key.
    pub range: Range,
    /// Text replaced by `replacement`: the expectation key and its value.
    pub edit_range: Range,
    pub replacement: String,
    pub title: String,
}

pub fn test_corrections(
    uri: &Url,
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
) -> Vec<TestCorrection> {
    let mut corrections = Vec::new();
    for run in workspace.runs_in(uri) {
        for case in &run.cases {
            if let Some(correction) = correction_for(analysis, &run.test_name, case) {
                corrections.push(correction);
            }
        }
    }
    corrections
}

fn correction_for(analysis: &DocumentAnalysis, test_name: &str, case: &CaseResult) -> Option<TestCorrection> {
    if !matches!(case.status, CaseStatus::Failed(_)) {
        return None;
    }
    let actual = case.actual.as_ref()?;
    let value_range = case.expectation_range.as_ref()?;
    let key = analysis
        .index
        .anchors_with_role(AnchorRole::ResourceField)
        .filter(|anchor| case.range.encloses(&anchor.range))
        .filter(|anchor| anchor.range.span.end <= value_range.span.start)
        .filter(|anchor| {
            anchor
                .field
                .map(|field| field.name.starts_with("expect"))
                .unwrap_or(false)
        })
        .last()?;

    let current = key.field.map(|field| field.name).unwrap_or_default();
    let (field, value) = proposed_expectation(current, actual);
    let replacement = format!("{field}: {}", serde_json::to_string(&value).ok()?);
    let title = if field == current {
        format!("Update {field} to actual result")
    } else {
        format!("Replace {current} with {field}")
    };

    Some(TestCorrection {
        test_name: test_name.to_string(),
        case_name: case.name.clone(),
        range: key.range.clone(),
        edit_range: Range::new(
            key.range.span.start..value_range.span.end,
            key.range.start,
            value_range.end,
        ),
        replacement,
        title,
    })
}

/// A proposed rewrite of a FunctionTest's top-level `inputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputCompletion {
    pub test_name: String,
    /// Where the lens is shown: the `inputs` key.
    pub range: Range,
    pub edit_range: Range,
    pub replacement: String,
    pub title: String,
}

/// Placeholder for inputs the function reads but the test omits.
pub const MISSING_INPUT_PLACEHOLDER: &str = "TODO";

pub fn input_completions(
    uri: &Url,
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
) -> Vec<InputCompletion> {
    let mut completions = Vec::new();
    for run in workspace.runs_in(uri) {
        let findings: Vec<_> = run
            .input_findings
            .iter()
            .filter(|finding| finding.source == InputSource::Inputs)
            .collect();
        if findings.is_empty() {
            continue;
        }
        let Some(spec) = analysis
            .resources
            .iter()
            .find(|resource| resource.kind == ResourceKind::FunctionTest && resource.name == run.test_name)
            .and_then(|resource| resource.test_spec())
        else {
            continue;
        };
        let Some((key_range, value_range)) = &spec.inputs_range else {
            continue;
        };

        let mut inputs = spec.inputs.as_object().cloned().unwrap_or_default();
        for finding in findings {
            match finding.kind {
                InputFindingKind::Missing => {
                    inputs.insert(
                        finding.key.clone(),
                        Value::String(MISSING_INPUT_PLACEHOLDER.into()),
                    );
                }
                InputFindingKind::Unused => {
                    inputs.remove(&finding.key);
                }
            }
        }
        let Ok(rendered) = serde_json::to_string(&Value::Object(inputs)) else {
            continue;
        };
        // An empty value may sit before the end of its key.
        let end = if value_range.span.end > key_range.span.end {
            value_range
        } else {
            key_range
        };
        completions.push(InputCompletion {
            test_name: run.test_name.clone(),
            range: key_range.clone(),
            edit_range: Range::new(key_range.span.start..end.span.end, key_range.start, end.end),
            replacement: format!("inputs: {rendered}"),
            title: "Autocorrect Inputs".into(),
        });
    }
    completions
}

/// Keeps the case's expectation field when the actual result can satisfy it.
fn proposed_expectation(current: &str, actual: &FunctionResult) -> (&'static str, Value) {
    match (current, &actual.intent, &actual.outcome) {
        ("expectResource", MutationIntent::Create(resource) | MutationIntent::Patch(resource), _) => {
            ("expectResource", resource.clone())
        }
        ("expectDelete", MutationIntent::Delete, _) => ("expectDelete", Value::Bool(true)),
        ("expectReturn" | "expectResource" | "expectDelete", MutationIntent::None, Outcome::Ok(value)) => {
            ("expectReturn", value.clone())
        }
        _ => ("expectOutcome", outcome_value(&actual.outcome)),
    }
}

fn outcome_value(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::Ok(_) => json!({ "ok": {} }),
        Outcome::Skip(message) => json!({ "skip": { "message": message } }),
        Outcome::DepSkip(message) => json!({ "depSkip": { "message": message } }),
        Outcome::PermFail(message) => json!({ "permFail": { "message": message } }),
        Outcome::Retry { message, delay } => json!({ "retry": { "message": message, "delay": delay } }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::analyze_document;
    use crate::test_support::{position_of, sample_analysis, sample_source, sample_uri, sample_workspace};

    #[test]
    fn failing_case_gets_return_correction() {
        let corrections = test_corrections(&sample_uri(), sample_analysis(), sample_workspace());
        assert_eq!(corrections.len(), 1);
        let correction = &corrections[0];
        assert_eq!(correction.test_name, "build-image-test");
        assert_eq!(correction.case_name, "wrong tag");
        assert_eq!(correction.title, "Update expectReturn to actual result");
        assert_eq!(
            correction.replacement,
            r#"expectReturn: {"image_url":"registry.example.com/app:v1-8","tag":"v1-8"}"#
        );
        assert_eq!(
            correction.range.start,
            position_of(sample_source(), "expectReturn:", 1, 0)
        );
    }

    #[test]
    fn outcome_mismatch_proposes_expect_outcome() {
        let source = r#"apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: gate
spec:
  preconditions:
    - assert: =inputs.ready
      retry:
        message: not ready
        delay: 10
  return:
    ok: true
---
apiVersion: koreo.dev/v1beta1
kind: FunctionTest
metadata:
  name: gate-test
spec:
  functionRef:
    kind: ValueFunction
    name: gate
  inputs:
    ready: false
  testCases:
    - expectReturn:
        ok: true
"#;
        let uri = Url::parse("file:///workspace/gate.yaml").unwrap();
        let analysis = analyze_document(source);
        let mut workspace = WorkspaceSymbols::default();
        workspace.replace_document(&uri, &analysis);
        let runs = workspace.run_tests_in(&uri);
        workspace.record_runs(&uri, runs);

        let corrections = test_corrections(&uri, &analysis, &workspace);
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].title, "Replace expectReturn with expectOutcome");
        assert_eq!(
            corrections[0].replacement,
            r#"expectOutcome: {"retry":{"message":"not ready","delay":10}}"#
        );
        let edited = &source[corrections[0].edit_range.span.clone()];
        assert!(edited.starts_with("expectReturn:"));
    }

    #[test]
    fn expect_resource_without_changes_proposes_expect_return() {
        let source = r#"apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: constant
spec:
  return:
    ok: true
---
apiVersion: koreo.dev/v1beta1
kind: FunctionTest
metadata:
  name: constant-test
spec:
  functionRef:
    kind: ValueFunction
    name: constant
  testCases:
    - expectResource:
        spec: {}
"#;
        let uri = Url::parse("file:///workspace/constant.yaml").unwrap();
        let analysis = analyze_document(source);
        let mut workspace = WorkspaceSymbols::default();
        workspace.replace_document(&uri, &analysis);
        let runs = workspace.run_tests_in(&uri);
        assert!(runs[0].fault.is_none());
        workspace.record_runs(&uri, runs);

        let corrections = test_corrections(&uri, &analysis, &workspace);
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].title, "Replace expectResource with expectReturn");
        assert_eq!(corrections[0].replacement, r#"expectReturn: {"ok":true}"#);
    }

    #[test]
    fn input_findings_offer_an_inputs_rewrite() {
        let source = r#"apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: greet
spec:
  return:
    message: =inputs.greeting + " " + inputs.name
---
apiVersion: koreo.dev/v1beta1
kind: FunctionTest
metadata:
  name: greet-test
spec:
  functionRef:
    kind: ValueFunction
    name: greet
  inputs:
    name: koreo
    extra: 1
  testCases:
    - expectReturn:
        message: hello koreo
"#;
        let uri = Url::parse("file:///workspace/greet.yaml").unwrap();
        let analysis = analyze_document(source);
        let mut workspace = WorkspaceSymbols::default();
        workspace.replace_document(&uri, &analysis);
        let runs = workspace.run_tests_in(&uri);
        workspace.record_runs(&uri, runs);

        let completions = input_completions(&uri, &analysis, &workspace);
        assert_eq!(completions.len(), 1);
        let completion = &completions[0];
        assert_eq!(completion.test_name, "greet-test");
        assert_eq!(completion.title, "Autocorrect Inputs");
        assert_eq!(
            completion.replacement,
            r#"inputs: {"name":"koreo","greeting":"TODO"}"#
        );
        assert_eq!(&source[completion.range.span.clone()], "inputs");
        let replaced = &source[completion.edit_range.span.clone()];
        assert!(replaced.starts_with("inputs:"));
        assert!(replaced.contains("extra: 1"));
        assert!(!replaced.contains("testCases"));
    }

    #[test]
    fn complete_inputs_need_findings() {
        assert!(input_completions(&sample_uri(), sample_analysis(), sample_workspace()).is_empty());
    }

    #[test]
    fn passing_documents_have_no_corrections() {
        let uri = Url::parse("file:///workspace/none.yaml").unwrap();
        assert!(test_corrections(&uri, sample_analysis(), sample_workspace()).is_empty());
    }
}
