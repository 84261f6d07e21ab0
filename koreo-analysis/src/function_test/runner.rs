//! Sequential FunctionTest execution.
//!
//! Cases run in declaration order against a carried state. A non-variant case
//! leaves its input overrides and resulting resource for the cases after it;
//! a variant case sees the carried state but never changes it.

use std::collections::BTreeSet;

use serde_json::Value;

use super::compare::{compare, Mismatch};
use super::function::{
    DryRunEvaluator, FunctionEvaluator, FunctionLookup, FunctionResult, MutationIntent, Template,
};
use crate::expression::eval::merge_overlay;
use crate::expression::Bindings;
use crate::model::{Expectation, ExpectedOutcome, Outcome, ResourceDefinition, ResourceKind, TestCase};
use crate::source::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum CaseStatus {
    Passed,
    /// Declared `skip: true`, or no expectation to check.
    Skipped,
    Failed(Vec<Mismatch>),
    Errored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub name: String,
    pub index: usize,
    pub range: Range,
    pub expectation_range: Option<Range>,
    pub status: CaseStatus,
    /// What the function actually produced; `None` when the case did not run.
    pub actual: Option<FunctionResult>,
}

/// Where a test supplies values the function reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InputSource {
    Inputs,
    Parent,
}

impl InputSource {
    pub fn as_str(self) -> &'static str {
        match self {
            InputSource::Inputs => "inputs",
            InputSource::Parent => "parent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFindingKind {
    /// Read by the function, not provided by the test.
    Missing,
    /// Provided by the test, never read.
    Unused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFinding {
    pub source: InputSource,
    pub key: String,
    pub kind: InputFindingKind,
}

impl InputFinding {
    /// Dotted path of the finding, e.g. `inputs.name`.
    pub fn path(&self) -> String {
        format!("{}.{}", self.source.as_str(), self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Passed,
    Failed,
    Errored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestRun {
    pub test_name: String,
    pub function: Option<(ResourceKind, String)>,
    pub range: Range,
    pub fault: Option<String>,
    pub input_findings: Vec<InputFinding>,
    pub cases: Vec<CaseResult>,
    pub status: RunStatus,
}

impl TestRun {
    fn faulted(test: &ResourceDefinition, range: Range, fault: String) -> Self {
        Self {
            test_name: test.name.clone(),
            function: test.test_spec().and_then(|spec| spec.function_ref.clone()),
            range,
            fault: Some(fault),
            input_findings: Vec::new(),
            cases: Vec::new(),
            status: RunStatus::Errored,
        }
    }

    pub fn passed(&self) -> usize {
        self.count(|status| matches!(status, CaseStatus::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, CaseStatus::Failed(_) | CaseStatus::Errored(_)))
    }

    fn count(&self, predicate: impl Fn(&CaseStatus) -> bool) -> usize {
        self.cases.iter().filter(|case| predicate(&case.status)).count()
    }
}

/// Runs every case of the FunctionTest `test`, resolving the function under
/// test through `lookup`.
pub fn run_function_test(test: &ResourceDefinition, lookup: &dyn FunctionLookup) -> TestRun {
    let Some(spec) = test.test_spec() else {
        return TestRun::faulted(
            test,
            test.name_range.clone(),
            format!("{} `{}` is not a FunctionTest", test.kind, test.name),
        );
    };
    let range = spec
        .function_ref_range
        .clone()
        .unwrap_or_else(|| test.name_range.clone());
    let Some((kind, name)) = &spec.function_ref else {
        return TestRun::faulted(test, range, "no function under test".into());
    };
    let Some(function) = lookup.function(*kind, name) else {
        return TestRun::faulted(
            test,
            range,
            format!("{kind} `{name}` was not found or failed to compile"),
        );
    };
    tracing::debug!(test = %test.name, function = %name, cases = spec.cases.len(), "running function test");

    let mut input_findings = check_inputs(InputSource::Inputs, &function.input_keys(), Some(&spec.inputs));
    input_findings.extend(check_inputs(
        InputSource::Parent,
        &function.parent_keys(),
        spec.parent.as_ref(),
    ));

    let evaluator = DryRunEvaluator::new(lookup).with_parent(spec.parent.clone());
    let mut inputs = spec.inputs.clone();
    let mut resource = spec.current_resource.clone();
    let mut cases = Vec::with_capacity(spec.cases.len());

    for (index, case) in spec.cases.iter().enumerate() {
        let case_name = case.display_name(index);
        let pending = |status| CaseResult {
            name: case_name.clone(),
            index,
            range: case.range.clone(),
            expectation_range: case.expectation_range.clone(),
            status,
            actual: None,
        };
        let Some(expectation) = case.expectation.as_ref().filter(|_| !case.skip) else {
            cases.push(pending(CaseStatus::Skipped));
            continue;
        };

        let (case_inputs, case_resource) = match prepare_case(case, &inputs, resource.as_ref()) {
            Ok(state) => state,
            Err(message) => {
                cases.push(pending(CaseStatus::Errored(message)));
                continue;
            }
        };

        let result = match evaluator.evaluate(&function, &case_inputs, case_resource.as_ref()) {
            Ok(result) => result,
            Err(err) => {
                cases.push(pending(CaseStatus::Errored(err.to_string())));
                continue;
            }
        };

        let mismatches = check_expectation(expectation, &result);
        let status = if mismatches.is_empty() {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed(mismatches)
        };
        if !case.variant {
            inputs = case_inputs;
            resource = result.resource.clone();
        }
        cases.push(CaseResult {
            actual: Some(result),
            ..pending(status)
        });
    }

    let status = if cases.iter().any(|case| matches!(case.status, CaseStatus::Errored(_))) {
        RunStatus::Errored
    } else if cases.iter().any(|case| matches!(case.status, CaseStatus::Failed(_)))
        || input_findings
            .iter()
            .any(|finding| finding.kind == InputFindingKind::Missing)
    {
        RunStatus::Failed
    } else {
        RunStatus::Passed
    };
    tracing::debug!(test = %test.name, ?status, "function test finished");

    TestRun {
        test_name: test.name.clone(),
        function: Some((*kind, name.clone())),
        range,
        fault: None,
        input_findings,
        cases,
        status,
    }
}

/// Keys the function reads from `source` but the test omits, then keys the
/// test provides that are never read.
fn check_inputs(source: InputSource, read: &BTreeSet<String>, provided: Option<&Value>) -> Vec<InputFinding> {
    let provided: Vec<&String> = provided
        .and_then(Value::as_object)
        .map(|values| values.keys().collect())
        .unwrap_or_default();
    let finding = |key: &String, kind| InputFinding {
        source,
        key: key.clone(),
        kind,
    };
    let mut findings: Vec<InputFinding> = read
        .iter()
        .filter(|key| !provided.contains(key))
        .map(|key| finding(key, InputFindingKind::Missing))
        .collect();
    findings.extend(
        provided
            .into_iter()
            .filter(|key| !read.contains(*key))
            .map(|key| finding(key, InputFindingKind::Unused)),
    );
    findings
}

/// Inputs and resource a case runs against.
fn prepare_case(
    case: &TestCase,
    carried_inputs: &Value,
    carried_resource: Option<&Value>,
) -> Result<(Value, Option<Value>), String> {
    let mut inputs = carried_inputs.clone();
    if let Some(overrides) = &case.input_overrides {
        merge_overlay(&mut inputs, overrides);
    }

    let resource = if let Some(current) = &case.current_resource {
        Some(current.clone())
    } else if let Some(overlay) = &case.overlay_resource {
        let mut base = carried_resource.cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let bindings = Bindings::new()
            .with("template", base.clone())
            .with("inputs", inputs.clone());
        let rendered = Template::compile(overlay, "overlayResource")
            .map_err(|err| err.to_string())?
            .render(&bindings)
            .map_err(|err| format!("overlayResource: {err}"))?;
        merge_overlay(&mut base, &rendered);
        Some(base)
    } else {
        carried_resource.cloned()
    };
    Ok((inputs, resource))
}

/// `expectResource` and `expectDelete` fail unless the matching mutation was
/// requested.
fn check_expectation(expectation: &Expectation, result: &FunctionResult) -> Vec<Mismatch> {
    match expectation {
        Expectation::Delete => match result.intent {
            MutationIntent::Delete => Vec::new(),
            _ => vec![Mismatch::new("expectDelete", "a delete", describe_intent(result))],
        },
        Expectation::Resource(expected) => match result.intent.resource() {
            Some(actual) => compare(expected, actual),
            None => vec![Mismatch::new(
                "expectResource",
                "a create or patch",
                describe_intent(result),
            )],
        },
        Expectation::Return(expected) => match &result.outcome {
            Outcome::Ok(actual) => compare(expected, actual),
            other => vec![Mismatch::new("outcome", "ok", other.to_string())],
        },
        Expectation::Outcome(expected) => check_outcome(expected, &result.outcome),
    }
}

fn describe_intent(result: &FunctionResult) -> String {
    match &result.intent {
        MutationIntent::None => format!("no change ({})", result.outcome),
        MutationIntent::Create(_) => "a create".into(),
        MutationIntent::Patch(_) => "a patch".into(),
        MutationIntent::Delete => "a delete".into(),
    }
}

/// Expected messages match as case-insensitive substrings; a retry delay of 0
/// matches any delay.
fn check_outcome(expected: &ExpectedOutcome, actual: &Outcome) -> Vec<Mismatch> {
    fn message_mismatch(expected: &str, actual: &str) -> Option<Mismatch> {
        (!actual.to_lowercase().contains(&expected.to_lowercase()))
            .then(|| Mismatch::new("message", format!("{expected:?}"), format!("{actual:?}")))
    }

    match (expected, actual) {
        (ExpectedOutcome::Ok, Outcome::Ok(_)) => Vec::new(),
        (ExpectedOutcome::Skip(expected), Outcome::Skip(actual))
        | (ExpectedOutcome::DepSkip(expected), Outcome::DepSkip(actual))
        | (ExpectedOutcome::PermFail(expected), Outcome::PermFail(actual)) => {
            message_mismatch(expected, actual).into_iter().collect()
        }
        (
            ExpectedOutcome::Retry { message, delay },
            Outcome::Retry {
                message: actual_message,
                delay: actual_delay,
            },
        ) => {
            let mut mismatches: Vec<Mismatch> = message_mismatch(message, actual_message).into_iter().collect();
            if *delay != 0 && delay != actual_delay {
                mismatches.push(Mismatch::new("delay", delay.to_string(), actual_delay.to_string()));
            }
            mismatches
        }
        (expected, actual) => vec![Mismatch::new(
            "outcome",
            expected.variant_name(),
            actual.to_string(),
        )],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::extractor::extract;
    use crate::function_test::PreparedFunction;
    use crate::model::ResourceDefinition;

    const STATS: &str = "\
apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: stats
spec:
  preconditions:
    - assert: =inputs.values.size() > 0
      permFail:
        message: no values given
  locals:
    total: =sum(inputs.values)
  return:
    total: =locals.total
    average: =locals.total / inputs.values.size()
";

    fn resources(test: &str) -> Vec<ResourceDefinition> {
        let mut resources = extract(STATS).resources;
        resources.extend(extract(test).resources);
        resources
    }

    fn run(test: &str) -> TestRun {
        let resources = resources(test);
        let lookup = |kind: ResourceKind, name: &str| -> Option<Arc<PreparedFunction>> {
            resources
                .iter()
                .find(|resource| resource.kind == kind && resource.name == name)
                .and_then(|resource| resource.function())
                .and_then(|function| function.as_ref().ok().cloned())
        };
        let test = resources
            .iter()
            .find(|resource| resource.kind == ResourceKind::FunctionTest)
            .unwrap();
        run_function_test(test, &lookup)
    }

    fn test(cases: &str) -> String {
        format!(
            "apiVersion: koreo.dev/v1beta1\nkind: FunctionTest\nmetadata:\n  name: stats-test\nspec:\n  functionRef:\n    kind: ValueFunction\n    name: stats\n  inputs:\n    values: [10, 20]\n{cases}"
        )
    }

    #[test]
    fn sum_and_average_pass() {
        let run = run(&test(
            "  testCases:\n    - expectReturn:\n        total: 30\n        average: 15\n",
        ));
        assert_eq!(run.status, RunStatus::Passed, "{run:?}");
        assert_eq!(run.passed(), 1);
        assert!(run.input_findings.is_empty());
    }

    #[test]
    fn failing_return_reports_mismatched_fields() {
        let run = run(&test(
            "  testCases:\n    - label: wrong\n      expectReturn:\n        total: 31\n        average: 15\n",
        ));
        assert_eq!(run.status, RunStatus::Failed);
        let CaseStatus::Failed(mismatches) = &run.cases[0].status else {
            panic!("expected failure, got {:?}", run.cases[0].status);
        };
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].field, "total");
        assert_eq!(run.cases[0].name, "wrong");
    }

    #[test]
    fn overrides_carry_forward_unless_variant() {
        let cases = "  testCases:
    - variant: true
      inputOverrides:
        values: []
      expectOutcome:
        permFail:
          message: no values
    - expectReturn:
        total: 30
        average: 15
    - inputOverrides:
        values: [5]
      expectReturn:
        total: 5
        average: 5
    - expectReturn:
        total: 5
        average: 5
";
        let run = run(&test(cases));
        assert_eq!(run.status, RunStatus::Passed, "{:?}", run.cases);
        assert_eq!(run.passed(), 4);
    }

    #[test]
    fn skipped_cases_do_not_run() {
        let run = run(&test(
            "  testCases:\n    - skip: true\n      expectReturn:\n        total: 0\n",
        ));
        assert_eq!(run.cases[0].status, CaseStatus::Skipped);
        assert!(run.cases[0].actual.is_none());
        assert_eq!(run.status, RunStatus::Passed);
    }

    #[test]
    fn tests_without_cases_expect_ok() {
        let run = run(&test(""));
        assert_eq!(run.cases.len(), 1);
        assert_eq!(run.status, RunStatus::Passed);
    }

    #[test]
    fn unknown_functions_fault_the_run() {
        let text = test("").replace("name: stats\n  inputs", "name: absent\n  inputs");
        let run = run(&text);
        assert_eq!(run.status, RunStatus::Errored);
        assert!(run.fault.unwrap().contains("absent"));
    }

    #[test]
    fn input_usage_is_checked() {
        let text = test("").replace("values: [10, 20]", "extra: 1");
        let run = run(&text);
        assert_eq!(
            run.input_findings,
            vec![
                InputFinding {
                    source: InputSource::Inputs,
                    key: "values".into(),
                    kind: InputFindingKind::Missing
                },
                InputFinding {
                    source: InputSource::Inputs,
                    key: "extra".into(),
                    kind: InputFindingKind::Unused
                },
            ]
        );
        assert_ne!(run.status, RunStatus::Passed);
    }

    #[test]
    fn parent_keys_count_as_provided() {
        let owner = "\
apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: owner
spec:
  return:
    owner: =parent.metadata.name
    values: =inputs.values
---
apiVersion: koreo.dev/v1beta1
kind: FunctionTest
metadata:
  name: owner-test
spec:
  functionRef:
    kind: ValueFunction
    name: owner
  inputs:
    values: [1]
  parent:
    metadata:
      name: app
    spec:
      replicas: 2
  testCases:
    - expectReturn:
        owner: app
        values: [1]
";
        let resources = extract(owner).resources;
        let lookup = |kind: ResourceKind, name: &str| -> Option<Arc<PreparedFunction>> {
            resources
                .iter()
                .find(|resource| resource.kind == kind && resource.name == name)
                .and_then(|resource| resource.function())
                .and_then(|function| function.as_ref().ok().cloned())
        };
        let run = run_function_test(&resources[1], &lookup);
        assert_eq!(run.status, RunStatus::Passed, "{run:?}");
        assert_eq!(
            run.input_findings,
            vec![InputFinding {
                source: InputSource::Parent,
                key: "spec".into(),
                kind: InputFindingKind::Unused
            }]
        );
        assert_eq!(run.input_findings[0].path(), "parent.spec");

        let without_parent = owner.replace("  parent:\n    metadata:\n      name: app\n    spec:\n      replicas: 2\n", "");
        let resources = extract(&without_parent).resources;
        let lookup = |kind: ResourceKind, name: &str| -> Option<Arc<PreparedFunction>> {
            resources
                .iter()
                .find(|resource| resource.kind == kind && resource.name == name)
                .and_then(|resource| resource.function())
                .and_then(|function| function.as_ref().ok().cloned())
        };
        let run = run_function_test(&resources[1], &lookup);
        assert!(run.input_findings.contains(&InputFinding {
            source: InputSource::Parent,
            key: "metadata".into(),
            kind: InputFindingKind::Missing
        }));
        assert_ne!(run.status, RunStatus::Passed);
    }

    #[test]
    fn expect_resource_without_a_mutation_fails() {
        let result = FunctionResult {
            outcome: Outcome::Ok(Value::Null),
            intent: MutationIntent::None,
            resource: None,
        };
        let mismatches = check_expectation(&Expectation::Resource(serde_json::json!({"spec": {}})), &result);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].field, "expectResource");

        let run = run(&test(
            "  testCases:\n    - expectResource:\n        spec:\n          size: 1\n",
        ));
        assert_eq!(run.status, RunStatus::Failed);
        assert!(matches!(run.cases[0].status, CaseStatus::Failed(_)));
        assert!(run.cases[0].actual.is_some());
    }

    #[test]
    fn retry_delay_zero_matches_any_delay() {
        let actual = Outcome::Retry {
            message: "waiting for bucket to become ready".into(),
            delay: 30,
        };
        let wildcard = ExpectedOutcome::Retry {
            message: "Bucket".into(),
            delay: 0,
        };
        assert!(check_outcome(&wildcard, &actual).is_empty());
        let exact = ExpectedOutcome::Retry {
            message: "bucket".into(),
            delay: 5,
        };
        let mismatches = check_outcome(&exact, &actual);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].field, "delay");
        let wrong_message = ExpectedOutcome::Retry {
            message: "deleted".into(),
            delay: 0,
        };
        assert_eq!(check_outcome(&wrong_message, &actual)[0].field, "message");
        assert_eq!(
            check_outcome(&ExpectedOutcome::Ok, &actual)[0].field,
            "outcome"
        );
    }
}
