use crate::completion::signature_of;
use crate::diagnostics::DocumentAnalysis;
use crate::expression::TokenKind;
use crate::function_test::{CaseResult, CaseStatus, RunStatus, TestRun};
use crate::model::{AnchorRole, ResourceDefinition, ResourceKind, SemanticAnchor, SymbolId};
use crate::source::{Position, Range};
use crate::workspace::WorkspaceSymbols;

#[derive(Debug, Clone, PartialEq)]
pub struct HoverResult {
    pub range: Range,
    pub contents: String,
}

const TEST_CASE_KEYS: &[&str] = &[
    "label",
    "variant",
    "skip",
    "inputOverrides",
    "currentResource",
    "overlayResource",
    "expectResource",
    "expectDelete",
    "expectReturn",
    "expectOutcome",
];

pub fn hover(
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    position: Position,
) -> Option<HoverResult> {
    let anchor = analysis.index.innermost_at(position)?;
    test_case_hover(analysis, workspace, anchor, position)
        .or_else(|| anchor_hover(analysis, workspace, anchor))
}

fn anchor_hover(
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    anchor: &SemanticAnchor,
) -> Option<HoverResult> {
    let contents = match (anchor.role, anchor.symbol.as_ref().or(anchor.target.as_ref())) {
        (AnchorRole::ResourceNameDef | AnchorRole::ResourceRefUse, Some(SymbolId::Resource { kind, name })) => {
            resource_hover(analysis, workspace, *kind, name)
        }
        (AnchorRole::StepLabelDef | AnchorRole::StepRefUse, Some(SymbolId::Step { workflow, label })) => {
            step_hover(analysis, workflow, label)
        }
        (AnchorRole::ResourceKind, _) => {
            let kind = anchor.detail.as_deref().and_then(ResourceKind::parse)?;
            format!("**Kind** `{kind}`\n\n{}", kind_description(kind))
        }
        (AnchorRole::ResourceField, _) => {
            let field = anchor.field?;
            let required = if field.required { " (required)" } else { "" };
            format!("**Field** `{}`{required}\n\n{}", field.name, field.doc)
        }
        (AnchorRole::ExpressionToken(kind), _) => {
            let lexeme = anchor.detail.as_deref().unwrap_or_default();
            match (kind, signature_of(lexeme)) {
                (TokenKind::FunctionName, Some(signature)) => {
                    format!("**Function** `{lexeme}`\n\n`{signature}`")
                }
                _ => format!("**{}** `{lexeme}`", kind.as_str()),
            }
        }
        (AnchorRole::SchemaViolation, _) => {
            format!("**Schema**\n\n{}", anchor.detail.as_deref().unwrap_or_default())
        }
        (AnchorRole::Expression, _) => "**Expression**".to_string(),
        _ => return None,
    };
    Some(HoverResult {
        range: anchor.range.clone(),
        contents,
    })
}

fn kind_description(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ValueFunction => "Pure function computing a value from its inputs.",
        ResourceKind::ResourceFunction => "Function managing a single Kubernetes resource.",
        ResourceKind::Workflow => "Ordered steps composing functions and sub-workflows.",
        ResourceKind::FunctionTest => "Test cases run against a ValueFunction or ResourceFunction.",
    }
}

fn resource_hover(
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    kind: ResourceKind,
    name: &str,
) -> String {
    let mut contents = format!("**{kind}** `{name}`");
    let definition = analysis
        .resource(kind, name)
        .cloned()
        .or_else(|| workspace.resource(kind, name).map(|(_, resource)| (*resource).clone()));
    let Some(definition) = definition else {
        contents.push_str("\n\nNot defined in the workspace.");
        return contents;
    };

    match kind {
        ResourceKind::ValueFunction | ResourceKind::ResourceFunction => {
            if let Some(Err(err)) = definition.function() {
                contents.push_str(&format!("\n\nDoes not compile: {err}"));
            }
            contents.push_str("\n\n");
            contents.push_str(&test_table(&workspace.runs_for(kind, name)));
        }
        ResourceKind::Workflow => {
            let labels: Vec<String> = definition
                .steps()
                .iter()
                .map(|step| format!("`{}`", step.label))
                .collect();
            contents.push_str(&format!("\n\nSteps: {}", labels.join(", ")));
        }
        ResourceKind::FunctionTest => {
            contents.push_str("\n\n");
            contents.push_str(&test_summary(&definition, workspace.run_named(name)));
        }
    }
    contents
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Passed => "passed",
        RunStatus::Failed => "failed",
        RunStatus::Errored => "errored",
    }
}

fn test_table(runs: &[&TestRun]) -> String {
    if runs.is_empty() {
        return "No FunctionTest results.".to_string();
    }
    let mut table = String::from("| Test | Result | Cases |\n|---|---|---|\n");
    for run in runs {
        table.push_str(&format!(
            "| {} | {} | {}/{} |\n",
            run.test_name,
            status_label(run.status),
            run.passed(),
            run.cases.len()
        ));
    }
    table
}

fn test_summary(test: &ResourceDefinition, run: Option<&TestRun>) -> String {
    let target = test
        .test_spec()
        .and_then(|spec| spec.function_ref.as_ref())
        .map(|(kind, name)| format!("Tests {kind} `{name}`."))
        .unwrap_or_else(|| "No function under test.".to_string());
    let Some(run) = run else {
        return format!("{target}\n\nNot run yet.");
    };
    let mut lines = vec![
        target,
        String::new(),
        format!(
            "Last run {}: {} of {} cases passed.",
            status_label(run.status),
            run.passed(),
            run.cases.len()
        ),
    ];
    if let Some(fault) = &run.fault {
        lines.push(format!("Fault: {fault}"));
    }
    for case in &run.cases {
        lines.push(format!("- {}", case_line(case)));
    }
    lines.join("\n")
}

fn case_line(case: &CaseResult) -> String {
    match &case.status {
        CaseStatus::Passed => format!("`{}` passed", case.name),
        CaseStatus::Skipped => format!("`{}` skipped", case.name),
        CaseStatus::Errored(message) => format!("`{}` errored: {message}", case.name),
        CaseStatus::Failed(mismatches) => {
            let details: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
            format!("`{}` failed: {}", case.name, details.join("; "))
        }
    }
}

/// Result of the test case whose keys are under the cursor.
fn test_case_hover(
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    anchor: &SemanticAnchor,
    position: Position,
) -> Option<HoverResult> {
    let field = anchor.field.filter(|_| anchor.role == AnchorRole::ResourceField)?;
    if !TEST_CASE_KEYS.contains(&field.name) {
        return None;
    }
    let test = analysis
        .resource_at(position)
        .filter(|resource| resource.kind == ResourceKind::FunctionTest)?;
    let spec = test.test_spec()?;
    let index = spec
        .cases
        .iter()
        .position(|case| case.range.contains(position))?;
    let case = workspace
        .run_named(&test.name)
        .and_then(|run| run.cases.get(index));
    let contents = match case {
        Some(case) => format!("**Test case** {}", case_line(case)),
        None => format!(
            "**Test case** `{}`\n\nNot run yet.",
            spec.cases[index].display_name(index)
        ),
    };
    Some(HoverResult {
        range: anchor.range.clone(),
        contents,
    })
}

fn step_hover(analysis: &DocumentAnalysis, workflow: &str, label: &str) -> String {
    let list = |labels: Vec<&str>| {
        if labels.is_empty() {
            "none".to_string()
        } else {
            labels
                .into_iter()
                .map(|label| format!("`{label}`"))
                .collect::<Vec<_>>()
                .join(", ")
        }
    };
    let step = analysis
        .resource(ResourceKind::Workflow, workflow)
        .and_then(|resource| resource.steps().iter().find(|step| step.label == label));
    let logic = step
        .and_then(|step| step.logic.as_ref())
        .map(|logic| {
            let targets: Vec<String> = logic
                .targets()
                .into_iter()
                .map(|(kind, name, _)| match kind {
                    Some(kind) => format!("{kind} `{name}`"),
                    None => format!("`{name}`"),
                })
                .collect();
            format!("\n\nRuns {}", targets.join(" or "))
        })
        .unwrap_or_default();
    format!(
        "**Step** `{label}` in Workflow `{workflow}`{logic}\n\nDepends on: {}\n\nUsed by: {}",
        list(analysis.index.dependencies(workflow, label)),
        list(analysis.index.dependents(workflow, label)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{position_of, sample_analysis, sample_source, sample_workspace};

    fn hover_at(needle: &str, occurrence: usize, offset: usize) -> Option<HoverResult> {
        let position = position_of(sample_source(), needle, occurrence, offset);
        hover(sample_analysis(), sample_workspace(), position)
    }

    #[test]
    fn function_name_shows_test_table() {
        let hover = hover_at("name: build-image", 0, 8).expect("hover on function name");
        assert!(hover.contents.contains("**ValueFunction** `build-image`"));
        assert!(hover.contents.contains("| build-image-test | failed | 1/2 |"));
    }

    #[test]
    fn test_name_shows_run_and_mismatches() {
        let hover = hover_at("name: build-image-test", 0, 8).expect("hover on test name");
        assert!(hover.contents.contains("1 of 2 cases passed"));
        assert!(hover.contents.contains("`happy path` passed"));
        assert!(hover.contents.contains("`wrong tag` failed"));
        assert!(hover.contents.contains("`tag`"));
    }

    #[test]
    fn test_case_keys_show_case_result() {
        let hover = hover_at("label: wrong tag", 0, 2).expect("hover on case");
        assert!(hover.contents.starts_with("**Test case** `wrong tag` failed"));
    }

    #[test]
    fn step_labels_show_dependencies() {
        let hover = hover_at("label: build", 0, 8).expect("hover on step label");
        assert!(hover.contents.contains("**Step** `build`"));
        assert!(hover.contents.contains("Used by: `deploy`"));
        assert!(hover.contents.contains("ValueFunction `build-image`"));

        let reference = hover_at("${build.image_url}", 0, 3).expect("hover on step reference");
        assert!(reference.contents.contains("**Step** `build`"));
    }

    #[test]
    fn fields_and_builtins_show_documentation() {
        let field = hover_at("preconditions:", 0, 2).expect("hover on field");
        assert!(field.contents.contains("**Field** `preconditions`"));
        let function = hover_at("string(inputs.build)", 0, 2).expect("hover on function");
        assert!(function.contents.contains("string(value) -> string"));
        let kind = hover_at("kind: Workflow", 0, 7).expect("hover on kind");
        assert!(kind.contents.contains("**Kind** `Workflow`"));
    }

    #[test]
    fn hover_returns_none_for_invalid_position() {
        assert!(hover(sample_analysis(), sample_workspace(), Position::new(999, 0)).is_none());
    }
}
