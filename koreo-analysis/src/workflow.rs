//! Step dependency graph of a workflow.
//!
//! Steps form a partial order: a step may only mention steps declared before
//! it. Execution order among independent steps is left to the runtime; here
//! the graph is only validated.

use std::collections::{BTreeSet, HashMap};

use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::model::WorkflowStep;
use crate::source::Position;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Labels in declaration order; duplicates keep their first position.
    labels: Vec<String>,
    positions: HashMap<String, usize>,
    /// `(dependent, dependency)` label pairs, dependencies possibly undeclared.
    edges: BTreeSet<(String, String)>,
}

impl DependencyGraph {
    pub fn build(steps: &[WorkflowStep]) -> Self {
        let mut graph = DependencyGraph::default();
        for (idx, step) in steps.iter().enumerate() {
            graph.labels.push(step.label.clone());
            graph.positions.entry(step.label.clone()).or_insert(idx);
            for mention in &step.mentions {
                graph
                    .edges
                    .insert((step.label.clone(), mention.label.clone()));
            }
        }
        graph
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.positions.get(label).copied()
    }

    /// Labels `label` mentions.
    pub fn dependencies(&self, label: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, _)| from == label)
            .map(|(_, to)| to.as_str())
            .collect()
    }

    /// Labels that mention `label`.
    pub fn dependents(&self, label: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, to)| to == label)
            .map(|(from, _)| from.as_str())
            .collect()
    }

    /// Labels a step at `index` may reference.
    pub fn visible_from(&self, index: usize) -> &[String] {
        &self.labels[..index.min(self.labels.len())]
    }

    /// A valid execution order, or `None` when the steps form a cycle.
    pub fn topological_order(&self) -> Option<Vec<&str>> {
        let mut remaining: HashMap<&str, usize> = self
            .positions
            .keys()
            .map(|label| (label.as_str(), 0))
            .collect();
        for (from, to) in &self.edges {
            if self.positions.contains_key(to) && from != to {
                if let Some(count) = remaining.get_mut(from.as_str()) {
                    *count += 1;
                }
            }
        }

        let mut order = Vec::with_capacity(remaining.len());
        loop {
            let mut ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, count)| **count == 0)
                .map(|(label, _)| *label)
                .collect();
            if ready.is_empty() {
                break;
            }
            ready.sort_by_key(|label| self.positions.get(*label).copied());
            for label in ready {
                remaining.remove(label);
                for dependent in self.dependents(label) {
                    if dependent == label {
                        continue;
                    }
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count = count.saturating_sub(1);
                    }
                }
                order.push(label);
            }
        }
        remaining.is_empty().then_some(order)
    }
}

/// Index of the step whose item range contains `position`.
pub fn step_at(steps: &[WorkflowStep], position: Position) -> Option<usize> {
    steps.iter().position(|step| step.range.contains(position))
}

/// Duplicate labels, undeclared step mentions and forward references.
pub fn check_steps(steps: &[WorkflowStep]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let graph = DependencyGraph::build(steps);

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        if let Some(first) = seen.get(step.label.as_str()) {
            diagnostics.push(Diagnostic::new(
                DiagnosticCode::DuplicateLabel,
                step.label_range.clone(),
                format!(
                    "step label `{}` is already used by step {}",
                    step.label,
                    first + 1
                ),
            ));
            continue;
        }
        seen.insert(step.label.as_str(), idx);
    }

    for (idx, step) in steps.iter().enumerate() {
        for mention in &step.mentions {
            match graph.position(&mention.label) {
                None => diagnostics.push(Diagnostic::new(
                    DiagnosticCode::UnresolvedReference,
                    mention.range.clone(),
                    format!(
                        "step `{}` references undeclared step `{}`",
                        step.label, mention.label
                    ),
                )),
                Some(target) if target == idx => diagnostics.push(Diagnostic::new(
                    DiagnosticCode::ForwardReference,
                    mention.range.clone(),
                    format!("step `{}` references itself", step.label),
                )),
                Some(target) if target > idx => diagnostics.push(Diagnostic::new(
                    DiagnosticCode::ForwardReference,
                    mention.range.clone(),
                    format!(
                        "step `{}` references `{}`, which is declared later; move `{}` above it",
                        step.label, mention.label, mention.label
                    ),
                )),
                Some(_) => {}
            }
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepMentionSite;
    use crate::source::Range;
    use serde_json::json;

    fn step(label: &str, mentions: &[&str]) -> WorkflowStep {
        WorkflowStep {
            label: label.into(),
            label_range: Range::default(),
            range: Range::default(),
            logic: None,
            skip_if: None,
            for_each: None,
            condition: None,
            state: None,
            inputs: json!({}),
            mentions: mentions
                .iter()
                .map(|label| StepMentionSite {
                    label: label.to_string(),
                    range: Range::default(),
                })
                .collect(),
        }
    }

    fn codes(steps: &[WorkflowStep]) -> Vec<DiagnosticCode> {
        check_steps(steps).into_iter().map(|d| d.code).collect()
    }

    #[test]
    fn ordered_steps_are_valid() {
        let steps = vec![step("build", &[]), step("deploy", &["build"])];
        assert!(codes(&steps).is_empty());
        let graph = DependencyGraph::build(&steps);
        assert_eq!(graph.dependencies("deploy"), vec!["build"]);
        assert_eq!(graph.dependents("build"), vec!["deploy"]);
        assert_eq!(graph.topological_order(), Some(vec!["build", "deploy"]));
    }

    #[test]
    fn reordered_steps_are_forward_references() {
        let steps = vec![step("deploy", &["build"]), step("build", &[])];
        assert_eq!(codes(&steps), vec![DiagnosticCode::ForwardReference]);
    }

    #[test]
    fn undeclared_and_duplicate_labels() {
        let steps = vec![
            step("a", &[]),
            step("a", &[]),
            step("b", &["missing", "a"]),
        ];
        assert_eq!(
            codes(&steps),
            vec![
                DiagnosticCode::DuplicateLabel,
                DiagnosticCode::UnresolvedReference
            ]
        );
    }

    #[test]
    fn cycles_have_no_order() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert_eq!(DependencyGraph::build(&steps).topological_order(), None);
        let independent = vec![step("x", &[]), step("y", &[]), step("z", &["x"])];
        assert_eq!(
            DependencyGraph::build(&independent).topological_order(),
            Some(vec!["x", "y", "z"])
        );
    }

    #[test]
    fn visibility_follows_declaration_order() {
        let graph = DependencyGraph::build(&[step("a", &[]), step("b", &[]), step("c", &[])]);
        assert_eq!(graph.visible_from(2), ["a".to_string(), "b".to_string()]);
        assert!(graph.visible_from(0).is_empty());
    }
}
