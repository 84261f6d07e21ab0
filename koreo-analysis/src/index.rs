//! Per-document semantic index.
//!
//! Anchors are kept sorted by start offset together with their enclosing
//! parent, so a position query is a binary search followed by a walk up the
//! nesting chain. Symbols map to their defining range and every referencing
//! range; workflows keep their step dependency graph.

use std::collections::HashMap;

use crate::model::{AnchorRole, ResourceDefinition, SemanticAnchor, SymbolId};
use crate::source::{Position, Range};
use crate::workflow::DependencyGraph;

#[derive(Debug, Clone, Default)]
pub struct SemanticIndex {
    anchors: Vec<SemanticAnchor>,
    parents: Vec<Option<usize>>,
    definitions: HashMap<SymbolId, Range>,
    references: HashMap<SymbolId, Vec<Range>>,
    workflows: HashMap<String, DependencyGraph>,
}

impl SemanticIndex {
    pub fn build(mut anchors: Vec<SemanticAnchor>, resources: &[ResourceDefinition]) -> Self {
        anchors.sort_by(|a, b| {
            a.range
                .span
                .start
                .cmp(&b.range.span.start)
                .then(b.range.span.end.cmp(&a.range.span.end))
        });

        let mut parents = Vec::with_capacity(anchors.len());
        let mut stack: Vec<usize> = Vec::new();
        for (idx, anchor) in anchors.iter().enumerate() {
            while let Some(&top) = stack.last() {
                if anchors[top].range.encloses(&anchor.range) {
                    break;
                }
                stack.pop();
            }
            parents.push(stack.last().copied());
            stack.push(idx);
        }

        let mut definitions = HashMap::new();
        let mut references: HashMap<SymbolId, Vec<Range>> = HashMap::new();
        for anchor in &anchors {
            if let Some(symbol) = &anchor.symbol {
                definitions
                    .entry(symbol.clone())
                    .or_insert_with(|| anchor.range.clone());
            }
            if let Some(target) = &anchor.target {
                references
                    .entry(target.clone())
                    .or_default()
                    .push(anchor.range.clone());
            }
        }

        let workflows = resources
            .iter()
            .filter(|resource| !resource.steps().is_empty())
            .map(|resource| {
                (
                    resource.name.clone(),
                    DependencyGraph::build(resource.steps()),
                )
            })
            .collect();

        Self {
            anchors,
            parents,
            definitions,
            references,
            workflows,
        }
    }

    pub fn anchors(&self) -> &[SemanticAnchor] {
        &self.anchors
    }

    /// Every anchor covering `position`, outermost first, innermost last.
    pub fn anchors_at(&self, position: Position) -> Vec<&SemanticAnchor> {
        let candidates = self
            .anchors
            .partition_point(|anchor| anchor.range.start <= position);
        let mut covering = Vec::new();
        let mut current = candidates.checked_sub(1);
        while let Some(idx) = current {
            let anchor = &self.anchors[idx];
            if anchor.range.contains(position) {
                covering.push(anchor);
            }
            current = self.parents[idx];
        }
        covering.reverse();
        covering
    }

    pub fn innermost_at(&self, position: Position) -> Option<&SemanticAnchor> {
        self.anchors_at(position).pop()
    }

    /// Innermost anchor at `position` satisfying `predicate`.
    pub fn innermost_matching(
        &self,
        position: Position,
        predicate: impl Fn(&SemanticAnchor) -> bool,
    ) -> Option<&SemanticAnchor> {
        self.anchors_at(position)
            .into_iter()
            .rev()
            .find(|anchor| predicate(anchor))
    }

    pub fn definition(&self, symbol: &SymbolId) -> Option<&Range> {
        self.definitions.get(symbol)
    }

    pub fn definitions(&self) -> impl Iterator<Item = (&SymbolId, &Range)> {
        self.definitions.iter()
    }

    pub fn references(&self, symbol: &SymbolId) -> &[Range] {
        self.references
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All anchors of `role`, in document order.
    pub fn anchors_with_role(&self, role: AnchorRole) -> impl Iterator<Item = &SemanticAnchor> {
        self.anchors.iter().filter(move |anchor| anchor.role == role)
    }

    pub fn workflow(&self, name: &str) -> Option<&DependencyGraph> {
        self.workflows.get(name)
    }

    pub fn dependents(&self, workflow: &str, label: &str) -> Vec<&str> {
        self.workflow(workflow)
            .map(|graph| graph.dependents(label))
            .unwrap_or_default()
    }

    pub fn dependencies(&self, workflow: &str, label: &str) -> Vec<&str> {
        self.workflow(workflow)
            .map(|graph| graph.dependencies(label))
            .unwrap_or_default()
    }
}
