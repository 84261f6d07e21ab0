//! Cross-document symbol table.
//!
//! Holds the resource definitions and references of every analysed document,
//! keyed by document URI, plus the latest function test results. Replacing a
//! document swaps all of its entries at once and drops its recorded runs.
//!
//! Every replace or remove advances the workspace epoch. Runs computed from a
//! snapshot are recorded with the snapshot's epoch and refused once their
//! document or a newer recording has moved past it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use lsp_types::Url;

use crate::diagnostics::DocumentAnalysis;
use crate::function_test::{run_function_test, FunctionLookup, PreparedFunction, TestRun};
use crate::model::{AnchorRole, ResourceDefinition, ResourceKind, SymbolId};
use crate::source::Range;

#[derive(Debug, Clone, Default)]
struct DocumentSymbols {
    /// Epoch at which this document was last replaced.
    revision: u64,
    resources: Vec<Arc<ResourceDefinition>>,
    definitions: Vec<(SymbolId, Range)>,
    references: Vec<(SymbolId, Range)>,
}

#[derive(Debug, Clone, Default)]
struct RecordedRuns {
    epoch: u64,
    runs: Vec<TestRun>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceSymbols {
    epoch: u64,
    documents: HashMap<Url, DocumentSymbols>,
    /// Latest runs keyed by the URI of the FunctionTest's document.
    runs: HashMap<Url, RecordedRuns>,
}

impl WorkspaceSymbols {
    pub fn replace_document(&mut self, uri: &Url, analysis: &DocumentAnalysis) {
        let definitions = analysis
            .index
            .definitions()
            .filter(|(symbol, _)| matches!(symbol, SymbolId::Resource { .. }))
            .map(|(symbol, range)| (symbol.clone(), range.clone()))
            .collect();
        let references = analysis
            .index
            .anchors_with_role(AnchorRole::ResourceRefUse)
            .filter_map(|anchor| Some((anchor.target.clone()?, anchor.range.clone())))
            .collect();
        self.epoch += 1;
        let symbols = DocumentSymbols {
            revision: self.epoch,
            resources: analysis.resources.iter().cloned().map(Arc::new).collect(),
            definitions,
            references,
        };
        self.documents.insert(uri.clone(), symbols);
        self.runs.remove(uri);
    }

    pub fn remove_document(&mut self, uri: &Url) {
        self.epoch += 1;
        self.documents.remove(uri);
        self.runs.remove(uri);
    }

    /// Advances on every document replace or remove.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn documents(&self) -> impl Iterator<Item = &Url> {
        self.documents.keys()
    }

    pub fn contains(&self, symbol: &SymbolId) -> bool {
        self.documents
            .values()
            .any(|document| document.definitions.iter().any(|(defined, _)| defined == symbol))
    }

    /// Every definition site of `symbol`, in URI order.
    pub fn locations(&self, symbol: &SymbolId) -> Vec<(Url, Range)> {
        self.collect(symbol, |document| &document.definitions)
    }

    pub fn references(&self, symbol: &SymbolId) -> Vec<(Url, Range)> {
        self.collect(symbol, |document| &document.references)
    }

    fn collect(
        &self,
        symbol: &SymbolId,
        entries: impl Fn(&DocumentSymbols) -> &Vec<(SymbolId, Range)>,
    ) -> Vec<(Url, Range)> {
        let mut found: Vec<(Url, Range)> = self
            .documents
            .iter()
            .flat_map(|(uri, document)| {
                entries(document)
                    .iter()
                    .filter(|(candidate, _)| candidate == symbol)
                    .map(|(_, range)| (uri.clone(), range.clone()))
            })
            .collect();
        found.sort_by(|a, b| (a.0.as_str(), a.1.start).cmp(&(b.0.as_str(), b.1.start)));
        found
    }

    pub fn resource(&self, kind: ResourceKind, name: &str) -> Option<(Url, Arc<ResourceDefinition>)> {
        let mut matches: Vec<(&Url, &Arc<ResourceDefinition>)> = self
            .documents
            .iter()
            .flat_map(|(uri, document)| document.resources.iter().map(move |resource| (uri, resource)))
            .filter(|(_, resource)| resource.kind == kind && resource.name == name)
            .collect();
        matches.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        matches
            .into_iter()
            .next()
            .map(|(uri, resource)| (uri.clone(), Arc::clone(resource)))
    }

    /// Sorted, distinct names of every resource of `kind`.
    pub fn names_of_kind(&self, kind: ResourceKind) -> Vec<String> {
        self.documents
            .values()
            .flat_map(|document| document.resources.iter())
            .filter(|resource| resource.kind == kind)
            .map(|resource| resource.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every FunctionTest in the workspace, ordered by URI and position.
    pub fn function_tests(&self) -> Vec<(Url, Arc<ResourceDefinition>)> {
        let mut tests: Vec<(Url, Arc<ResourceDefinition>)> = self
            .documents
            .iter()
            .flat_map(|(uri, document)| {
                document
                    .resources
                    .iter()
                    .filter(|resource| resource.kind == ResourceKind::FunctionTest)
                    .map(move |resource| (uri.clone(), Arc::clone(resource)))
            })
            .collect();
        tests.sort_by(|a, b| (a.0.as_str(), a.1.range.start).cmp(&(b.0.as_str(), b.1.range.start)));
        tests
    }

    /// FunctionTests in the document at `uri`.
    pub fn tests_in(&self, uri: &Url) -> Vec<Arc<ResourceDefinition>> {
        self.documents
            .get(uri)
            .map(|document| {
                document
                    .resources
                    .iter()
                    .filter(|resource| resource.kind == ResourceKind::FunctionTest)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// FunctionTests whose `functionRef` names `kind`/`name`.
    pub fn tests_for(&self, kind: ResourceKind, name: &str) -> Vec<(Url, Arc<ResourceDefinition>)> {
        self.function_tests()
            .into_iter()
            .filter(|(_, test)| {
                test.test_spec()
                    .and_then(|spec| spec.function_ref.as_ref())
                    .is_some_and(|(ref_kind, ref_name)| *ref_kind == kind && ref_name == name)
            })
            .collect()
    }

    /// Runs every FunctionTest in the document at `uri` against the current
    /// workspace.
    pub fn run_tests_in(&self, uri: &Url) -> Vec<TestRun> {
        self.tests_in(uri)
            .iter()
            .map(|test| run_function_test(test, self))
            .collect()
    }

    /// Records runs computed against the current state.
    pub fn record_runs(&mut self, uri: &Url, runs: Vec<TestRun>) {
        let epoch = self.epoch;
        self.record_runs_at(uri, epoch, runs);
    }

    /// Records runs computed against a snapshot taken at `epoch`.
    ///
    /// Returns `false` and keeps the current state when the document was
    /// replaced after the snapshot or newer runs are already recorded.
    pub fn record_runs_at(&mut self, uri: &Url, epoch: u64, runs: Vec<TestRun>) -> bool {
        let Some(document) = self.documents.get(uri) else {
            return false;
        };
        if document.revision > epoch {
            return false;
        }
        if self.runs.get(uri).is_some_and(|recorded| recorded.epoch > epoch) {
            return false;
        }
        self.runs.insert(uri.clone(), RecordedRuns { epoch, runs });
        true
    }

    pub fn runs_in(&self, uri: &Url) -> &[TestRun] {
        self.runs
            .get(uri)
            .map(|recorded| recorded.runs.as_slice())
            .unwrap_or_default()
    }

    /// Latest runs of tests targeting `kind`/`name`, across the workspace.
    pub fn runs_for(&self, kind: ResourceKind, name: &str) -> Vec<&TestRun> {
        let mut runs: Vec<&TestRun> = self
            .runs
            .values()
            .flat_map(|recorded| recorded.runs.iter())
            .filter(|run| {
                run.function
                    .as_ref()
                    .is_some_and(|(run_kind, run_name)| *run_kind == kind && run_name == name)
            })
            .collect();
        runs.sort_by(|a, b| a.test_name.cmp(&b.test_name));
        runs
    }

    pub fn run_named(&self, test_name: &str) -> Option<&TestRun> {
        self.runs
            .values()
            .flat_map(|recorded| recorded.runs.iter())
            .find(|run| run.test_name == test_name)
    }
}

impl FunctionLookup for WorkspaceSymbols {
    fn function(&self, kind: ResourceKind, name: &str) -> Option<Arc<PreparedFunction>> {
        let (_, resource) = self.resource(kind, name)?;
        match resource.function()? {
            Ok(function) => Some(Arc::clone(function)),
            Err(err) => {
                tracing::debug!(%kind, name, error = %err, "function failed to prepare");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::analyze_document;
    use crate::function_test::RunStatus;

    const FUNCTION: &str = "\
apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: greet
spec:
  return:
    message: =\"hello \" + inputs.name
";

    const TEST: &str = "\
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
  testCases:
    - expectReturn:
        message: hello koreo
";

    fn url(path: &str) -> Url {
        Url::parse(&format!("file:///workspace/{path}")).unwrap()
    }

    fn workspace() -> WorkspaceSymbols {
        let mut workspace = WorkspaceSymbols::default();
        workspace.replace_document(&url("greet.yaml"), &analyze_document(FUNCTION));
        workspace.replace_document(&url("greet-test.yaml"), &analyze_document(TEST));
        workspace
    }

    #[test]
    fn resolves_definitions_and_references_across_documents() {
        let workspace = workspace();
        let symbol = SymbolId::resource(ResourceKind::ValueFunction, "greet");
        assert!(workspace.contains(&symbol));
        assert_eq!(workspace.locations(&symbol)[0].0, url("greet.yaml"));
        let references = workspace.references(&symbol);
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].0, url("greet-test.yaml"));
        assert_eq!(workspace.names_of_kind(ResourceKind::ValueFunction), vec!["greet"]);
    }

    #[test]
    fn replacing_a_document_drops_its_old_symbols() {
        let mut workspace = workspace();
        workspace.replace_document(&url("greet.yaml"), &analyze_document(""));
        assert!(!workspace.contains(&SymbolId::resource(ResourceKind::ValueFunction, "greet")));
        workspace.remove_document(&url("greet-test.yaml"));
        assert!(workspace.function_tests().is_empty());
    }

    #[test]
    fn runs_tests_against_workspace_functions() {
        let mut workspace = workspace();
        assert_eq!(workspace.tests_for(ResourceKind::ValueFunction, "greet").len(), 1);
        let runs = workspace.run_tests_in(&url("greet-test.yaml"));
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Passed, "{:?}", runs[0]);

        workspace.record_runs(&url("greet-test.yaml"), runs);
        assert_eq!(workspace.runs_for(ResourceKind::ValueFunction, "greet").len(), 1);
        assert!(workspace.run_named("greet-test").is_some());
        assert!(workspace.runs_in(&url("greet.yaml")).is_empty());
    }

    #[test]
    fn replacing_a_document_forgets_its_runs() {
        let mut workspace = workspace();
        let test_uri = url("greet-test.yaml");
        let runs = workspace.run_tests_in(&test_uri);
        workspace.record_runs(&test_uri, runs);
        assert_eq!(workspace.runs_in(&test_uri).len(), 1);

        let edited = format!("# edited\n{TEST}");
        workspace.replace_document(&test_uri, &analyze_document(&edited));
        assert!(workspace.runs_in(&test_uri).is_empty());
        assert!(workspace.run_named("greet-test").is_none());
    }

    #[test]
    fn runs_from_an_outdated_snapshot_are_refused() {
        let mut workspace = workspace();
        let test_uri = url("greet-test.yaml");
        let snapshot = workspace.clone();
        let stale = snapshot.run_tests_in(&test_uri);

        workspace.replace_document(&test_uri, &analyze_document(TEST));
        assert!(!workspace.record_runs_at(&test_uri, snapshot.epoch(), stale));
        assert!(workspace.runs_in(&test_uri).is_empty());

        let fresh = workspace.run_tests_in(&test_uri);
        assert!(workspace.record_runs_at(&test_uri, workspace.epoch(), fresh));
        let older = snapshot.run_tests_in(&test_uri);
        assert!(!workspace.record_runs_at(&test_uri, snapshot.epoch(), older));
        assert_eq!(workspace.runs_in(&test_uri).len(), 1);
    }

    #[test]
    fn edits_elsewhere_keep_a_snapshot_current() {
        let mut workspace = workspace();
        let test_uri = url("greet-test.yaml");
        let snapshot = workspace.clone();
        workspace.replace_document(&url("other.yaml"), &analyze_document(""));
        let runs = snapshot.run_tests_in(&test_uri);
        assert!(workspace.record_runs_at(&test_uri, snapshot.epoch(), runs));
    }
}
