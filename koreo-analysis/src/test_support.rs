use std::sync::OnceLock;

use lsp_types::Url;

use crate::diagnostics::{analyze_document, DocumentAnalysis};
use crate::source::{Position, SourceLocation};
use crate::workspace::WorkspaceSymbols;

const SAMPLE: &str = r#"apiVersion: koreo.dev/v1beta1
kind: ValueFunction
metadata:
  name: build-image
spec:
  preconditions:
    - assert: =has(inputs.repository)
      permFail:
        message: no repository given
  locals:
    tag: =inputs.version + "-" + string(inputs.build)
  return:
    image_url: =inputs.repository + ":" + locals.tag
    tag: =locals.tag
---
apiVersion: koreo.dev/v1beta1
kind: ResourceFunction
metadata:
  name: deployment
spec:
  apiConfig:
    apiVersion: apps/v1
    kind: Deployment
    name: =inputs.name
    namespace: default
  resource:
    spec:
      replicas: =inputs.replicas
      template:
        spec:
          containers:
            - name: app
              image: =inputs.image
  create:
    delay: 15
  return:
    ready: =resource.status.readyReplicas == inputs.replicas
---
apiVersion: koreo.dev/v1beta1
kind: Workflow
metadata:
  name: release
spec:
  steps:
    - label: build
      ref:
        kind: ValueFunction
        name: build-image
      inputs:
        repository: registry.example.com/app
        version: v1
        build: 7
    - label: deploy
      ref:
        kind: ResourceFunction
        name: deployment
      inputs:
        name: app
        replicas: 2
        image: =${build.image_url}
      state:
        tag: =steps.build.tag
---
apiVersion: koreo.dev/v1beta1
kind: FunctionTest
metadata:
  name: build-image-test
spec:
  functionRef:
    kind: ValueFunction
    name: build-image
  inputs:
    repository: registry.example.com/app
    version: v1
    build: 7
  testCases:
    - label: happy path
      expectReturn:
        image_url: registry.example.com/app:v1-7
        tag: v1-7
    - label: wrong tag
      variant: true
      inputOverrides:
        build: 8
      expectReturn:
        image_url: registry.example.com/app:v1-8
        tag: v1-7
"#;

struct SampleFixture {
    analysis: DocumentAnalysis,
    workspace: WorkspaceSymbols,
}

static SAMPLE_FIXTURE: OnceLock<SampleFixture> = OnceLock::new();

fn sample_fixture() -> &'static SampleFixture {
    SAMPLE_FIXTURE.get_or_init(|| {
        let analysis = analyze_document(SAMPLE);
        let mut workspace = WorkspaceSymbols::default();
        workspace.replace_document(&sample_uri(), &analysis);
        let runs = workspace.run_tests_in(&sample_uri());
        workspace.record_runs(&sample_uri(), runs);
        SampleFixture {
            analysis,
            workspace,
        }
    })
}

/// A stream with one resource of every kind and a FunctionTest with one
/// passing and one failing case.
pub fn sample_source() -> &'static str {
    SAMPLE
}

pub fn sample_uri() -> Url {
    Url::parse("file:///workspace/sample.k.yaml").expect("static URI parses")
}

pub fn sample_analysis() -> &'static DocumentAnalysis {
    &sample_fixture().analysis
}

/// Workspace holding the sample document with its test results recorded.
pub fn sample_workspace() -> &'static WorkspaceSymbols {
    &sample_fixture().workspace
}

/// Position of the `occurrence`-th match of `needle`, plus `offset` bytes.
pub fn position_of(source: &str, needle: &str, occurrence: usize, offset: usize) -> Position {
    let start = source
        .match_indices(needle)
        .nth(occurrence)
        .map(|(idx, _)| idx)
        .unwrap_or_else(|| panic!("`{needle}` occurrence {occurrence} not in fixture"));
    SourceLocation::new(source).byte_to_position(start + offset)
}
