//! Main language server implementation

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::features::code_lens::{input_completions, test_corrections, InputCompletion, TestCorrection};
use crate::features::commands::{self, parse_run_tests_target, RunTestsTarget, TestRunSummary};
use crate::features::completion::{completion_items, CompletionCandidate};
use crate::features::diagnostics::{collect_diagnostics, filter_diagnostics, to_lsp_diagnostic};
use crate::features::files::collect_koreo_files;
use crate::features::go_to_definition::{goto_definition, Location as AnalysisLocation};
use crate::features::hover::{hover as compute_hover, HoverResult};
use crate::features::inlay_hints::{test_status_hints, TestStatusHint};
use crate::features::references::find_references;
use crate::features::semantic_tokens::{
    collect_semantic_tokens, KoreoSemanticToken, SEMANTIC_TOKEN_KINDS,
};
use koreo_analysis::diagnostics::{
    analyze_document, Diagnostic as AnalysisDiagnostic, DocumentAnalysis,
};
use koreo_analysis::function_test::{run_function_test, TestRun};
use koreo_analysis::model::{ResourceDefinition, ResourceKind};
use koreo_analysis::source::{Position as SourcePosition, Range as SourceRange};
use koreo_analysis::workspace::WorkspaceSymbols;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_lsp::async_trait;
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::{
    CodeLens, CodeLensOptions, CodeLensParams, Command, CompletionItem, CompletionOptions,
    CompletionParams, CompletionResponse, Diagnostic, DidChangeConfigurationParams,
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, ExecuteCommandOptions, ExecuteCommandParams, GotoDefinitionParams,
    GotoDefinitionResponse, Hover, HoverContents, HoverParams, HoverProviderCapability,
    InitializeParams, InitializeResult, InitializedParams, InlayHint, InlayHintKind,
    InlayHintLabel, InlayHintParams, Location, MarkupContent, MarkupKind,
    MessageType, OneOf, Position, Range, ReferenceParams, SaveOptions, SemanticToken,
    SemanticTokenType, SemanticTokens, SemanticTokensFullOptions, SemanticTokensLegend,
    SemanticTokensOptions, SemanticTokensParams, SemanticTokensResult,
    SemanticTokensServerCapabilities, ServerCapabilities, ServerInfo, TextDocumentItem,
    TextDocumentSyncCapability, TextDocumentSyncKind, TextDocumentSyncOptions,
    TextDocumentSyncSaveOptions, Url, WorkDoneProgressOptions,
};
use tower_lsp::Client;

#[async_trait]
pub trait LspClient: Send + Sync + Clone + 'static {
    async fn publish_diagnostics(&self, uri: Url, diags: Vec<Diagnostic>, version: Option<i32>);
    async fn show_message(&self, typ: MessageType, message: String);
}

#[async_trait]
impl LspClient for Client {
    async fn publish_diagnostics(&self, uri: Url, diags: Vec<Diagnostic>, version: Option<i32>) {
        self.publish_diagnostics(uri, diags, version).await;
    }

    async fn show_message(&self, typ: MessageType, message: String) {
        self.show_message(typ, message).await;
    }
}

pub trait FeatureProvider: Send + Sync + 'static {
    fn analyze(&self, text: &str) -> DocumentAnalysis;
    fn diagnostics(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
    ) -> Vec<AnalysisDiagnostic>;
    fn run_test(&self, test: &ResourceDefinition, workspace: &WorkspaceSymbols) -> TestRun;
    fn semantic_tokens(&self, analysis: &DocumentAnalysis) -> Vec<KoreoSemanticToken>;
    fn hover(
        &self,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        position: SourcePosition,
    ) -> Option<HoverResult>;
    fn goto_definition(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        position: SourcePosition,
    ) -> Vec<AnalysisLocation>;
    fn references(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        position: SourcePosition,
        include_declaration: bool,
    ) -> Vec<AnalysisLocation>;
    fn completion(
        &self,
        source: &str,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        position: SourcePosition,
    ) -> Vec<CompletionCandidate>;
    fn code_lenses(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
    ) -> Vec<TestCorrection>;
    fn input_completions(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
    ) -> Vec<InputCompletion>;
    fn inlay_hints(
        &self,
        source: &str,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        lines: RangeInclusive<usize>,
    ) -> Vec<TestStatusHint>;
}

#[derive(Default)]
pub struct DefaultFeatureProvider;

impl DefaultFeatureProvider {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureProvider for DefaultFeatureProvider {
    fn analyze(&self, text: &str) -> DocumentAnalysis {
        analyze_document(text)
    }

    fn diagnostics(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
    ) -> Vec<AnalysisDiagnostic> {
        collect_diagnostics(uri, analysis, workspace)
    }

    fn run_test(&self, test: &ResourceDefinition, workspace: &WorkspaceSymbols) -> TestRun {
        run_function_test(test, workspace)
    }

    fn semantic_tokens(&self, analysis: &DocumentAnalysis) -> Vec<KoreoSemanticToken> {
        collect_semantic_tokens(analysis)
    }

    fn hover(
        &self,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        position: SourcePosition,
    ) -> Option<HoverResult> {
        compute_hover(analysis, workspace, position)
    }

    fn goto_definition(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        position: SourcePosition,
    ) -> Vec<AnalysisLocation> {
        goto_definition(uri, analysis, workspace, position)
    }

    fn references(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        position: SourcePosition,
        include_declaration: bool,
    ) -> Vec<AnalysisLocation> {
        find_references(uri, analysis, workspace, position, include_declaration)
    }

    fn completion(
        &self,
        source: &str,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        position: SourcePosition,
    ) -> Vec<CompletionCandidate> {
        completion_items(source, analysis, workspace, position)
    }

    fn code_lenses(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
    ) -> Vec<TestCorrection> {
        test_corrections(uri, analysis, workspace)
    }

    fn input_completions(
        &self,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
    ) -> Vec<InputCompletion> {
        input_completions(uri, analysis, workspace)
    }

    fn inlay_hints(
        &self,
        source: &str,
        uri: &Url,
        analysis: &DocumentAnalysis,
        workspace: &WorkspaceSymbols,
        lines: RangeInclusive<usize>,
    ) -> Vec<TestStatusHint> {
        test_status_hints(source, uri, analysis, workspace, lines)
    }
}

#[derive(Clone)]
struct DocumentEntry {
    text: Arc<String>,
    analysis: Arc<DocumentAnalysis>,
    version: Option<i32>,
}

/// Open documents with their latest published analysis.
///
/// Every edit bumps the document's generation; an analysis is committed only
/// if no newer edit arrived while it was computed.
#[derive(Default)]
struct DocumentStore {
    entries: RwLock<HashMap<Url, DocumentEntry>>,
    generations: RwLock<HashMap<Url, Arc<AtomicU64>>>,
}

impl DocumentStore {
    async fn begin(&self, uri: &Url) -> (Arc<AtomicU64>, u64) {
        let counter = self
            .generations
            .write()
            .await
            .entry(uri.clone())
            .or_default()
            .clone();
        let generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
        (counter, generation)
    }

    /// Stores `entry` and mirrors it into `workspace` unless superseded.
    async fn commit(
        &self,
        uri: &Url,
        entry: DocumentEntry,
        counter: &AtomicU64,
        generation: u64,
        workspace: &RwLock<WorkspaceSymbols>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        if counter.load(Ordering::SeqCst) != generation {
            return false;
        }
        workspace
            .write()
            .await
            .replace_document(uri, &entry.analysis);
        entries.insert(uri.clone(), entry);
        true
    }

    async fn get(&self, uri: &Url) -> Option<DocumentEntry> {
        self.entries.read().await.get(uri).cloned()
    }

    async fn uris(&self) -> Vec<Url> {
        self.entries.read().await.keys().cloned().collect()
    }

    async fn remove(&self, uri: &Url) {
        if let Some(counter) = self.generations.write().await.remove(uri) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.entries.write().await.remove(uri);
    }
}

fn semantic_tokens_legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: SEMANTIC_TOKEN_KINDS
            .iter()
            .map(|kind| SemanticTokenType::new(kind.as_str()))
            .collect(),
        token_modifiers: Vec::new(),
    }
}

/// Client settings under the `koreo` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KoreoConfiguration {
    pub run_tests_on_save: bool,
    pub max_completion_items: usize,
    pub unknown_field_warnings: bool,
}

impl Default for KoreoConfiguration {
    fn default() -> Self {
        Self {
            run_tests_on_save: true,
            max_completion_items: 200,
            unknown_field_warnings: true,
        }
    }
}

impl KoreoConfiguration {
    /// Applies the recognised keys of `settings`; others are left unchanged.
    pub fn update(&mut self, settings: &Value) {
        let Some(koreo) = settings.get("koreo") else {
            return;
        };
        if let Some(enabled) = koreo.get("runTestsOnSave").and_then(Value::as_bool) {
            self.run_tests_on_save = enabled;
        }
        if let Some(max) = koreo.get("maxCompletionItems").and_then(Value::as_u64) {
            self.max_completion_items = max as usize;
        }
        if let Some(enabled) = koreo.get("unknownFieldWarnings").and_then(Value::as_bool) {
            self.unknown_field_warnings = enabled;
        }
    }
}

pub struct KoreoLanguageServer<C = Client, P = DefaultFeatureProvider> {
    client: C,
    documents: DocumentStore,
    features: Arc<P>,
    workspace: Arc<RwLock<WorkspaceSymbols>>,
    workspace_roots: RwLock<Vec<PathBuf>>,
    config: RwLock<KoreoConfiguration>,
}

impl KoreoLanguageServer<Client, DefaultFeatureProvider> {
    pub fn new(client: Client) -> Self {
        Self::with_features(client, Arc::new(DefaultFeatureProvider::new()))
    }
}

impl<C, P> KoreoLanguageServer<C, P>
where
    C: LspClient,
    P: FeatureProvider,
{
    pub fn with_features(client: C, features: Arc<P>) -> Self {
        Self {
            client,
            documents: DocumentStore::default(),
            features,
            workspace: Arc::new(RwLock::new(WorkspaceSymbols::default())),
            workspace_roots: RwLock::new(Vec::new()),
            config: RwLock::new(KoreoConfiguration::default()),
        }
    }

    /// Analyses `text` on the blocking pool and commits it if still current.
    async fn update_document(&self, uri: Url, text: String, version: Option<i32>) -> bool {
        let (counter, generation) = self.documents.begin(&uri).await;
        let text = Arc::new(text);
        let source = text.clone();
        let features = self.features.clone();
        let analysis = match tokio::task::spawn_blocking(move || features.analyze(&source)).await {
            Ok(analysis) => Arc::new(analysis),
            Err(err) => {
                tracing::warn!(%uri, %err, "analysis task failed");
                return false;
            }
        };
        let resources = analysis.resources.len();
        let entry = DocumentEntry {
            text,
            analysis,
            version,
        };
        if !self
            .documents
            .commit(&uri, entry, &counter, generation, &self.workspace)
            .await
        {
            tracing::debug!(%uri, generation, "discarding superseded analysis");
            return false;
        }
        tracing::debug!(%uri, generation, resources, "analysis committed");
        true
    }

    async fn publish(&self, uri: &Url) {
        let Some(entry) = self.documents.get(uri).await else {
            return;
        };
        let unknown_field_warnings = self.config.read().await.unknown_field_warnings;
        let diagnostics = {
            let workspace = self.workspace.read().await;
            self.features.diagnostics(uri, &entry.analysis, &workspace)
        };
        let diagnostics: Vec<Diagnostic> = filter_diagnostics(diagnostics, unknown_field_warnings)
            .iter()
            .map(to_lsp_diagnostic)
            .collect();
        self.client
            .publish_diagnostics(uri.clone(), diagnostics, entry.version)
            .await;
    }

    /// Cross-document references and test results can change with any edit,
    /// so every open document is republished.
    async fn publish_all(&self) {
        for uri in self.documents.uris().await {
            self.publish(&uri).await;
        }
    }

    /// Runs the FunctionTests declared in `uris`, one blocking task per test,
    /// records the results and republishes diagnostics.
    ///
    /// Results for a document edited while the tests ran are dropped; the
    /// edit schedules its own run.
    async fn run_tests(&self, uris: &[Url]) -> Vec<TestRunSummary> {
        let snapshot = Arc::new(self.workspace.read().await.clone());
        let epoch = snapshot.epoch();
        let mut handles = Vec::new();
        for uri in uris {
            for test in snapshot.tests_in(uri) {
                let features = self.features.clone();
                let snapshot = snapshot.clone();
                let uri = uri.clone();
                handles.push(tokio::task::spawn_blocking(move || {
                    let run = features.run_test(&test, &snapshot);
                    (uri, run)
                }));
            }
        }

        let mut grouped: HashMap<Url, Vec<TestRun>> =
            uris.iter().map(|uri| (uri.clone(), Vec::new())).collect();
        for handle in handles {
            match handle.await {
                Ok((uri, run)) => grouped.entry(uri).or_default().push(run),
                Err(err) => tracing::warn!(%err, "function test task failed"),
            }
        }

        let mut summaries = Vec::new();
        {
            let mut workspace = self.workspace.write().await;
            for uri in uris {
                let runs = grouped.remove(uri).unwrap_or_default();
                summaries.extend(runs.iter().map(|run| TestRunSummary::new(uri, run)));
                if !workspace.record_runs_at(uri, epoch, runs) {
                    tracing::debug!(%uri, epoch, "discarding outdated test runs");
                }
            }
        }
        let failing = summaries
            .iter()
            .filter(|summary| summary.status != "passed")
            .count();
        tracing::info!(tests = summaries.len(), failing, "function tests finished");
        self.publish_all().await;
        summaries
    }

    /// `uri` plus every document holding a test of a function defined in it.
    async fn test_documents_for(&self, uri: &Url) -> Vec<Url> {
        let entry = self.documents.get(uri).await;
        let workspace = self.workspace.read().await;
        let mut uris = vec![uri.clone()];
        if let Some(entry) = entry {
            for resource in &entry.analysis.resources {
                if matches!(
                    resource.kind,
                    ResourceKind::ValueFunction | ResourceKind::ResourceFunction
                ) {
                    uris.extend(
                        workspace
                            .tests_for(resource.kind, &resource.name)
                            .into_iter()
                            .map(|(test_uri, _)| test_uri),
                    );
                }
            }
        }
        uris.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        uris.dedup();
        uris
    }

    /// Reruns the tests affected by `changed` when enabled, otherwise only
    /// republishes. Either way the published diagnostics match the new text.
    async fn refresh_after_edit(&self, changed: &[Url]) {
        if !self.config.read().await.run_tests_on_save {
            self.publish_all().await;
            return;
        }
        let mut uris = Vec::new();
        for uri in changed {
            uris.extend(self.test_documents_for(uri).await);
        }
        uris.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        uris.dedup();
        self.run_tests(&uris).await;
    }

    async fn document_entry(&self, uri: &Url) -> Option<DocumentEntry> {
        self.documents.get(uri).await
    }

    #[allow(deprecated)]
    async fn update_workspace_roots(&self, params: &InitializeParams) {
        let mut roots = Vec::new();

        if let Some(folders) = params.workspace_folders.as_ref() {
            for folder in folders {
                if let Ok(path) = folder.uri.to_file_path() {
                    roots.push(path);
                }
            }
        }

        if roots.is_empty() {
            if let Some(root_uri) = params.root_uri.as_ref() {
                if let Ok(path) = root_uri.to_file_path() {
                    roots.push(path);
                }
            } else if let Some(root_path) = params.root_path.as_ref() {
                roots.push(PathBuf::from(root_path));
            }
        }

        *self.workspace_roots.write().await = roots;
    }

    /// Loads every Koreo file under the workspace roots so references to
    /// unopened documents resolve.
    async fn index_workspace(&self) {
        let roots = self.workspace_roots.read().await.clone();
        if roots.is_empty() {
            return;
        }
        let features = self.features.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            let files = collect_koreo_files(&roots);
            load_files(features.as_ref(), &files)
        })
        .await;
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::warn!(%err, "workspace indexing failed");
                return;
            }
        };

        let open = self.documents.uris().await;
        let mut indexed = Vec::new();
        {
            let mut workspace = self.workspace.write().await;
            for (uri, analysis) in loaded {
                if !open.contains(&uri) {
                    workspace.replace_document(&uri, &analysis);
                    indexed.push(uri);
                }
            }
        }
        tracing::info!(files = indexed.len(), "workspace indexed");

        if self.config.read().await.run_tests_on_save {
            self.run_tests(&indexed).await;
        } else {
            self.publish_all().await;
        }
    }
}

fn load_files<P: FeatureProvider>(features: &P, files: &[PathBuf]) -> Vec<(Url, DocumentAnalysis)> {
    files
        .iter()
        .filter_map(|path| {
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping unreadable file");
                    return None;
                }
            };
            let uri = Url::from_file_path(path).ok()?;
            Some((uri, features.analyze(&text)))
        })
        .collect()
}

fn to_lsp_position(position: &SourcePosition) -> Position {
    Position::new(position.line as u32, position.column as u32)
}

fn to_lsp_range(range: &SourceRange) -> Range {
    Range {
        start: to_lsp_position(&range.start),
        end: to_lsp_position(&range.end),
    }
}

fn to_lsp_location(location: &AnalysisLocation) -> Location {
    Location {
        uri: location.uri.clone(),
        range: to_lsp_range(&location.range),
    }
}

fn from_lsp_position(position: Position) -> SourcePosition {
    SourcePosition::new(position.line as usize, position.character as usize)
}

fn encode_semantic_tokens(tokens: &[KoreoSemanticToken], text: &str) -> Vec<SemanticToken> {
    let line_offsets = compute_line_offsets(text);
    let mut data = Vec::new();
    let mut prev_line = 0u32;
    let mut prev_start = 0u32;

    for token in tokens {
        let token_type_index = SEMANTIC_TOKEN_KINDS
            .iter()
            .position(|kind| *kind == token.kind)
            .unwrap_or(0) as u32;
        for (line, start, length) in split_token_on_lines(token, text, &line_offsets) {
            if length == 0 {
                continue;
            }
            let delta_line = line.saturating_sub(prev_line);
            let delta_start = if delta_line == 0 {
                start.saturating_sub(prev_start)
            } else {
                start
            };
            data.push(SemanticToken {
                delta_line,
                delta_start,
                length,
                token_type: token_type_index,
                token_modifiers_bitset: 0,
            });
            prev_line = line;
            prev_start = start;
        }
    }

    data
}

fn compute_line_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (idx, ch) in text.char_indices() {
        if ch == '\n' {
            offsets.push(idx + ch.len_utf8());
        }
    }
    offsets
}

/// Expand a semantic token range into single-line segments.
///
/// Block scalars can carry an expression across lines, but the wire format
/// cannot span lines.
fn split_token_on_lines(
    token: &KoreoSemanticToken,
    text: &str,
    line_offsets: &[usize],
) -> Vec<(u32, u32, u32)> {
    let Some(slice) = text.get(token.range.span.clone()) else {
        return Vec::new();
    };
    let mut segments = Vec::new();
    let mut current_line = token.range.start.line as u32;
    let mut segment_start = 0;
    let base_offset = token.range.span.start;

    let mut push_segment = |line: u32, from: usize, to: usize| {
        let absolute_start = base_offset + from;
        let line_offset = line_offsets.get(line as usize).copied().unwrap_or(0);
        let start_col = absolute_start.saturating_sub(line_offset) as u32;
        segments.push((line, start_col, (to - from) as u32));
    };

    for (idx, ch) in slice.char_indices() {
        if ch == '\n' {
            if idx > segment_start {
                push_segment(current_line, segment_start, idx);
            }
            current_line += 1;
            segment_start = idx + ch.len_utf8();
        }
    }
    if slice.len() > segment_start {
        push_segment(current_line, segment_start, slice.len());
    }

    segments
}

fn to_lsp_completion_item(candidate: &CompletionCandidate) -> CompletionItem {
    CompletionItem {
        label: candidate.label.clone(),
        kind: Some(candidate.kind),
        detail: candidate.detail.clone(),
        insert_text: candidate.insert_text.clone(),
        ..Default::default()
    }
}

/// A lens whose command replaces `edit_range` with `replacement`.
fn edit_lens(
    uri: &Url,
    command: &str,
    title: &str,
    range: &SourceRange,
    edit_range: &SourceRange,
    replacement: &str,
) -> Result<CodeLens> {
    let edit_range = serde_json::to_value(to_lsp_range(edit_range)).map_err(|_| Error::internal_error())?;
    Ok(CodeLens {
        range: to_lsp_range(range),
        command: Some(Command {
            title: title.to_string(),
            command: command.to_string(),
            arguments: Some(vec![json!(uri.to_string()), edit_range, json!(replacement)]),
        }),
        data: None,
    })
}

fn to_lsp_code_lens(uri: &Url, correction: &TestCorrection) -> Result<CodeLens> {
    edit_lens(
        uri,
        commands::COMMAND_APPLY_TEST_CORRECTION,
        &correction.title,
        &correction.range,
        &correction.edit_range,
        &correction.replacement,
    )
}

fn input_completion_lens(uri: &Url, completion: &InputCompletion) -> Result<CodeLens> {
    edit_lens(
        uri,
        commands::COMMAND_COMPLETE_INPUTS,
        &completion.title,
        &completion.range,
        &completion.edit_range,
        &completion.replacement,
    )
}

fn to_lsp_inlay_hint(hint: &TestStatusHint) -> InlayHint {
    InlayHint {
        position: to_lsp_position(&hint.position),
        label: InlayHintLabel::String(hint.status.label().to_string()),
        kind: Some(InlayHintKind::TYPE),
        text_edits: None,
        tooltip: None,
        padding_left: Some(true),
        padding_right: Some(true),
        data: None,
    }
}

#[async_trait]
impl<C, P> tower_lsp::LanguageServer for KoreoLanguageServer<C, P>
where
    C: LspClient,
    P: FeatureProvider,
{
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        self.update_workspace_roots(&params).await;
        if let Some(options) = params.initialization_options.as_ref() {
            self.config.write().await.update(options);
        }
        let capabilities = ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                        include_text: Some(false),
                    })),
                    ..Default::default()
                },
            )),
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            definition_provider: Some(OneOf::Left(true)),
            references_provider: Some(OneOf::Left(true)),
            completion_provider: Some(CompletionOptions {
                resolve_provider: Some(false),
                trigger_characters: Some(vec![
                    ".".to_string(),
                    ":".to_string(),
                    "=".to_string(),
                    "{".to_string(),
                ]),
                work_done_progress_options: WorkDoneProgressOptions::default(),
                all_commit_characters: None,
                ..Default::default()
            }),
            semantic_tokens_provider: Some(
                SemanticTokensServerCapabilities::SemanticTokensOptions(SemanticTokensOptions {
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                    legend: semantic_tokens_legend(),
                    range: None,
                    full: Some(SemanticTokensFullOptions::Bool(true)),
                }),
            ),
            code_lens_provider: Some(CodeLensOptions {
                resolve_provider: Some(false),
            }),
            inlay_hint_provider: Some(OneOf::Left(true)),
            execute_command_provider: Some(ExecuteCommandOptions {
                commands: vec![
                    commands::COMMAND_RUN_FUNCTION_TESTS.to_string(),
                    commands::COMMAND_APPLY_TEST_CORRECTION.to_string(),
                    commands::COMMAND_COMPLETE_INPUTS.to_string(),
                ],
                work_done_progress_options: WorkDoneProgressOptions::default(),
            }),
            ..ServerCapabilities::default()
        };

        Ok(InitializeResult {
            capabilities,
            server_info: Some(ServerInfo {
                name: "koreo-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::info!("koreo-lsp initialized");
        self.index_workspace().await;
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("koreo-lsp shutting down");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let TextDocumentItem {
            uri, text, version, ..
        } = params.text_document;
        if self.update_document(uri.clone(), text, Some(version)).await {
            self.refresh_after_edit(&[uri]).await;
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        self.config.write().await.update(&params.settings);
        let config = self.config.read().await.clone();
        tracing::debug!(?config, "configuration updated");

        // Re-analyse all documents with new settings
        let mut reanalysed = Vec::new();
        for uri in self.documents.uris().await {
            if let Some(entry) = self.documents.get(&uri).await {
                if self
                    .update_document(uri.clone(), entry.text.to_string(), entry.version)
                    .await
                {
                    reanalysed.push(uri);
                }
            }
        }
        self.refresh_after_edit(&reanalysed).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let version = Some(params.text_document.version);
        if let Some(change) = params.content_changes.into_iter().last() {
            let uri = params.text_document.uri;
            if self.update_document(uri.clone(), change.text, version).await {
                self.refresh_after_edit(&[uri]).await;
            }
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        if !self.config.read().await.run_tests_on_save {
            return;
        }
        let uris = self.test_documents_for(&params.text_document.uri).await;
        self.run_tests(&uris).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.remove(&uri).await;
        // Files on disk stay indexed for cross-document references.
        let on_disk = uri
            .to_file_path()
            .map(|path| path.is_file())
            .unwrap_or(false);
        if !on_disk {
            self.workspace.write().await.remove_document(&uri);
        }
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        if let Some(entry) = self.document_entry(&params.text_document.uri).await {
            let tokens = self.features.semantic_tokens(&entry.analysis);
            let data = encode_semantic_tokens(&tokens, entry.text.as_str());
            Ok(Some(SemanticTokensResult::Tokens(SemanticTokens {
                result_id: None,
                data,
            })))
        } else {
            Ok(None)
        }
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        if let Some(entry) = self.document_entry(&uri).await {
            let position = from_lsp_position(params.text_document_position_params.position);
            let workspace = self.workspace.read().await;
            if let Some(result) = self.features.hover(&entry.analysis, &workspace, position) {
                return Ok(Some(Hover {
                    contents: HoverContents::Markup(MarkupContent {
                        kind: MarkupKind::Markdown,
                        value: result.contents,
                    }),
                    range: Some(to_lsp_range(&result.range)),
                }));
            }
        }
        Ok(None)
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        if let Some(entry) = self.document_entry(&uri).await {
            let position = from_lsp_position(params.text_document_position_params.position);
            let workspace = self.workspace.read().await;
            let locations =
                self.features
                    .goto_definition(&uri, &entry.analysis, &workspace, position);
            if locations.is_empty() {
                Ok(None)
            } else {
                Ok(Some(GotoDefinitionResponse::Array(
                    locations.iter().map(to_lsp_location).collect(),
                )))
            }
        } else {
            Ok(None)
        }
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        if let Some(entry) = self.document_entry(&uri).await {
            let position = from_lsp_position(params.text_document_position.position);
            let include_declaration = params.context.include_declaration;
            let workspace = self.workspace.read().await;
            let locations = self.features.references(
                &uri,
                &entry.analysis,
                &workspace,
                position,
                include_declaration,
            );
            if locations.is_empty() {
                Ok(None)
            } else {
                Ok(Some(locations.iter().map(to_lsp_location).collect()))
            }
        } else {
            Ok(None)
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        if let Some(entry) = self.document_entry(&uri).await {
            let position = from_lsp_position(params.text_document_position.position);
            let max_items = self.config.read().await.max_completion_items;
            let candidates = {
                let workspace = self.workspace.read().await;
                self.features
                    .completion(entry.text.as_str(), &entry.analysis, &workspace, position)
            };
            let items: Vec<CompletionItem> = candidates
                .iter()
                .take(max_items)
                .map(to_lsp_completion_item)
                .collect();
            Ok(Some(CompletionResponse::Array(items)))
        } else {
            Ok(None)
        }
    }

    async fn code_lens(&self, params: CodeLensParams) -> Result<Option<Vec<CodeLens>>> {
        let uri = params.text_document.uri;
        if let Some(entry) = self.document_entry(&uri).await {
            let (corrections, completions) = {
                let workspace = self.workspace.read().await;
                (
                    self.features.code_lenses(&uri, &entry.analysis, &workspace),
                    self.features.input_completions(&uri, &entry.analysis, &workspace),
                )
            };
            let mut lenses = completions
                .iter()
                .map(|completion| input_completion_lens(&uri, completion))
                .collect::<Result<Vec<_>>>()?;
            for correction in &corrections {
                lenses.push(to_lsp_code_lens(&uri, correction)?);
            }
            Ok(Some(lenses))
        } else {
            Ok(None)
        }
    }

    async fn inlay_hint(&self, params: InlayHintParams) -> Result<Option<Vec<InlayHint>>> {
        let uri = params.text_document.uri;
        let Some(entry) = self.document_entry(&uri).await else {
            return Ok(None);
        };
        let lines = params.range.start.line as usize..=params.range.end.line as usize;
        let hints = {
            let workspace = self.workspace.read().await;
            self.features
                .inlay_hints(entry.text.as_str(), &uri, &entry.analysis, &workspace, lines)
        };
        Ok(Some(hints.iter().map(to_lsp_inlay_hint).collect()))
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<Value>> {
        match params.command.as_str() {
            commands::COMMAND_RUN_FUNCTION_TESTS => {
                let uris: Vec<Url> = match parse_run_tests_target(&params.arguments)? {
                    RunTestsTarget::All => self.workspace.read().await.documents().cloned().collect(),
                    RunTestsTarget::Document(uri) => vec![uri],
                };
                let summaries = self.run_tests(&uris).await;
                let passed = summaries
                    .iter()
                    .filter(|summary| summary.status == "passed")
                    .count();
                self.client
                    .show_message(
                        MessageType::INFO,
                        format!("{passed} of {} function tests passed", summaries.len()),
                    )
                    .await;
                serde_json::to_value(summaries)
                    .map(Some)
                    .map_err(|_| Error::internal_error())
            }
            commands::COMMAND_APPLY_TEST_CORRECTION | commands::COMMAND_COMPLETE_INPUTS => {
                commands::test_correction_edit(&params.arguments)
            }
            other => {
                tracing::warn!(command = other, "unknown command");
                Err(Error::invalid_request())
            }
        }
    }
}
