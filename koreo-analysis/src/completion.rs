//! Context-aware completion for Koreo documents.
//!
//! The cursor line is classified from its text, since the line being typed
//! is usually not yet valid YAML:
//!
//! - **Expression context**: after a value starting with `=`, offers built-in
//!   functions with their signatures, root identifiers, keywords, and
//!   `steps.<label>` for every step declared before the current one.
//!
//! - **Kind context**: after `kind:` at the top level or inside a reference,
//!   offers the resource kinds valid there.
//!
//! - **Name context**: after `name:` inside a reference, offers names of the
//!   referenced kind from the document and the workspace.
//!
//! - **Field context**: at a key position, offers the schema fields of the
//!   enclosing mapping.

use std::collections::BTreeSet;

use lsp_types::CompletionItemKind;

use crate::diagnostics::DocumentAnalysis;
use crate::expression::lexer::KEYWORDS;
use crate::model::ResourceKind;
use crate::schema::{mapping_at, PathSegment};
use crate::source::Position;
use crate::workflow::step_at;
use crate::workspace::WorkspaceSymbols;

/// A completion suggestion with display metadata.
///
/// Maps to LSP `CompletionItem` but remains protocol-agnostic. The LSP layer
/// converts these to the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCandidate {
    /// The text shown in the completion menu and inserted by default.
    pub label: String,
    /// Optional description shown alongside the label (e.g., a signature).
    pub detail: Option<String>,
    /// Semantic category for icon display and sorting.
    pub kind: CompletionItemKind,
    /// Alternative text to insert if different from label.
    pub insert_text: Option<String>,
}

impl CompletionCandidate {
    fn new(label: impl Into<String>, kind: CompletionItemKind) -> Self {
        Self {
            label: label.into(),
            detail: None,
            kind,
            insert_text: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn with_insert_text(mut self, text: impl Into<String>) -> Self {
        self.insert_text = Some(text.into());
        self
    }
}

const FUNCTIONS: &[(&str, &str)] = &[
    ("has", "has(x.field) -> bool"),
    ("size", "size(list | map | string) -> int"),
    ("int", "int(value) -> int"),
    ("double", "double(value) -> double"),
    ("string", "string(value) -> string"),
    ("bool", "bool(value) -> bool"),
    ("type", "type(value) -> string"),
    ("sum", "sum(list) -> number"),
    ("min", "min(list) -> number"),
    ("max", "max(list) -> number"),
];

const METHODS: &[(&str, &str)] = &[
    ("contains", "string.contains(string) -> bool"),
    ("startsWith", "string.startsWith(string) -> bool"),
    ("endsWith", "string.endsWith(string) -> bool"),
    ("matches", "string.matches(regex) -> bool"),
    ("lower", "string.lower() -> string"),
    ("upper", "string.upper() -> string"),
    ("trim", "string.trim() -> string"),
    ("split", "string.split(separator) -> list"),
    ("join", "list.join(separator) -> string"),
    ("size", "x.size() -> int"),
    ("overlay", "map.overlay(map) -> map"),
    ("map", "list.map(x, expr) -> list"),
    ("filter", "list.filter(x, predicate) -> list"),
    ("all", "list.all(x, predicate) -> bool"),
    ("exists", "list.exists(x, predicate) -> bool"),
    ("exists_one", "list.exists_one(x, predicate) -> bool"),
];

const ROOTS: &[(&str, &str)] = &[
    ("inputs", "inputs passed to the function or step"),
    ("locals", "values computed in `locals`"),
    ("resource", "the managed resource"),
    ("parent", "the workflow's parent resource"),
    ("self", "the current resource"),
];

/// Signature of a built-in function or method, for hover.
pub(crate) fn signature_of(name: &str) -> Option<&'static str> {
    FUNCTIONS
        .iter()
        .chain(METHODS)
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, signature)| *signature)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CompletionContext {
    Expression(String),
    Kind(Vec<PathSegment>),
    Name(Vec<PathSegment>, Option<ResourceKind>),
    Field(Vec<PathSegment>),
    None,
}

/// Returns completion candidates appropriate for the cursor position.
///
/// `source` is the document text `analysis` was computed from. The candidates
/// are deduplicated and returned in a stable order; the LSP layer may trim
/// them.
pub fn completion_items(
    source: &str,
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    position: Position,
) -> Vec<CompletionCandidate> {
    match detect_context(source, position) {
        CompletionContext::Expression(prefix) => expression_completions(analysis, position, &prefix),
        CompletionContext::Kind(path) => kind_completions(&path),
        CompletionContext::Name(path, kind) => match (reference_kinds(&path), kind) {
            (Some(_), Some(kind)) if !path.is_empty() => name_completions(analysis, workspace, kind),
            _ => Vec::new(),
        },
        CompletionContext::Field(path) => field_completions(source, position, &path),
        CompletionContext::None => Vec::new(),
    }
}

/// Indentation and key/value split of one (possibly partial) YAML line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineShape<'a> {
    /// Column of the dash when the line starts a sequence item.
    dash: Option<usize>,
    /// Column of the first character after indentation and dash.
    content: usize,
    key: Option<&'a str>,
    value: Option<&'a str>,
}

fn line_shape(line: &str) -> LineShape<'_> {
    let trimmed = line.trim_start();
    let mut content = line.len() - trimmed.len();
    let mut rest = trimmed;
    let mut dash = None;
    if rest == "-" || rest.starts_with("- ") {
        dash = Some(content);
        let after = rest[1..].trim_start();
        content += rest.len() - after.len();
        rest = after;
    }

    let split = rest
        .find(": ")
        .or_else(|| rest.ends_with(':').then(|| rest.len() - 1))
        .filter(|&idx| {
            let key = &rest[..idx];
            !key.is_empty() && !key.starts_with('=') && !key.contains(char::is_whitespace)
        });
    let (key, value) = match split {
        Some(idx) => (Some(&rest[..idx]), Some(rest[idx + 1..].trim_start())),
        None if rest.starts_with('=') => (None, Some(rest)),
        None => (None, None),
    };
    LineShape {
        dash,
        content,
        key,
        value,
    }
}

fn is_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn detect_context(source: &str, position: Position) -> CompletionContext {
    let lines: Vec<&str> = source.lines().collect();
    let line = lines.get(position.line).copied().unwrap_or_default();
    let Some(prefix) = line.get(..position.column.min(line.len())) else {
        return CompletionContext::None;
    };
    let shape = line_shape(prefix);

    if let Some(expression) = shape.value.and_then(|value| value.strip_prefix('=')) {
        return CompletionContext::Expression(expression.to_string());
    }

    let path = match shape.dash {
        Some(dash) => enclosing_path(&lines, position.line, dash, true).map(|mut path| {
            path.push(PathSegment::Index(0));
            path
        }),
        None => enclosing_path(&lines, position.line, shape.content, false),
    };
    let Some(path) = path else {
        return CompletionContext::None;
    };
    match (shape.key, shape.value) {
        (Some("kind"), Some(_)) => CompletionContext::Kind(path),
        (Some("name"), Some(_)) => {
            let kind = sibling_value(&lines, position.line, shape.content, "kind")
                .and_then(ResourceKind::parse);
            CompletionContext::Name(path, kind)
        }
        (Some(_), Some(_)) => CompletionContext::None,
        _ => CompletionContext::Field(path),
    }
}

/// Keys and sequence indices leading to the mapping whose keys sit at column
/// `column` on `line`, recovered from indentation alone.
///
/// With `after_item`, `column` is the dash column of an item on `line`.
fn enclosing_path(
    lines: &[&str],
    line: usize,
    column: usize,
    after_item: bool,
) -> Option<Vec<PathSegment>> {
    let mut path = Vec::new();
    let mut column = column;
    let line = line.min(lines.len());
    // Directly after an item, its parent key may share the dash's column.
    let mut after_item = after_item;
    for candidate in lines[..line].iter().rev() {
        if column == 0 && !after_item {
            break;
        }
        if candidate.trim() == "---" {
            break;
        }
        if is_blank(candidate) {
            continue;
        }
        let shape = line_shape(candidate);

        if let Some(dash) = shape.dash {
            if shape.content == column && !after_item {
                path.push(PathSegment::Index(0));
                column = dash;
                after_item = true;
                continue;
            }
        }

        let is_parent = shape.content < column || (after_item && shape.content <= column);
        if !is_parent {
            continue;
        }
        match (shape.key, shape.value) {
            (Some(key), Some("")) => {
                path.push(PathSegment::Key(key.to_string()));
                column = shape.content;
                after_item = false;
                if let Some(dash) = shape.dash {
                    path.push(PathSegment::Index(0));
                    column = dash;
                    after_item = true;
                }
            }
            _ => return None,
        }
    }
    path.reverse();
    Some(path)
}

/// Value of `key` in the mapping whose keys sit at `column` around `line`.
fn sibling_value<'a>(lines: &[&'a str], line: usize, column: usize, key: &str) -> Option<&'a str> {
    let line = line.min(lines.len());
    let matches = |candidate: &&'a str| {
        let shape = line_shape(*candidate);
        (shape.content == column && shape.key == Some(key))
            .then(|| shape.value.map(str::trim))
            .flatten()
    };
    let in_block = |candidate: &&&'a str| {
        is_blank(candidate) || {
            let shape = line_shape(candidate);
            shape.content >= column && !(shape.dash.is_some() && shape.content == column)
        }
    };
    let above = lines[..line]
        .iter()
        .rev()
        .take_while(|candidate| {
            let shape = line_shape(candidate);
            is_blank(candidate) || shape.content >= column || shape.dash == Some(column)
        })
        .find_map(matches);
    let below = || {
        lines
            .get(line + 1..)
            .unwrap_or_default()
            .iter()
            .take_while(in_block)
            .find_map(matches)
    };
    above.or_else(below).filter(|value| !value.is_empty())
}

fn document_kind(lines: &[&str], line: usize) -> Option<ResourceKind> {
    let line = line.min(lines.len());
    let start = lines[..line]
        .iter()
        .rposition(|candidate| candidate.trim() == "---")
        .map(|idx| idx + 1)
        .unwrap_or(0);
    lines[start..]
        .iter()
        .take_while(|candidate| candidate.trim() != "---")
        .find_map(|candidate| candidate.strip_prefix("kind:"))
        .and_then(|kind| ResourceKind::parse(kind.trim()))
}

fn last_key(path: &[PathSegment]) -> Option<&str> {
    path.iter().rev().find_map(|segment| match segment {
        PathSegment::Key(key) => Some(key.as_str()),
        PathSegment::Index(_) => None,
    })
}

/// Kinds a `kind:` field at `path` may name, if it names a Koreo kind at all.
fn reference_kinds(path: &[PathSegment]) -> Option<Vec<ResourceKind>> {
    let all = ResourceKind::ALL.to_vec();
    match last_key(path) {
        None => Some(all),
        Some("ref" | "cases") => Some(
            all.into_iter()
                .filter(|kind| kind.is_step_logic())
                .collect(),
        ),
        Some("functionRef") => Some(all.into_iter().filter(|kind| kind.is_function()).collect()),
        Some("overlayRef") => Some(vec![ResourceKind::ValueFunction]),
        Some(_) => None,
    }
}

fn kind_completions(path: &[PathSegment]) -> Vec<CompletionCandidate> {
    reference_kinds(path)
        .unwrap_or_default()
        .into_iter()
        .map(|kind| CompletionCandidate::new(kind.as_str(), CompletionItemKind::CLASS).with_detail("Koreo kind"))
        .collect()
}

fn name_completions(
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    kind: ResourceKind,
) -> Vec<CompletionCandidate> {
    let names: BTreeSet<String> = workspace
        .names_of_kind(kind)
        .into_iter()
        .chain(
            analysis
                .resources
                .iter()
                .filter(|resource| resource.kind == kind)
                .map(|resource| resource.name.clone()),
        )
        .collect();
    names
        .into_iter()
        .map(|name| CompletionCandidate::new(name, CompletionItemKind::REFERENCE).with_detail(kind.as_str()))
        .collect()
}

fn field_completions(source: &str, position: Position, path: &[PathSegment]) -> Vec<CompletionCandidate> {
    let lines: Vec<&str> = source.lines().collect();
    let kind = document_kind(&lines, position.line);
    let Some(rule) = mapping_at(kind, path) else {
        return Vec::new();
    };
    rule.fields
        .iter()
        .map(|field| {
            let detail = if field.required {
                format!("{} (required)", field.doc)
            } else {
                field.doc.to_string()
            };
            CompletionCandidate::new(field.name, CompletionItemKind::FIELD)
                .with_detail(detail)
                .with_insert_text(format!("{}: ", field.name))
        })
        .collect()
}

fn expression_completions(
    analysis: &DocumentAnalysis,
    position: Position,
    prefix: &str,
) -> Vec<CompletionCandidate> {
    let before_word = prefix.trim_end_matches(|c: char| c.is_ascii_alphanumeric() || c == '_');
    let labels = visible_steps(analysis, position);

    if before_word.ends_with("steps.") || before_word.ends_with("${") {
        return labels
            .into_iter()
            .map(|label| CompletionCandidate::new(label, CompletionItemKind::VARIABLE).with_detail("workflow step"))
            .collect();
    }
    if before_word.ends_with('.') {
        return METHODS
            .iter()
            .map(|(name, signature)| {
                CompletionCandidate::new(*name, CompletionItemKind::METHOD).with_detail(*signature)
            })
            .collect();
    }

    let mut items: Vec<CompletionCandidate> = FUNCTIONS
        .iter()
        .map(|(name, signature)| {
            CompletionCandidate::new(*name, CompletionItemKind::FUNCTION)
                .with_detail(*signature)
                .with_insert_text(format!("{name}("))
        })
        .collect();
    items.extend(
        ROOTS
            .iter()
            .map(|(name, detail)| CompletionCandidate::new(*name, CompletionItemKind::VARIABLE).with_detail(*detail)),
    );
    items.extend(
        KEYWORDS
            .iter()
            .map(|keyword| CompletionCandidate::new(*keyword, CompletionItemKind::KEYWORD)),
    );
    items.extend(labels.into_iter().map(|label| {
        CompletionCandidate::new(format!("steps.{label}"), CompletionItemKind::VARIABLE)
            .with_detail("workflow step")
    }));
    items
}

/// Labels of steps declared before the step containing `position`.
fn visible_steps(analysis: &DocumentAnalysis, position: Position) -> Vec<String> {
    let Some(resource) = analysis.resource_at(position) else {
        return Vec::new();
    };
    let steps = resource.steps();
    let Some(current) = step_at(steps, position) else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    steps[..current]
        .iter()
        .filter(|step| seen.insert(step.label.clone()))
        .map(|step| step.label.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::analyze_document;
    use crate::test_support::{position_of, sample_analysis, sample_source, sample_workspace};

    fn labels(items: &[CompletionCandidate]) -> Vec<&str> {
        items.iter().map(|item| item.label.as_str()).collect()
    }

    fn complete_sample(needle: &str, occurrence: usize, offset: usize) -> Vec<CompletionCandidate> {
        let source = sample_source();
        completion_items(
            source,
            sample_analysis(),
            sample_workspace(),
            position_of(source, needle, occurrence, offset),
        )
    }

    #[test]
    fn expression_offers_builtins_roots_and_earlier_steps() {
        let items = complete_sample("=${build.image_url}", 0, 1);
        let labels = labels(&items);
        assert!(labels.contains(&"sum"));
        assert!(labels.contains(&"inputs"));
        assert!(labels.contains(&"true"));
        assert!(labels.contains(&"steps.build"));
        assert!(!labels.contains(&"steps.deploy"));
        let sum = items.iter().find(|item| item.label == "sum").unwrap();
        assert_eq!(sum.detail.as_deref(), Some("sum(list) -> number"));
    }

    #[test]
    fn first_step_sees_no_labels() {
        let items = complete_sample("repository: registry", 1, 12);
        assert!(items.is_empty(), "value position is not a completion context");
        let source = "apiVersion: koreo.dev/v1beta1\nkind: Workflow\nmetadata:\n  name: w\nspec:\n  steps:\n    - label: a\n      ref:\n        kind: ValueFunction\n        name: f\n      inputs:\n        x: =steps.\n";
        let analysis = analyze_document(source);
        let position = position_of(source, "=steps.", 0, 7);
        let items = completion_items(source, &analysis, &WorkspaceSymbols::default(), position);
        assert!(items.is_empty());
    }

    #[test]
    fn step_prefix_offers_only_labels() {
        let items = complete_sample("=steps.build.tag", 0, 7);
        assert_eq!(labels(&items), vec!["build"]);
    }

    #[test]
    fn member_access_offers_methods() {
        let items = complete_sample("inputs.version", 0, 7);
        assert!(labels(&items).contains(&"startsWith"));
        assert!(!labels(&items).contains(&"inputs"));
    }

    #[test]
    fn kind_and_name_after_reference_keys() {
        let kinds = complete_sample("kind: ResourceFunction", 1, 6);
        assert_eq!(
            labels(&kinds),
            vec!["ValueFunction", "ResourceFunction", "Workflow"]
        );
        let top = complete_sample("kind: ValueFunction", 0, 6);
        assert_eq!(top.len(), 4);
        let api_kind = complete_sample("kind: Deployment", 0, 6);
        assert!(api_kind.is_empty());

        let names = complete_sample("name: deployment", 1, 6);
        assert_eq!(labels(&names), vec!["deployment"]);
        let test_ref = complete_sample("name: build-image", 3, 6);
        assert_eq!(labels(&test_ref), vec!["build-image"]);
        let metadata = complete_sample("name: release", 0, 6);
        assert!(metadata.is_empty());
    }

    #[test]
    fn field_names_follow_the_schema() {
        let source = "apiVersion: koreo.dev/v1beta1\nkind: Workflow\nmetadata:\n  name: w\nspec:\n  steps:\n    - label: a\n      re\n";
        let analysis = analyze_document(source);
        let position = position_of(source, "      re", 0, 8);
        let items = completion_items(source, &analysis, &WorkspaceSymbols::default(), position);
        let labels = labels(&items);
        assert!(labels.contains(&"ref"));
        assert!(labels.contains(&"refSwitch"));
        assert!(labels.contains(&"skipIf"));
        let label = items.iter().find(|item| item.label == "label").unwrap();
        assert!(label.detail.as_deref().unwrap().contains("required"));
        assert_eq!(
            items.iter().find(|item| item.label == "ref").unwrap().insert_text.as_deref(),
            Some("ref: ")
        );
    }

    #[test]
    fn top_level_fields() {
        let source = "api";
        let analysis = analyze_document(source);
        let items = completion_items(source, &analysis, &WorkspaceSymbols::default(), Position::new(0, 3));
        assert!(labels(&items).contains(&"apiVersion"));
        assert!(labels(&items).contains(&"spec"));
    }

    #[test]
    fn recovers_paths_from_indentation() {
        let lines = vec!["spec:", "  steps:", "    - label: a", "      ref:", "        ki"];
        assert_eq!(
            enclosing_path(&lines, 4, 8, false),
            Some(vec![
                PathSegment::Key("spec".into()),
                PathSegment::Key("steps".into()),
                PathSegment::Index(0),
                PathSegment::Key("ref".into()),
            ])
        );
        let flush = vec!["spec:", "  steps:", "  - label: a", "    ref:"];
        assert_eq!(
            enclosing_path(&flush, 3, 4, false),
            Some(vec![
                PathSegment::Key("spec".into()),
                PathSegment::Key("steps".into()),
                PathSegment::Index(0),
            ])
        );
        let next_item = vec!["spec:", "  steps:", "    - label: a", "    - "];
        assert_eq!(
            enclosing_path(&next_item, 3, 4, true),
            Some(vec![
                PathSegment::Key("spec".into()),
                PathSegment::Key("steps".into()),
            ])
        );
    }
}
