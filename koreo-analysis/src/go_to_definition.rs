use lsp_types::Url;

use crate::diagnostics::DocumentAnalysis;
use crate::model::SymbolId;
use crate::source::{Position, Range};
use crate::workspace::WorkspaceSymbols;

/// A range in a specific document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub uri: Url,
    pub range: Range,
}

impl Location {
    pub fn new(uri: Url, range: Range) -> Self {
        Self { uri, range }
    }
}

/// The symbol defined or referenced at `position`.
pub fn symbol_at(analysis: &DocumentAnalysis, position: Position) -> Option<&SymbolId> {
    let anchor = analysis
        .index
        .innermost_matching(position, |anchor| anchor.symbol.is_some() || anchor.target.is_some())?;
    anchor.target.as_ref().or(anchor.symbol.as_ref())
}

/// Step labels resolve within their workflow; resource names resolve in this
/// document first, then across the workspace.
pub fn goto_definition(
    uri: &Url,
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    position: Position,
) -> Vec<Location> {
    let Some(symbol) = symbol_at(analysis, position) else {
        return Vec::new();
    };
    let mut locations = definition_locations(uri, analysis, workspace, symbol);
    dedup_locations(&mut locations);
    locations
}

pub(crate) fn definition_locations(
    uri: &Url,
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    symbol: &SymbolId,
) -> Vec<Location> {
    let mut locations: Vec<Location> = analysis
        .index
        .definition(symbol)
        .map(|range| Location::new(uri.clone(), range.clone()))
        .into_iter()
        .collect();
    if matches!(symbol, SymbolId::Resource { .. }) {
        locations.extend(
            workspace
                .locations(symbol)
                .into_iter()
                .filter(|(other, _)| other != uri)
                .map(|(other, range)| Location::new(other, range)),
        );
    }
    locations
}

pub(crate) fn dedup_locations(locations: &mut Vec<Location>) {
    locations.sort_by(|a, b| {
        (a.uri.as_str(), a.range.span.start, a.range.span.end).cmp(&(
            b.uri.as_str(),
            b.range.span.start,
            b.range.span.end,
        ))
    });
    locations.dedup_by(|a, b| a.uri == b.uri && a.range.span == b.range.span);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::analyze_document;
    use crate::test_support::{position_of, sample_analysis, sample_source, sample_uri, sample_workspace};

    #[test]
    fn step_references_resolve_to_their_label() {
        let source = sample_source();
        let position = position_of(source, "${build.image_url}", 0, 3);
        let locations = goto_definition(&sample_uri(), sample_analysis(), sample_workspace(), position);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range.start, position_of(source, "label: build", 0, 7));

        let dotted = position_of(source, "=steps.build.tag", 0, 8);
        let locations = goto_definition(&sample_uri(), sample_analysis(), sample_workspace(), dotted);
        assert_eq!(locations[0].range.start, position_of(source, "label: build", 0, 7));
    }

    #[test]
    fn resource_references_resolve_in_document() {
        let source = sample_source();
        let position = position_of(source, "name: deployment", 1, 7);
        let locations = goto_definition(&sample_uri(), sample_analysis(), sample_workspace(), position);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range.start, position_of(source, "name: deployment", 0, 6));
    }

    #[test]
    fn resource_references_resolve_across_documents() {
        let test = "apiVersion: koreo.dev/v1beta1\nkind: FunctionTest\nmetadata:\n  name: other\nspec:\n  functionRef:\n    kind: ResourceFunction\n    name: deployment\n";
        let uri = Url::parse("file:///workspace/other.yaml").unwrap();
        let analysis = analyze_document(test);
        let position = position_of(test, "name: deployment", 0, 8);
        let locations = goto_definition(&uri, &analysis, sample_workspace(), position);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].uri, sample_uri());
    }

    #[test]
    fn plain_text_has_no_definition() {
        let position = position_of(sample_source(), "apiVersion: apps/v1", 0, 14);
        assert!(goto_definition(&sample_uri(), sample_analysis(), sample_workspace(), position).is_empty());
    }
}
