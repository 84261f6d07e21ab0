use lsp_types::Url;

use crate::diagnostics::DocumentAnalysis;
use crate::go_to_definition::{dedup_locations, definition_locations, symbol_at, Location};
use crate::model::SymbolId;
use crate::source::Position;
use crate::workspace::WorkspaceSymbols;

pub fn find_references(
    uri: &Url,
    analysis: &DocumentAnalysis,
    workspace: &WorkspaceSymbols,
    position: Position,
    include_declaration: bool,
) -> Vec<Location> {
    let Some(symbol) = symbol_at(analysis, position) else {
        return Vec::new();
    };

    let mut locations = Vec::new();
    if include_declaration {
        locations.extend(definition_locations(uri, analysis, workspace, symbol));
    }
    locations.extend(
        analysis
            .index
            .references(symbol)
            .iter()
            .map(|range| Location::new(uri.clone(), range.clone())),
    );
    if matches!(symbol, SymbolId::Resource { .. }) {
        locations.extend(
            workspace
                .references(symbol)
                .into_iter()
                .filter(|(other, _)| other != uri)
                .map(|(other, range)| Location::new(other, range)),
        );
    }
    dedup_locations(&mut locations);
    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{position_of, sample_analysis, sample_source, sample_uri, sample_workspace};

    #[test]
    fn step_label_lists_every_mention() {
        let source = sample_source();
        let position = position_of(source, "label: build", 0, 8);
        let references = find_references(&sample_uri(), sample_analysis(), sample_workspace(), position, false);
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].range.start, position_of(source, "build.image_url", 0, 0));

        let with_declaration =
            find_references(&sample_uri(), sample_analysis(), sample_workspace(), position, true);
        assert_eq!(with_declaration.len(), 3);
        assert_eq!(with_declaration[0].range.start, position_of(source, "label: build", 0, 7));
    }

    #[test]
    fn function_name_lists_workflow_and_test_references() {
        let source = sample_source();
        let position = position_of(source, "name: build-image", 0, 8);
        let references = find_references(&sample_uri(), sample_analysis(), sample_workspace(), position, false);
        let lines: Vec<usize> = references.iter().map(|location| location.range.start.line).collect();
        assert_eq!(
            lines,
            vec![
                position_of(source, "name: build-image", 1, 0).line,
                position_of(source, "name: build-image", 3, 0).line,
            ]
        );
    }

    #[test]
    fn nothing_under_cursor_yields_nothing() {
        let position = position_of(sample_source(), "replicas: 2", 0, 11);
        assert!(find_references(&sample_uri(), sample_analysis(), sample_workspace(), position, true).is_empty());
    }
}
