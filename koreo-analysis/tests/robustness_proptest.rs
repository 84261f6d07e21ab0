use koreo_analysis::diagnostics::analyze_document;
use koreo_analysis::expression::lexer::{tokenize, TokenKind};
use koreo_analysis::semantic_tokens::collect_semantic_tokens;
use proptest::prelude::*;

fn expression_like() -> impl Strategy<Value = String> {
    let pieces = prop::sample::select(vec![
        "inputs", "locals.total", ".", "value", " ", "*", "+", "==", "&&", "(", ")", "[", "]",
        "{", "}", ",", ":", "?", "2", "3.14159", "1e", "0x1F", "'text'", "\"esc\\n\"", "\"open",
        "${build.url}", "${", "has", "size", "true", "null", "#", "@", "é", "\\",
    ]);
    prop::collection::vec(pieces, 0..24).prop_map(|parts| parts.concat())
}

fn document_like() -> impl Strategy<Value = String> {
    let lines = prop::sample::select(vec![
        "apiVersion: koreo.dev/v1beta1",
        "kind: ValueFunction",
        "kind: ResourceFunction",
        "kind: Workflow",
        "kind: FunctionTest",
        "metadata:",
        "  name: fuzz",
        "spec:",
        "  locals:",
        "    a: =inputs.x * 2",
        "  return:",
        "    b: =locals.a + ${step.value}",
        "  steps:",
        "    - label: step",
        "      ref: {kind: ValueFunction, name: fuzz}",
        "  testCases:",
        "    - expectReturn: {b: 4}",
        "      variant: true",
        "---",
        "  [unbalanced",
        "\tkey: \"open",
    ]);
    prop::collection::vec(lines, 0..20).prop_map(|lines| lines.join("\n"))
}

proptest! {
    #[test]
    fn tokenizer_covers_input_in_order(body in prop_oneof![expression_like(), "\\PC*"]) {
        let lexed = tokenize(&body);
        let mut previous_end = 0;
        for token in &lexed.tokens {
            prop_assert!(token.start >= previous_end);
            prop_assert!(token.start < token.end);
            prop_assert!(token.end <= body.len());
            prop_assert_eq!(body.get(token.start..token.end), Some(token.lexeme.as_str()));
            previous_end = token.end;
        }
        for error in &lexed.errors {
            prop_assert!(error.start <= error.end && error.end <= body.len());
        }
    }

    #[test]
    fn tokenizer_is_deterministic(body in expression_like()) {
        prop_assert_eq!(tokenize(&body), tokenize(&body));
    }

    #[test]
    fn unexpected_characters_are_reported_and_skipped(
        prefix in "[a-z]{1,8}",
        bad in prop::sample::select(vec!['#', '@', '`', '~']),
        suffix in "[a-z]{1,8}",
    ) {
        let body = format!("{prefix} {bad} {suffix}");
        let lexed = tokenize(&body);
        prop_assert_eq!(lexed.errors.len(), 1);
        prop_assert_eq!(lexed.tokens.len(), 3);
        prop_assert_eq!(lexed.tokens[1].kind, TokenKind::Error);
        prop_assert_eq!(lexed.tokens[2].lexeme.as_str(), suffix.as_str());
    }

    #[test]
    fn analysis_never_panics(text in prop_oneof![document_like(), "\\PC*"]) {
        let analysis = analyze_document(&text);
        for diagnostic in &analysis.diagnostics {
            prop_assert!(diagnostic.range.span.end <= text.len());
        }
        let tokens = collect_semantic_tokens(&analysis);
        for pair in tokens.windows(2) {
            prop_assert!(pair[0].range.span.end <= pair[1].range.span.start);
        }
    }
}
