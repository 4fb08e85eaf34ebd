//! Property tests for command tokenization.

use core_runtime::parse_quoted_arguments;
use proptest::prelude::*;

proptest! {
    // Re-joining with single spaces reproduces the input for quote-free
    // commands (multi-space runs survive as empty tokens).
    #[test]
    fn tokenize_then_join_is_identity_without_quotes(cmd in "[a-zA-Z0-9_. -]{0,60}") {
        let tokens = parse_quoted_arguments(&cmd);
        prop_assert_eq!(tokens.join(" "), cmd);
    }

    // Balanced double quotes group their content into a single token.
    #[test]
    fn balanced_quotes_group(inner in "[a-z]{1,5}( [a-z]{1,5}){0,3}") {
        let cmd = format!("cmd \"{inner}\" tail");
        let tokens = parse_quoted_arguments(&cmd);
        prop_assert_eq!(tokens, vec!["cmd".to_string(), inner, "tail".to_string()]);
    }
}

#[test]
fn single_quotes_behave_like_double_quotes() {
    assert_eq!(
        parse_quoted_arguments("a 'b c' d"),
        vec!["a", "b c", "d"]
    );
}
