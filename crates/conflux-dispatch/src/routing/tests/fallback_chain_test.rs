//! Tests for fallback chains.

use super::super::fallback::FallbackChain;

#[test]
fn test_fallback_chain_creation() {
    let chain = FallbackChain::new(["primary", "secondary", "tertiary"]);

    assert_eq!(chain.len(), 3);
    assert!(!chain.is_empty());
    assert_eq!(chain.iter().collect::<Vec<_>>(), vec!["primary", "secondary", "tertiary"]);
}

#[test]
fn test_empty_chain() {
    let chain = FallbackChain::default();
    assert!(chain.is_empty());
    assert_eq!(chain.next_untried(&[]), None);
}

#[test]
fn test_then_appends() {
    let chain = FallbackChain::new(["a"]).then("b").then("c");
    assert_eq!(chain.len(), 3);
}

#[test]
fn test_next_untried_skips_attempted_backends() {
    let chain = FallbackChain::new(["a", "b", "c"]);

    assert_eq!(chain.next_untried(&[]), Some("a"));
    assert_eq!(chain.next_untried(&["a".to_string()]), Some("b"));
    assert_eq!(chain.next_untried(&["b".to_string(), "a".to_string()]), Some("c"));
    assert_eq!(
        chain.next_untried(&["a".to_string(), "b".to_string(), "c".to_string()]),
        None
    );
}
