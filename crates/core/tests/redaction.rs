//! Redaction must survive error wrapping.
//!
//! A secret interpolated into a message is redacted at interpolation time,
//! so no amount of wrapping afterwards can re-expand it.

use umbra_core::{SecretString, redacted};
use umbra_error::UmbraError;

#[test]
fn wrapped_error_keeps_secret_redacted() {
    // Base error carries a secret fragment through the redaction wrapper.
    let base = UmbraError::auth(
        "vault",
        format!("login failed: {}", redacted("hunter2")),
    );
    // Wrap it the way a backend wraps its causes.
    let wrapped = UmbraError::provider("vault", "read", base);

    let text = wrapped.chain_text();
    assert!(text.contains("[REDACTED]"), "rendered: {text}");
    assert!(!text.contains("hunter2"), "leaked plaintext: {text}");

    let rendered = wrapped.render();
    assert!(!rendered.contains("hunter2"), "leaked plaintext: {rendered}");
}

#[test]
fn secret_string_redacts_through_every_formatting_surface() {
    let secret = SecretString::new("correct horse battery staple");

    for formatted in [
        format!("{secret}"),
        format!("{secret:?}"),
        format!("{secret:>40}"),
        serde_json::to_string(&secret).unwrap(),
    ] {
        assert!(formatted.contains("[REDACTED]"), "surface output: {formatted}");
        assert!(
            !formatted.contains("horse"),
            "surface leaked plaintext: {formatted}"
        );
    }
}

#[test]
fn reveal_is_the_only_way_in() {
    let secret = SecretString::new("tok_abc123");
    let fingerprint = secret.expose(|s| s.len());
    assert_eq!(fingerprint, 10);
}
