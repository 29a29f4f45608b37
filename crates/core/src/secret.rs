//! Secret value wrapper with automatic zeroization and redacted formatting.
//!
//! [`SecretString`] is the only public surface for secret bytes in umbra:
//! every formatting path (`Debug`, `Display`, `Serialize`) emits the literal
//! `[REDACTED]`, plaintext is reachable only through the closure-scoped
//! [`expose`](SecretString::expose), equality is constant-time, and memory is
//! zeroed on drop. Because redaction happens at interpolation time, a message
//! built with a `SecretString` stays redacted through any amount of error
//! wrapping afterwards.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The fixed string every formatting surface emits.
pub const REDACTED: &str = "[REDACTED]";

/// Secret string with closure-scoped access and automatic zeroization.
///
/// # Examples
///
/// ```
/// use umbra_core::SecretString;
///
/// let secret = SecretString::new("hunter2");
/// assert_eq!(format!("{secret}"), "[REDACTED]");
/// assert_eq!(format!("{secret:?}"), "[REDACTED]");
/// let len = secret.expose(|s| s.len());
/// assert_eq!(len, 7);
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    /// Wrap a string-like value.
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self { inner: s.into() }
    }

    /// Access the plaintext within a closure scope.
    ///
    /// The borrow cannot escape the closure, which keeps accidental copies
    /// out of logs and error messages. Call sites are grep-able.
    pub fn expose<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        f(&self.inner)
    }

    /// Length in bytes without exposing content.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when the wrapped value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

// Constant-time comparison over the raw bytes; length leaks, content does not.
impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.inner.as_bytes().ct_eq(other.inner.as_bytes()).into()
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for SecretString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretString::new)
    }
}

/// Wrap any displayable value so it formats as `[REDACTED]`.
///
/// The helper for log and error sites that interpolate provider-returned or
/// user-supplied values classified as sensitive:
///
/// ```
/// use umbra_core::redacted;
///
/// let token = "s.1234567890";
/// let msg = format!("login failed for token {}", redacted(token));
/// assert!(!msg.contains("1234567890"));
/// ```
pub fn redacted(value: impl fmt::Display) -> SecretString {
    SecretString::new(value.to_string())
}

/// A resolved secret: plaintext plus the non-secret envelope a store returns.
#[derive(Debug, Clone)]
pub struct Secret {
    /// The plaintext, behind the redaction wrapper.
    pub value: SecretString,
    /// Backend version identifier, when the store versions.
    pub version: Option<String>,
    /// Last modification time, when the store reports one.
    pub updated_at: Option<DateTime<Utc>>,
    /// Non-secret descriptive metadata.
    pub metadata: BTreeMap<String, String>,
}

impl Secret {
    /// Wrap a plaintext value with an empty envelope.
    pub fn new(value: impl Into<SecretString>) -> Self {
        Self {
            value: value.into(),
            version: None,
            updated_at: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Return a copy with `version` set.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Return a copy with `updated_at` set.
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Return a copy with an extra metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_redact() {
        let secret = SecretString::new("super_secret_password");
        assert_eq!(format!("{secret:?}"), REDACTED);
        assert_eq!(format!("{secret}"), REDACTED);
    }

    #[test]
    fn serialize_redacts() {
        let secret = SecretString::new("should_not_leak");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn deserialize_keeps_plaintext() {
        let secret: SecretString = serde_json::from_str("\"from_wire\"").unwrap();
        secret.expose(|s| assert_eq!(s, "from_wire"));
    }

    #[test]
    fn equality_is_by_content() {
        let a = SecretString::new("same");
        let b = SecretString::new("same");
        let c = SecretString::new("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn redacted_helper_survives_format_interpolation() {
        let msg = format!("login failed: {}", redacted("hunter2"));
        assert_eq!(msg, "login failed: [REDACTED]");
        assert!(!msg.contains("hunter2"));
    }

    #[test]
    fn secret_envelope_keeps_metadata_out_of_the_value() {
        let secret = Secret::new("p@ss")
            .with_version("3")
            .with_metadata("engine", "kv");
        assert_eq!(secret.version.as_deref(), Some("3"));
        assert_eq!(format!("{:?}", secret.value), REDACTED);
        // Debug of the whole envelope must not leak the plaintext either.
        let debugged = format!("{secret:?}");
        assert!(debugged.contains(REDACTED));
        assert!(!debugged.contains("p@ss"));
    }
}
