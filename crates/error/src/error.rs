//! The [`UmbraError`] struct and its [`ErrorKind`] taxonomy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Closed set of error categories.
///
/// Kinds are tagged variants, not a class hierarchy: a `match` on the kind is
/// the supported way to branch on failure class. Each variant's `Display`
/// form is the single-line headline shown to users; suggestions are rendered
/// separately by [`UmbraError::render`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The secret does not exist in the backend. A normal, expected outcome.
    #[error("secret not found: '{key}' in store '{store}'")]
    NotFound {
        /// Store or provider name.
        store: String,
        /// The key or path that was looked up.
        key: String,
    },

    /// Authentication or authorization was refused by the backend.
    #[error("authentication failed for store '{store}': {message}")]
    Auth {
        /// Store or provider name.
        store: String,
        /// Backend-supplied refusal message.
        message: String,
    },

    /// The request itself is malformed (bad reference, missing field, ...).
    #[error("validation error: {message}")]
    Validation {
        /// Store the request was addressed to, when known.
        store: Option<String>,
        /// What is wrong.
        message: String,
        /// The offending field, when the problem is field-scoped.
        field: Option<String>,
        /// The offending value, when safe to echo.
        value: Option<String>,
    },

    /// A static configuration problem.
    #[error("configuration error in '{field}': {message}")]
    Config {
        /// Configuration field path.
        field: String,
        /// The configured value, when safe to echo.
        value: Option<String>,
        /// What is wrong.
        message: String,
        /// How to fix it.
        suggestion: Option<String>,
    },

    /// An external process invocation failed.
    #[error("command '{command}' failed: {message}")]
    Command {
        /// The binary that was invoked.
        command: String,
        /// Exit code, when the process ran at all.
        exit_code: Option<i32>,
        /// Captured failure output or spawn error.
        message: String,
        /// How to fix it.
        suggestion: Option<String>,
    },

    /// An error that surfaces cleanly to humans, already phrased for them.
    #[error("{message}")]
    User {
        /// Headline message.
        message: String,
        /// Extra context shown below the headline.
        details: Option<String>,
        /// How to fix it.
        suggestion: Option<String>,
    },

    /// A backend-origin failure wrapped with provider context. The original
    /// error lives on the [`source`](std::error::Error::source) chain.
    #[error("provider '{name}' failed during {operation}")]
    Provider {
        /// Provider name.
        name: String,
        /// The operation that failed (`resolve`, `describe`, ...).
        operation: String,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// The operation that was interrupted.
        operation: String,
    },

    /// The operation's deadline elapsed.
    #[error("operation timed out after {elapsed:?}: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// How long it ran before the deadline fired.
        elapsed: Duration,
    },
}

/// The error type returned by every fallible umbra operation.
///
/// Wraps an [`ErrorKind`] plus an optional source error (populated by the
/// `Provider` kind and by [`with_source`](Self::with_source)). Cloneable so
/// rotation results can carry their failure alongside the audit trail.
#[derive(Clone)]
pub struct UmbraError {
    kind: ErrorKind,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    /// Explicit retryability override; `None` falls back to pattern matching.
    retryable: Option<bool>,
}

impl UmbraError {
    /// Wrap a kind with no source.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            retryable: None,
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Attach an underlying cause, preserved on the `source()` chain.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attach or replace the suggestion on kinds that carry one.
    ///
    /// No-op for kinds without a suggestion slot.
    pub fn with_suggestion(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        match &mut self.kind {
            ErrorKind::Config { suggestion, .. }
            | ErrorKind::Command { suggestion, .. }
            | ErrorKind::User { suggestion, .. } => *suggestion = Some(hint),
            _ => {}
        }
        self
    }

    /// Force the retryability classification instead of pattern matching.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// The suggestion attached to this error, if any.
    pub fn suggestion(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Config { suggestion, .. }
            | ErrorKind::Command { suggestion, .. }
            | ErrorKind::User { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }

    /// Full user-facing rendering: the headline plus, when present, an
    /// indented `💡` suggestion line and `User` details.
    pub fn render(&self) -> String {
        let mut out = self.to_string();
        if let ErrorKind::User {
            details: Some(details),
            ..
        } = &self.kind
        {
            out.push_str("\n  ");
            out.push_str(details);
        }
        if let Some(hint) = self.suggestion() {
            out.push_str("\n  💡 ");
            out.push_str(hint);
        }
        out
    }

    /// True when this error is worth retrying.
    ///
    /// Request-shaped failures (`NotFound`, `Auth`, `Validation`, `Config`,
    /// `User`) are never retryable. `Timeout` always is. Everything else is
    /// classified by an explicit override set at construction (HTTP 5xx) or,
    /// failing that, by matching the message text of the whole error chain
    /// against a closed list of transient patterns.
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            ErrorKind::NotFound { .. }
            | ErrorKind::Auth { .. }
            | ErrorKind::Validation { .. }
            | ErrorKind::Config { .. }
            | ErrorKind::User { .. }
            | ErrorKind::Cancelled { .. } => false,
            ErrorKind::Timeout { .. } => true,
            _ => self
                .retryable
                .unwrap_or_else(|| crate::retry::matches_transient(&self.chain_text())),
        }
    }

    /// Concatenated `Display` of this error and every source below it.
    pub fn chain_text(&self) -> String {
        let mut text = self.to_string();
        let mut source: Option<&(dyn std::error::Error + 'static)> =
            self.source.as_deref().map(|s| s as _);
        while let Some(err) = source {
            text.push_str(": ");
            text.push_str(&err.to_string());
            source = err.source();
        }
        text
    }

    // ── Convenience constructors ────────────────────────────────────────────

    /// A `NotFound` error for `key` in `store`.
    pub fn not_found(store: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound {
            store: store.into(),
            key: key.into(),
        })
    }

    /// An `Auth` error for `store`.
    pub fn auth(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth {
            store: store.into(),
            message: message.into(),
        })
    }

    /// A bare `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation {
            store: None,
            message: message.into(),
            field: None,
            value: None,
        })
    }

    /// A `Validation` error scoped to a store and field.
    pub fn validation_field(
        store: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::Validation {
            store: Some(store.into()),
            message: message.into(),
            field: Some(field.into()),
            value: None,
        })
    }

    /// A `Config` error for a configuration field.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config {
            field: field.into(),
            value: None,
            message: message.into(),
            suggestion: None,
        })
    }

    /// A `Command` error for a failed process.
    pub fn command(
        command: impl Into<String>,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::Command {
            command: command.into(),
            exit_code,
            message: message.into(),
            suggestion: None,
        })
    }

    /// A `User` error with a human-phrased headline.
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User {
            message: message.into(),
            details: None,
            suggestion: None,
        })
    }

    /// A `Provider` error wrapping a backend failure as its source.
    pub fn provider(
        name: impl Into<String>,
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::new(ErrorKind::Provider {
            name: name.into(),
            operation: operation.into(),
        })
        .with_source(source)
    }

    /// A `Cancelled` error for `operation`.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled {
            operation: operation.into(),
        })
    }

    /// A `Timeout` error for `operation` after `elapsed`.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(ErrorKind::Timeout {
            operation: operation.into(),
            elapsed,
        })
    }
}

impl fmt::Display for UmbraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, self.source.as_deref()) {
            // Provider headlines carry the cause inline; the structured chain
            // stays available through source().
            (ErrorKind::Provider { .. }, Some(cause)) => {
                write!(f, "{}: {cause}", self.kind)
            }
            _ => self.kind.fmt(f),
        }
    }
}

impl fmt::Debug for UmbraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UmbraError")
            .field("kind", &self.kind)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl std::error::Error for UmbraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|s| s as _)
    }
}

impl From<ErrorKind> for UmbraError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_headline_names_store_and_key() {
        let err = UmbraError::not_found("vault", "db/creds");
        assert_eq!(
            err.to_string(),
            "secret not found: 'db/creds' in store 'vault'"
        );
    }

    #[test]
    fn provider_wraps_cause_on_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = UmbraError::provider("vault", "resolve", io);
        assert!(matches!(err.kind(), ErrorKind::Provider { .. }));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn render_appends_suggestion_line() {
        let err = UmbraError::config("secret_stores.vault.address", "missing address")
            .with_suggestion("set address or export VAULT_ADDR");
        let rendered = err.render();
        let mut lines = rendered.lines();
        assert_eq!(
            lines.next().unwrap(),
            "configuration error in 'secret_stores.vault.address': missing address"
        );
        assert_eq!(
            lines.next().unwrap(),
            "  💡 set address or export VAULT_ADDR"
        );
    }

    #[test]
    fn auth_is_never_retryable_even_with_transient_text() {
        let err = UmbraError::auth("vault", "rate limit exceeded during login");
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_is_always_retryable() {
        let err = UmbraError::timeout("resolve", Duration::from_secs(30));
        assert!(err.is_retryable());
    }

    #[test]
    fn provider_5xx_override_wins() {
        let io = std::io::Error::other("status 503");
        let err = UmbraError::provider("infisical", "resolve", io).with_retryable(true);
        assert!(err.is_retryable());
    }

    #[test]
    fn chain_text_includes_every_level() {
        let inner = std::io::Error::other("broken pipe");
        let err = UmbraError::provider("doppler", "resolve", inner);
        let text = err.chain_text();
        assert!(text.contains("doppler"));
        assert!(text.contains("broken pipe"));
    }
}
