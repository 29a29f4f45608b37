//! Umbra error taxonomy
//!
//! Every fallible operation in the engine returns [`UmbraError`], a single
//! structured error type wrapping one of a closed set of [`ErrorKind`]s.
//! Backends, the resolver and the rotation engine all speak this taxonomy so
//! callers can match on kinds instead of parsing message text.
//!
//! Three helpers cover the cross-cutting policies:
//!
//! - [`UmbraError::is_retryable`] classifies transient failures for retry
//!   wrappers; the engine itself never retries implicitly.
//! - [`simplify`] converts well-known opaque runtime errors (YAML/JSON parse
//!   failures, `permission denied`, ...) into user-facing kinds with curated
//!   suggestions.
//! - [`wrap_command_not_found`] attaches an install hint when an external CLI
//!   binary is missing.
//!
//! # Example
//!
//! ```
//! use umbra_error::UmbraError;
//!
//! let err = UmbraError::not_found("vault", "db/creds");
//! assert!(!err.is_retryable());
//! assert!(err.to_string().contains("db/creds"));
//! ```

mod error;
mod retry;
mod simplify;

pub use error::{ErrorKind, UmbraError};
pub use simplify::{install_hint, simplify, wrap_command_not_found};

/// Result type alias used across the umbra workspace.
pub type Result<T> = std::result::Result<T, UmbraError>;
