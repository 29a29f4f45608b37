//! Umbra core types
//!
//! The shared vocabulary of the engine: reference URIs ([`StoreRef`],
//! [`ServiceRef`]), the redacting secret wrapper ([`SecretString`],
//! [`Secret`]), non-secret metadata, store capability descriptors and the
//! parsed configuration model the registry and resolver consume.
//!
//! Nothing in this crate talks to a backend; it is pure data with strong
//! invariants (canonical reference round-trips, `[REDACTED]` on every
//! formatting surface, capability truthfulness).

pub mod capabilities;
pub mod config;
pub mod metadata;
pub mod refs;
pub mod secret;

pub use capabilities::{RotationCapabilities, StoreCapabilities};
pub use config::{Config, EnvSpec, StoreConfig, VarSpec};
pub use metadata::SecretMetadata;
pub use refs::{ServiceRef, StoreRef};
pub use secret::{Secret, SecretString, redacted};

/// Commonly used types.
pub mod prelude {
    pub use crate::capabilities::{RotationCapabilities, StoreCapabilities};
    pub use crate::config::{Config, EnvSpec, StoreConfig, VarSpec};
    pub use crate::metadata::SecretMetadata;
    pub use crate::refs::{ServiceRef, StoreRef};
    pub use crate::secret::{Secret, SecretString, redacted};
    pub use umbra_error::{ErrorKind, Result, UmbraError};
}
