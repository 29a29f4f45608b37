//! Umbra store layer
//!
//! The uniform operation set every secret backend provides
//! ([`SecretStore`]), the process-wide [`StoreRegistry`] that creates and
//! hands out named instances, and the backend implementations themselves
//! (in-process literals, filesystem, HTTP-backed vaults, CLI-wrapped
//! password managers, cloud SDKs, the OS keychain).
//!
//! Backends differ wildly in transport; everything above this crate sees one
//! contract, one capability record and one error taxonomy.

pub mod backends;
pub mod context;
pub mod contract;
pub mod exec;
pub mod extract;
pub mod metrics;
pub mod registry;

pub use context::OpContext;
pub use contract::{RotationTarget, SecretStore, ServiceFactory, StoreFactory};
pub use exec::{CommandExecutor, CommandOutput, CommandSpec, ScriptedExecutor, SystemExecutor};
pub use extract::extract_field;
pub use metrics::StoreMetrics;
pub use registry::StoreRegistry;

/// Commonly used types.
pub mod prelude {
    pub use crate::backends::literal::LiteralStore;
    pub use crate::context::OpContext;
    pub use crate::contract::{RotationTarget, SecretStore, ServiceFactory, StoreFactory};
    pub use crate::registry::StoreRegistry;
    pub use umbra_core::prelude::*;
}
