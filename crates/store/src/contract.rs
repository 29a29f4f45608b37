//! The uniform store contract.
//!
//! Every backend — network vault, cloud SDK, CLI wrapper or in-process map —
//! implements [`SecretStore`]. Consumers never see transport; they see five
//! operations, a capability record and the shared error taxonomy.

use std::sync::Arc;

use async_trait::async_trait;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::Result;

use crate::context::OpContext;

/// The operation set a secret backend must provide.
///
/// # Contract
///
/// - `name` is stable and lowercase, matching the configured instance name.
/// - `resolve` retrieves the plaintext, applies `ref.field` extraction when
///   set, honours `ref.version` when set, and never logs plaintext.
/// - `describe` returns existence and metadata without reading plaintext.
///   A missing secret is `exists: false`, **not** a `NotFound` error.
/// - `capabilities` is pure and answers the same on every call.
/// - `validate` verifies reachability, auth and permissions; it must honour
///   context cancellation.
///
/// # Failure semantics
///
/// Transient backend failures surface unchanged; the caller decides whether
/// to retry via `UmbraError::is_retryable`. Auth failures are never retried
/// here. Parse failures are fatal for the individual reference.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Configured instance name.
    fn name(&self) -> &str;

    /// Retrieve a secret value.
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret>;

    /// Retrieve existence and metadata without the plaintext.
    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata>;

    /// Feature flags for this store.
    fn capabilities(&self) -> StoreCapabilities;

    /// Verify the store is reachable and authenticated.
    async fn validate(&self, ctx: &OpContext) -> Result<()>;
}

/// Factory for one registered secret-store type.
///
/// `create` parses the free-form backend configuration; a malformed config is
/// a `Config` error naming the offending field.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Registered type key (`vault`, `literal`, `aws.secretsmanager`, ...).
    fn type_name(&self) -> &'static str;

    /// Build a store instance named `name` from its configuration.
    async fn create(&self, name: &str, config: &serde_json::Value)
    -> Result<Arc<dyn SecretStore>>;
}

/// A configured rotation target.
///
/// Services are *not* secret stores: they are the systems whose credentials
/// get rotated. The registry keeps the two type tables separate and the
/// confusion of one for the other is a `Config` error.
pub trait RotationTarget: Send + Sync {
    /// Configured instance name.
    fn name(&self) -> &str;

    /// Service type key (`postgres`, `github`, ...).
    fn service_type(&self) -> &str;

    /// Backend-specific configuration, forwarded opaquely from the config.
    fn config(&self) -> &serde_json::Value;
}

/// Factory for one registered service type.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    /// Registered type key.
    fn type_name(&self) -> &'static str;

    /// Build a service handle named `name` from its configuration.
    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn RotationTarget>>;
}

/// Plain [`RotationTarget`] carrying its configuration verbatim.
///
/// Most service types need no connection state at registry time; strategies
/// read the endpoint and auth material from the catalog and this config.
#[derive(Debug, Clone)]
pub struct ConfiguredService {
    name: String,
    service_type: String,
    config: serde_json::Value,
}

impl ConfiguredService {
    /// Wrap a name, type and configuration.
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            config,
        }
    }
}

impl RotationTarget for ConfiguredService {
    fn name(&self) -> &str {
        &self.name
    }

    fn service_type(&self) -> &str {
        &self.service_type
    }

    fn config(&self) -> &serde_json::Value {
        &self.config
    }
}

/// [`ServiceFactory`] that produces [`ConfiguredService`] handles.
///
/// Embedding applications register one per service type they rotate:
///
/// ```
/// use umbra_store::{StoreRegistry, contract::GenericServiceFactory};
///
/// let registry = StoreRegistry::new();
/// registry.register_service_type(GenericServiceFactory::new("postgres"));
/// ```
pub struct GenericServiceFactory {
    type_name: &'static str,
}

impl GenericServiceFactory {
    /// A factory for `type_name`.
    pub fn new(type_name: &'static str) -> Self {
        Self { type_name }
    }
}

#[async_trait]
impl ServiceFactory for GenericServiceFactory {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn RotationTarget>> {
        Ok(Arc::new(ConfiguredService::new(
            name,
            self.type_name,
            config.clone(),
        )))
    }
}
