//! The process-wide store registry.
//!
//! Two type tables — secret stores and rotatable services — plus the live
//! instance tables. The tables are deliberately separate: asking for a
//! service type as a secret store (or vice versa) is a `Config` error, not a
//! lookup miss, because the two contracts are different and confusing them
//! is a configuration bug worth naming.

use std::sync::Arc;

use dashmap::DashMap;
use umbra_core::{Config, StoreConfig};
use umbra_error::{Result, UmbraError};

use crate::backends;
use crate::contract::{RotationTarget, SecretStore, ServiceFactory, StoreFactory};

/// Named store and service instances plus the factories that build them.
///
/// Thread-safe under concurrent reads and writes; reads vastly outnumber
/// writes, which only happen at configuration time.
#[derive(Default)]
pub struct StoreRegistry {
    store_types: DashMap<&'static str, Arc<dyn StoreFactory>>,
    service_types: DashMap<&'static str, Arc<dyn ServiceFactory>>,
    stores: DashMap<String, Arc<dyn SecretStore>>,
    services: DashMap<String, Arc<dyn RotationTarget>>,
}

impl StoreRegistry {
    /// An empty registry with no registered types.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every compiled-in backend type registered.
    pub fn with_builtin_types() -> Self {
        let registry = Self::new();
        for factory in backends::builtin_factories() {
            registry.register_store_type_arc(factory);
        }
        registry
    }

    /// Register a secret-store factory.
    pub fn register_store_type(&self, factory: impl StoreFactory + 'static) {
        self.register_store_type_arc(Arc::new(factory));
    }

    fn register_store_type_arc(&self, factory: Arc<dyn StoreFactory>) {
        self.store_types.insert(factory.type_name(), factory);
    }

    /// Register a service factory.
    pub fn register_service_type(&self, factory: impl ServiceFactory + 'static) {
        let factory: Arc<dyn ServiceFactory> = Arc::new(factory);
        self.service_types.insert(factory.type_name(), factory);
    }

    /// Registered secret-store type keys, sorted.
    pub fn store_type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.store_types.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    /// Create and register a secret store instance.
    pub async fn create_store(
        &self,
        name: &str,
        config: &StoreConfig,
    ) -> Result<Arc<dyn SecretStore>> {
        let factory = self
            .store_types
            .get(config.store_type.as_str())
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| self.unknown_store_type(&config.store_type))?;
        let store = factory.create(name, &config.config).await?;
        store.capabilities().validate()?;
        self.stores.insert(name.to_string(), Arc::clone(&store));
        tracing::debug!(store = name, store_type = %config.store_type, "registered secret store");
        Ok(store)
    }

    /// Create and register a service instance.
    pub async fn create_service(
        &self,
        name: &str,
        config: &StoreConfig,
    ) -> Result<Arc<dyn RotationTarget>> {
        let factory = self
            .service_types
            .get(config.store_type.as_str())
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| self.unknown_service_type(&config.store_type))?;
        let service = factory.create(name, &config.config).await?;
        self.services.insert(name.to_string(), Arc::clone(&service));
        tracing::debug!(service = name, service_type = %config.store_type, "registered service");
        Ok(service)
    }

    /// Instantiate every store and service named in a configuration.
    pub async fn load_config(&self, config: &Config) -> Result<()> {
        config.validate()?;
        for (name, store_config) in &config.secret_stores {
            self.create_store(name, store_config).await?;
        }
        for (name, service_config) in &config.services {
            self.create_service(name, service_config).await?;
        }
        Ok(())
    }

    /// Look up a store instance by configured name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SecretStore>> {
        self.stores.get(name).map(|s| Arc::clone(s.value()))
    }

    /// Look up a service instance by configured name.
    pub fn get_service(&self, name: &str) -> Option<Arc<dyn RotationTarget>> {
        self.services.get(name).map(|s| Arc::clone(s.value()))
    }

    /// Names of all registered store instances, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Names of all registered service instances, sorted.
    pub fn list_services(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Drop every instance, keeping registered types.
    pub fn clear_instances(&self) {
        self.stores.clear();
        self.services.clear();
    }

    fn unknown_store_type(&self, requested: &str) -> UmbraError {
        let err = UmbraError::config(
            "secret_stores.type",
            format!("unknown secret store type: {requested}"),
        );
        if self.service_types.contains_key(requested) {
            err.with_suggestion(format!(
                "'{requested}' is registered as a service type; move it under `services`"
            ))
        } else {
            err.with_suggestion(format!(
                "registered store types: {}",
                self.store_type_names().join(", ")
            ))
        }
    }

    fn unknown_service_type(&self, requested: &str) -> UmbraError {
        let err = UmbraError::config(
            "services.type",
            format!("unknown service type: {requested}"),
        );
        if self.store_types.contains_key(requested) {
            err.with_suggestion(format!(
                "'{requested}' is registered as a secret store type; move it under `secret_stores`"
            ))
        } else {
            err
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::GenericServiceFactory;
    use serde_json::json;

    fn literal_config() -> StoreConfig {
        StoreConfig::new("literal", json!({ "values": { "A": "1" } }))
    }

    #[tokio::test]
    async fn creates_and_lists_store_instances() {
        let registry = StoreRegistry::with_builtin_types();
        registry.create_store("lit", &literal_config()).await.unwrap();
        assert_eq!(registry.list(), vec!["lit".to_string()]);
        assert!(registry.get("lit").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[tokio::test]
    async fn unknown_store_type_is_config_error() {
        let registry = StoreRegistry::with_builtin_types();
        let err = registry
            .create_store("x", &StoreConfig::of_type("no-such-backend"))
            .await
            .err().unwrap();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Config { .. }));
        assert!(
            err.to_string()
                .contains("unknown secret store type: no-such-backend")
        );
    }

    #[tokio::test]
    async fn service_type_requested_as_store_is_named_in_the_error() {
        let registry = StoreRegistry::with_builtin_types();
        registry.register_service_type(GenericServiceFactory::new("postgres"));

        let err = registry
            .create_store("db", &StoreConfig::of_type("postgres"))
            .await
            .err().unwrap();
        assert!(err.to_string().contains("unknown secret store type: postgres"));
        assert!(err.render().contains("registered as a service type"));

        let err = registry
            .create_service("lit", &StoreConfig::of_type("literal"))
            .await
            .err().unwrap();
        assert!(err.to_string().contains("unknown service type: literal"));
        assert!(err.render().contains("registered as a secret store type"));
    }

    #[tokio::test]
    async fn load_config_wires_everything() {
        let registry = StoreRegistry::with_builtin_types();
        registry.register_service_type(GenericServiceFactory::new("postgres"));

        let config: Config = serde_json::from_value(json!({
            "version": 1,
            "secret_stores": { "lit": { "type": "literal", "config": { "values": { "A": "1" } } } },
            "services": { "prod-db": { "type": "postgres", "config": {} } },
        }))
        .unwrap();

        registry.load_config(&config).await.unwrap();
        assert!(registry.get("lit").is_some());
        assert!(registry.get_service("prod-db").is_some());
    }
}
