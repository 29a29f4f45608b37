//! Read-only service-definitions lookup.
//!
//! The catalog is an external collaborator; the engine only depends on this
//! interface and tolerates it being absent — every schema-aware path
//! degrades to default-free behaviour when no catalog is wired.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lookup interface over the service-definitions catalog.
pub trait ServiceCatalog: Send + Sync {
    /// The definition of a service type, when known.
    fn service_type(&self, name: &str) -> Option<ServiceTypeDef>;

    /// The definition of a configured instance of a service type.
    fn service_instance(&self, service_type: &str, instance: &str) -> Option<ServiceInstanceDef>;
}

/// What the catalog publishes about a service type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceTypeDef {
    /// Type name (`postgres`, `github`, ...).
    pub name: String,
    /// Default rotation strategy for this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_strategy: Option<String>,
    /// Credential kinds this type rotates, with their constraints.
    #[serde(default)]
    pub credential_kinds: BTreeMap<String, CredentialKindDef>,
}

/// One rotatable credential kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialKindDef {
    /// Constraints the validator enforces pre-rotation.
    #[serde(default)]
    pub constraints: Constraints,
}

/// Validation constraints for a credential kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// Credential lifetime, Go-duration syntax with a `d` suffix allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    /// Minimum value length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum value length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Allowed characters; unset means unrestricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
}

/// What the catalog publishes about one configured instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInstanceDef {
    /// Endpoint the service is reached at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Auth material descriptors (never plaintext secrets).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auth: BTreeMap<String, String>,
    /// Free-form instance configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// In-memory catalog for tests and embedding applications.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    types: BTreeMap<String, ServiceTypeDef>,
    instances: BTreeMap<(String, String), ServiceInstanceDef>,
}

impl StaticCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service type definition.
    pub fn with_type(mut self, def: ServiceTypeDef) -> Self {
        self.types.insert(def.name.clone(), def);
        self
    }

    /// Add an instance definition.
    pub fn with_instance(
        mut self,
        service_type: impl Into<String>,
        instance: impl Into<String>,
        def: ServiceInstanceDef,
    ) -> Self {
        self.instances
            .insert((service_type.into(), instance.into()), def);
        self
    }
}

impl ServiceCatalog for StaticCatalog {
    fn service_type(&self, name: &str) -> Option<ServiceTypeDef> {
        self.types.get(name).cloned()
    }

    fn service_instance(&self, service_type: &str, instance: &str) -> Option<ServiceInstanceDef> {
        self.instances
            .get(&(service_type.to_string(), instance.to_string()))
            .cloned()
    }
}
