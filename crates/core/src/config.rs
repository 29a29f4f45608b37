//! The parsed configuration object the engine consumes.
//!
//! Loading and schema-parsing the on-disk file is a collaborator's job; this
//! module is the shape that arrives here after parsing, plus the structural
//! validation the engine performs before wiring registries and resolvers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use umbra_error::{Result, UmbraError};

use crate::refs::StoreRef;

/// Supported configuration schema version.
pub const CONFIG_VERSION: u32 = 1;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Schema version; must be [`CONFIG_VERSION`].
    pub version: u32,
    /// Secret store instances by configured name.
    #[serde(default)]
    pub secret_stores: BTreeMap<String, StoreConfig>,
    /// Rotatable service instances by configured name.
    #[serde(default)]
    pub services: BTreeMap<String, StoreConfig>,
    /// Named environments: env name → variable name → source.
    #[serde(default)]
    pub envs: BTreeMap<String, EnvSpec>,
    /// Named transform pipelines: name → ordered step names.
    #[serde(default)]
    pub transforms: BTreeMap<String, Vec<String>>,
}

/// One store or service instance: a registered type plus free-form backend
/// configuration forwarded opaquely to the factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Registered type key (`vault`, `literal`, `aws.secretsmanager`, ...).
    #[serde(rename = "type")]
    pub store_type: String,
    /// Backend-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Variable bindings of one environment.
pub type EnvSpec = BTreeMap<String, VarSpec>;

/// Where a variable's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarSpec {
    /// Resolved from a secret reference.
    From {
        /// The parsed `store://` reference.
        from: StoreRef,
    },
    /// An inline literal value.
    Value {
        /// The literal.
        value: String,
    },
    /// A fallback chain: the first reference that resolves wins.
    ValueFrom {
        /// References tried in order; a missing secret falls through to the
        /// next entry, any other failure surfaces immediately.
        #[serde(rename = "value-from")]
        value_from: Vec<StoreRef>,
    },
}

impl Config {
    /// Structural validation of an already-parsed configuration.
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(UmbraError::config(
                "version",
                format!(
                    "unsupported config version {}, expected {CONFIG_VERSION}",
                    self.version
                ),
            )
            .with_suggestion(format!("set `version: {CONFIG_VERSION}`")));
        }
        for name in self.secret_stores.keys().chain(self.services.keys()) {
            if name.is_empty() {
                return Err(UmbraError::config(
                    "secret_stores",
                    "store names must be non-empty",
                ));
            }
        }
        for (env_name, vars) in &self.envs {
            for var_name in vars.keys() {
                if var_name.is_empty() {
                    return Err(UmbraError::config(
                        format!("envs.{env_name}"),
                        "variable names must be non-empty",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl StoreConfig {
    /// A config record with the given type and null backend config.
    pub fn of_type(store_type: impl Into<String>) -> Self {
        Self {
            store_type: store_type.into(),
            config: serde_json::Value::Null,
        }
    }

    /// A config record with the given type and backend config.
    pub fn new(store_type: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            store_type: store_type.into(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrong_version_is_a_config_error() {
        let config = Config {
            version: 2,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Config { .. }));
        assert!(err.render().contains("version: 1"));
    }

    #[test]
    fn env_spec_deserializes_every_variant() {
        let raw = json!({
            "DATABASE_URL": { "from": "store://vault/db/url" },
            "ENVIRONMENT": { "value": "production" },
            "API_KEY": { "value-from": ["store://vault/api/key", "store://lit/API_KEY"] },
        });
        let spec: EnvSpec = serde_json::from_value(raw).unwrap();
        match &spec["DATABASE_URL"] {
            VarSpec::From { from } => assert_eq!(from.store, "vault"),
            other => panic!("expected From, got {other:?}"),
        }
        match &spec["ENVIRONMENT"] {
            VarSpec::Value { value } => assert_eq!(value, "production"),
            other => panic!("expected Value, got {other:?}"),
        }
        match &spec["API_KEY"] {
            VarSpec::ValueFrom { value_from } => {
                assert_eq!(value_from.len(), 2);
                assert_eq!(value_from[1].store, "lit");
            }
            other => panic!("expected ValueFrom, got {other:?}"),
        }
    }

    #[test]
    fn full_config_round_trips() {
        let raw = json!({
            "version": 1,
            "secret_stores": {
                "vault": { "type": "vault", "config": { "address": "http://127.0.0.1:8200" } },
                "lit": { "type": "literal", "config": { "values": { "A": "1" } } },
            },
            "services": {
                "prod-db": { "type": "postgres", "config": { "host": "db.internal" } },
            },
            "envs": {
                "production": { "PGPASSWORD": { "from": "store://vault/db/creds#password" } },
            },
            "transforms": { "upper": ["uppercase"] },
        });
        let config: Config = serde_json::from_value(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.secret_stores["vault"].store_type, "vault");
        let reparsed: Config =
            serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(reparsed.envs["production"], config.envs["production"]);
    }
}
