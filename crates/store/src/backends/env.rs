//! Environment-variable store.
//!
//! Reads secrets from the engine's own process environment, optionally under
//! a prefix. Mostly used to bridge CI-injected credentials into the same
//! reference grammar as everything else.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};
use crate::extract::extract_field;

#[derive(Debug, Default, Deserialize)]
struct EnvConfig {
    /// Prepended to every looked-up variable name.
    #[serde(default)]
    prefix: String,
}

/// Store over the process environment.
pub struct EnvStore {
    name: String,
    prefix: String,
}

impl EnvStore {
    fn variable_name(&self, reference: &StoreRef) -> Result<String> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for env store"));
        }
        Ok(format!("{}{}", self.prefix, reference.path))
    }
}

#[async_trait]
impl SecretStore for EnvStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        ctx.ensure_live("env resolve")?;
        let key = self.variable_name(reference)?;
        let raw = std::env::var(&key)
            .map_err(|_| UmbraError::not_found(&self.name, &key))?;
        let value = extract_field(&self.name, &key, &raw, reference.field.as_deref())?;
        Ok(Secret::new(value))
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        ctx.ensure_live("env describe")?;
        let key = self.variable_name(reference)?;
        Ok(match std::env::var(&key) {
            Ok(raw) => SecretMetadata::present().with_size(raw.len() as u64),
            Err(_) => SecretMetadata::absent(),
        })
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        ctx.ensure_live("env validate")
    }
}

/// Factory for the `env` type.
pub struct EnvFactory;

#[async_trait]
impl StoreFactory for EnvFactory {
    fn type_name(&self) -> &'static str {
        "env"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: EnvConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid env store config: {e}"),
            )
        })?;
        Ok(Arc::new(EnvStore {
            name: name.to_string(),
            prefix: parsed.prefix,
        }))
    }
}
