//! In-process literal store.
//!
//! Values come straight from the configuration; no network, no auth. Useful
//! for tests, defaults and non-secret wiring that still wants to flow
//! through the resolver.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};
use crate::extract::extract_field;

#[derive(Debug, Default, Deserialize)]
struct LiteralConfig {
    #[serde(default)]
    values: BTreeMap<String, String>,
}

/// Store backed by an in-memory map from the configuration.
pub struct LiteralStore {
    name: String,
    values: BTreeMap<String, String>,
}

impl LiteralStore {
    /// Build from a name and a value map.
    pub fn new(
        name: impl Into<String>,
        values: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl SecretStore for LiteralStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        ctx.ensure_live("literal resolve")?;
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for literal store"));
        }
        let raw = self
            .values
            .get(&reference.path)
            .ok_or_else(|| UmbraError::not_found(&self.name, &reference.path))?;
        let value = extract_field(&self.name, &reference.path, raw, reference.field.as_deref())?;
        Ok(Secret::new(value))
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        ctx.ensure_live("literal describe")?;
        Ok(match self.values.get(&reference.path) {
            Some(raw) => SecretMetadata::present().with_size(raw.len() as u64),
            None => SecretMetadata::absent(),
        })
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        ctx.ensure_live("literal validate")
    }
}

/// Factory for the `literal` type.
pub struct LiteralFactory;

#[async_trait]
impl StoreFactory for LiteralFactory {
    fn type_name(&self) -> &'static str {
        "literal"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: LiteralConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid literal store config: {e}"),
            )
        })?;
        Ok(Arc::new(LiteralStore {
            name: name.to_string(),
            values: parsed.values,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LiteralStore {
        LiteralStore::new("lit", [("A", "1"), ("doc", r#"{"user":"u","pass":"p"}"#)])
    }

    #[tokio::test]
    async fn resolves_plain_value() {
        let secret = store()
            .resolve(&OpContext::new(), &StoreRef::new("lit", "A"))
            .await
            .unwrap();
        secret.value.expose(|s| assert_eq!(s, "1"));
    }

    #[tokio::test]
    async fn resolves_field_from_structured_value() {
        let secret = store()
            .resolve(
                &OpContext::new(),
                &StoreRef::new("lit", "doc").with_field("pass"),
            )
            .await
            .unwrap();
        secret.value.expose(|s| assert_eq!(s, "p"));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let err = store()
            .resolve(&OpContext::new(), &StoreRef::new("lit", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::NotFound { .. }));
    }

    #[tokio::test]
    async fn describe_reports_absence_without_erroring() {
        let meta = store()
            .describe(&OpContext::new(), &StoreRef::new("lit", "missing"))
            .await
            .unwrap();
        assert!(!meta.exists);
    }
}
