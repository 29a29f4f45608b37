//! `pass` (the standard unix password store) backend.
//!
//! Entries are gpg-encrypted files addressed by path. Decryption failures
//! are auth problems (wrong or locked gpg key); a missing entry is
//! `NotFound`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};
use crate::exec::{CommandExecutor, CommandSpec, SystemExecutor};
use crate::extract::extract_field;

#[derive(Debug, Default, Deserialize)]
struct PassConfig {
    /// Prefix applied to every entry path.
    #[serde(default)]
    prefix: Option<String>,
}

/// Store wrapping the `pass` CLI.
pub struct PassStore {
    name: String,
    prefix: Option<String>,
    executor: Arc<dyn CommandExecutor>,
}

impl PassStore {
    fn entry(&self, reference: &StoreRef) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), reference.path),
            None => reference.path.clone(),
        }
    }

    fn map_failure(&self, entry: &str, status: Option<i32>, stderr: &str) -> UmbraError {
        let lower = stderr.to_lowercase();
        if lower.contains("is not in the password store") {
            return UmbraError::not_found(&self.name, entry);
        }
        if lower.contains("decryption failed") || lower.contains("no secret key") {
            return UmbraError::auth(&self.name, "gpg decryption failed")
                .with_suggestion("check that your gpg key is available and unlocked");
        }
        UmbraError::command("pass", status, stderr.trim().to_string())
    }
}

#[async_trait]
impl SecretStore for PassStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for pass store"));
        }
        let entry = self.entry(reference);
        let output = self
            .executor
            .run(ctx, &CommandSpec::new("pass", ["show", entry.as_str()]))
            .await?;
        if !output.success() {
            return Err(self.map_failure(&entry, output.status, &output.stderr));
        }
        let raw = output.stdout.trim_end_matches('\n');
        let value = extract_field(&self.name, &entry, raw, reference.field.as_deref())?;
        Ok(Secret::new(value))
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        let entry = self.entry(reference);
        let output = self
            .executor
            .run(ctx, &CommandSpec::new("pass", ["show", entry.as_str()]))
            .await?;
        if !output.success() {
            if output
                .stderr
                .to_lowercase()
                .contains("is not in the password store")
            {
                return Ok(SecretMetadata::absent());
            }
            return Err(self.map_failure(&entry, output.status, &output.stderr));
        }
        Ok(SecretMetadata::present())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none().with_auth(["gpg"])
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        let output = self
            .executor
            .run(ctx, &CommandSpec::new("pass", ["ls"]))
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(self.map_failure("(root)", output.status, &output.stderr))
        }
    }
}

/// Factory for the `pass` type.
pub struct PassFactory {
    executor: Arc<dyn CommandExecutor>,
}

impl Default for PassFactory {
    fn default() -> Self {
        Self {
            executor: Arc::new(SystemExecutor::new()),
        }
    }
}

impl PassFactory {
    /// Use a custom executor (tests script CLI responses through this).
    pub fn with_executor(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StoreFactory for PassFactory {
    fn type_name(&self) -> &'static str {
        "pass"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: PassConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid pass store config: {e}"),
            )
        })?;
        Ok(Arc::new(PassStore {
            name: name.to_string(),
            prefix: parsed.prefix,
            executor: Arc::clone(&self.executor),
        }))
    }
}
