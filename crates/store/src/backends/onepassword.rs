//! 1Password backend, wrapping the `op` CLI.
//!
//! Field reads use the `op read op://<vault>/<item>/<field>` form; whole-item
//! reads use `op item get --format json`. Sign-in state is probed once with
//! `op whoami` and cached until an operation reports the session gone.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};
use crate::exec::{CommandExecutor, CommandSpec, SystemExecutor};

#[derive(Debug, Default, Deserialize)]
struct OnePasswordConfig {
    /// Account shorthand passed as `--account` when set.
    #[serde(default)]
    account: Option<String>,
    /// Default vault for item lookups.
    #[serde(default)]
    vault: Option<String>,
}

/// Store wrapping the 1Password CLI.
pub struct OnePasswordStore {
    name: String,
    account: Option<String>,
    vault: Option<String>,
    executor: Arc<dyn CommandExecutor>,
    signed_in: RwLock<bool>,
}

impl OnePasswordStore {
    fn spec(&self, args: Vec<String>) -> CommandSpec {
        let mut spec = CommandSpec::new("op", args);
        if let Some(account) = &self.account {
            spec.args.push("--account".into());
            spec.args.push(account.clone());
        }
        spec
    }

    async fn ensure_signed_in(&self, ctx: &OpContext) -> Result<()> {
        if *self.signed_in.read() {
            return Ok(());
        }
        let output = self
            .executor
            .run(ctx, &self.spec(vec!["whoami".into()]))
            .await?;
        if output.success() {
            *self.signed_in.write() = true;
            Ok(())
        } else {
            Err(self.map_failure(None, output.status, &output.stderr))
        }
    }

    fn map_failure(&self, reference: Option<&StoreRef>, status: Option<i32>, stderr: &str) -> UmbraError {
        let lower = stderr.to_lowercase();
        if lower.contains("not signed in")
            || lower.contains("no account")
            || lower.contains("session expired")
            || lower.contains("authorization")
        {
            *self.signed_in.write() = false;
            return UmbraError::auth(&self.name, "not signed in")
                .with_suggestion("run `op signin`");
        }
        if lower.contains("isn't an item") || lower.contains("not found") {
            if let Some(reference) = reference {
                return UmbraError::not_found(&self.name, &reference.path);
            }
        }
        UmbraError::command("op", status, stderr.trim().to_string())
    }

    fn vault_for(&self, reference: &StoreRef) -> Option<String> {
        reference
            .options
            .get("vault")
            .cloned()
            .or_else(|| self.vault.clone())
    }
}

#[async_trait]
impl SecretStore for OnePasswordStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for 1password store"));
        }
        self.ensure_signed_in(ctx).await?;

        match reference.field.as_deref() {
            Some(field) => {
                let vault = self.vault_for(reference).ok_or_else(|| {
                    UmbraError::config(
                        format!("secret_stores.{}.config.vault", self.name),
                        "field reads need a vault (set `vault` in config or `?vault=` on the reference)",
                    )
                })?;
                let uri = format!("op://{vault}/{}/{field}", reference.path);
                let output = self
                    .executor
                    .run(
                        ctx,
                        &self.spec(vec!["read".into(), uri, "--no-newline".into()]),
                    )
                    .await?;
                if !output.success() {
                    return Err(self.map_failure(Some(reference), output.status, &output.stderr));
                }
                Ok(Secret::new(output.stdout))
            }
            None => {
                let mut args = vec![
                    "item".to_string(),
                    "get".to_string(),
                    reference.path.clone(),
                    "--format".to_string(),
                    "json".to_string(),
                ];
                if let Some(vault) = self.vault_for(reference) {
                    args.push("--vault".into());
                    args.push(vault);
                }
                let output = self.executor.run(ctx, &self.spec(args)).await?;
                if !output.success() {
                    return Err(self.map_failure(Some(reference), output.status, &output.stderr));
                }
                Ok(Secret::new(output.stdout.trim().to_string()))
            }
        }
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        self.ensure_signed_in(ctx).await?;
        let mut args = vec![
            "item".to_string(),
            "get".to_string(),
            reference.path.clone(),
            "--format".to_string(),
            "json".to_string(),
        ];
        if let Some(vault) = self.vault_for(reference) {
            args.push("--vault".into());
            args.push(vault);
        }
        let output = self.executor.run(ctx, &self.spec(args)).await?;
        if !output.success() {
            let lower = output.stderr.to_lowercase();
            if lower.contains("isn't an item") || lower.contains("not found") {
                return Ok(SecretMetadata::absent());
            }
            return Err(self.map_failure(Some(reference), output.status, &output.stderr));
        }
        let item: Value = serde_json::from_str(output.stdout.trim())
            .map_err(|e| UmbraError::provider(self.name.clone(), "describe", e))?;
        let mut meta = SecretMetadata::present();
        meta.updated_at = item["updated_at"].as_str().and_then(|d| d.parse().ok());
        meta.version = item["version"].as_u64().map(|v| v.to_string());
        Ok(meta)
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
            .with_versioning()
            .with_metadata()
            .with_auth(["account", "service-account"])
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        self.ensure_signed_in(ctx).await
    }
}

/// Factory for the `onepassword` type.
pub struct OnePasswordFactory {
    executor: Arc<dyn CommandExecutor>,
}

impl Default for OnePasswordFactory {
    fn default() -> Self {
        Self {
            executor: Arc::new(SystemExecutor::new()),
        }
    }
}

impl OnePasswordFactory {
    /// Use a custom executor (tests script CLI responses through this).
    pub fn with_executor(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StoreFactory for OnePasswordFactory {
    fn type_name(&self) -> &'static str {
        "onepassword"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: OnePasswordConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid 1password store config: {e}"),
            )
        })?;
        Ok(Arc::new(OnePasswordStore {
            name: name.to_string(),
            account: parsed.account,
            vault: parsed.vault,
            executor: Arc::clone(&self.executor),
            signed_in: RwLock::new(false),
        }))
    }
}
