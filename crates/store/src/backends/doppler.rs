//! Doppler backend, wrapping the `doppler` CLI.
//!
//! Secrets are scoped to a project + config pair; the reference path is the
//! secret name. A service token can be injected per-store so multiple
//! Doppler scopes can coexist in one configuration.

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
struct DopplerConfig {
    /// Doppler project; omitted when the CLI's own scoping is in effect.
    #[serde(default)]
    project: Option<String>,
    /// Config within the project (`dev`, `stg`, `prd`, ...).
    #[serde(default)]
    config: Option<String>,
    /// Service token; falls back to the CLI's own login state.
    #[serde(default)]
    token: Option<String>,
}

/// Store wrapping the Doppler CLI.
pub struct DopplerStore {
    name: String,
    config: DopplerConfig,
    executor: Arc<dyn CommandExecutor>,
}

impl DopplerStore {
    fn spec(&self, args: Vec<String>) -> CommandSpec {
        let mut spec = CommandSpec::new("doppler", args);
        if let Some(project) = &self.config.project {
            spec.args.push("--project".into());
            spec.args.push(project.clone());
        }
        if let Some(config) = &self.config.config {
            spec.args.push("--config".into());
            spec.args.push(config.clone());
        }
        if let Some(token) = &self.config.token {
            spec = spec.with_env("DOPPLER_TOKEN", token.clone());
        }
        spec
    }

    fn map_failure(&self, reference: &StoreRef, status: Option<i32>, stderr: &str) -> UmbraError {
        let lower = stderr.to_lowercase();
        if lower.contains("invalid auth token") || lower.contains("not logged in") {
            return UmbraError::auth(&self.name, "not logged in")
                .with_suggestion("run `doppler login` or set a service token");
        }
        if lower.contains("could not find secret") || lower.contains("not found") {
            return UmbraError::not_found(&self.name, &reference.path);
        }
        UmbraError::command("doppler", status, stderr.trim().to_string())
    }
}

#[async_trait]
impl SecretStore for DopplerStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for doppler store"));
        }
        let output = self
            .executor
            .run(
                ctx,
                &self.spec(vec![
                    "secrets".into(),
                    "get".into(),
                    reference.path.clone(),
                    "--plain".into(),
                ]),
            )
            .await?;
        if !output.success() {
            return Err(self.map_failure(reference, output.status, &output.stderr));
        }
        let raw = output.stdout.trim_end_matches('\n');
        let value = extract_field(&self.name, &reference.path, raw, reference.field.as_deref())?;
        Ok(Secret::new(value))
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        let output = self
            .executor
            .run(
                ctx,
                &self.spec(vec![
                    "secrets".into(),
                    "get".into(),
                    reference.path.clone(),
                    "--plain".into(),
                ]),
            )
            .await?;
        if !output.success() {
            if output.stderr.to_lowercase().contains("not found") {
                return Ok(SecretMetadata::absent());
            }
            return Err(self.map_failure(reference, output.status, &output.stderr));
        }
        Ok(SecretMetadata::present()
            .with_size(output.stdout.trim_end_matches('\n').len() as u64))
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none().with_auth(["token", "login"])
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        let output = self.executor.run(ctx, &self.spec(vec!["me".into()])).await?;
        if output.success() {
            Ok(())
        } else {
            Err(UmbraError::auth(&self.name, output.stderr.trim().to_string())
                .with_suggestion("run `doppler login` or set a service token"))
        }
    }
}

/// Factory for the `doppler` type.
pub struct DopplerFactory {
    executor: Arc<dyn CommandExecutor>,
}

impl Default for DopplerFactory {
    fn default() -> Self {
        Self {
            executor: Arc::new(SystemExecutor::new()),
        }
    }
}

impl DopplerFactory {
    /// Use a custom executor (tests script CLI responses through this).
    pub fn with_executor(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StoreFactory for DopplerFactory {
    fn type_name(&self) -> &'static str {
        "doppler"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: DopplerConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid doppler store config: {e}"),
            )
        })?;
        Ok(Arc::new(DopplerStore {
            name: name.to_string(),
            config: parsed,
            executor: Arc::clone(&self.executor),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedExecutor;
    use serde_json::json;

    #[tokio::test]
    async fn scopes_project_and_config_flags() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_stdout("s3cr3t\n");
        let store = DopplerFactory::with_executor(Arc::clone(&exec) as Arc<dyn CommandExecutor>)
            .create("dp", &json!({ "project": "api", "config": "prd" }))
            .await
            .unwrap();

        let secret = store
            .resolve(&OpContext::new(), &StoreRef::new("dp", "DATABASE_URL"))
            .await
            .unwrap();
        secret.value.expose(|s| assert_eq!(s, "s3cr3t"));

        let args = &exec.calls()[0].args;
        assert!(args.contains(&"--project".to_string()));
        assert!(args.contains(&"prd".to_string()));
    }

    #[tokio::test]
    async fn invalid_token_maps_to_auth() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_failure(1, "Doppler Error: Invalid Auth token");
        let store = DopplerFactory::with_executor(exec)
            .create("dp", &json!({}))
            .await
            .unwrap();

        let err = store
            .resolve(&OpContext::new(), &StoreRef::new("dp", "KEY"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Auth { .. }));
    }

    #[tokio::test]
    async fn missing_secret_is_not_found() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_failure(1, "Doppler Error: Could not find secret 'GHOST'");
        let store = DopplerFactory::with_executor(exec)
            .create("dp", &json!({}))
            .await
            .unwrap();

        let err = store
            .resolve(&OpContext::new(), &StoreRef::new("dp", "GHOST"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::NotFound { .. }));
    }
}
