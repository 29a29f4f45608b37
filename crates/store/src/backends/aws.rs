//! AWS backends: Secrets Manager and SSM Parameter Store.
//!
//! Both accept the same configuration shape (region, endpoint override,
//! static credentials) and lean on the SDK default chain for everything not
//! configured explicitly. The endpoint override exists so integration tests
//! can point at a local emulator.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use serde::Deserialize;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};
use crate::extract::extract_field;

/// Shared configuration for the AWS-family stores.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwsConfig {
    /// Region; the SDK default chain applies when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint override, for local emulators.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Static access key id; the SDK default chain applies when unset.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Static secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Role ARN to assume via STS before calling the service.
    #[serde(default)]
    pub role: Option<String>,
}

impl AwsConfig {
    /// Resolve the SDK configuration, honouring overrides.
    ///
    /// Credential precedence: static keys, then an assumed role, then the
    /// SDK default chain.
    async fn sdk_config(&self) -> aws_config::SdkConfig {
        let region = RegionProviderChain::first_try(
            self.region.clone().map(aws_config::Region::new),
        )
        .or_default_provider();

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&self.access_key_id, &self.secret_access_key) {
            loader = loader.credentials_provider(aws_sdk_secretsmanager::config::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "umbra-static",
            ));
        } else if let Some(role) = &self.role {
            let provider = aws_config::sts::AssumeRoleProvider::builder(role)
                .session_name("umbra")
                .build()
                .await;
            loader = loader.credentials_provider(provider);
        }
        loader.load().await
    }
}

/// Classify an SDK error message onto the taxonomy.
fn classify_sdk_error(store: &str, key: &str, operation: &str, message: String) -> UmbraError {
    let lower = message.to_lowercase();
    if lower.contains("resourcenotfound") || lower.contains("parameternotfound") {
        return UmbraError::not_found(store, key);
    }
    if lower.contains("accessdenied")
        || lower.contains("unrecognizedclient")
        || lower.contains("invalidsignature")
        || lower.contains("expiredtoken")
    {
        return UmbraError::auth(store, message);
    }
    UmbraError::provider(
        store.to_string(),
        operation.to_string(),
        std::io::Error::other(message),
    )
}

// ── Secrets Manager ─────────────────────────────────────────────────────────

/// Store backed by AWS Secrets Manager.
pub struct SecretsManagerStore {
    name: String,
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerStore {
    /// Build a store, resolving the SDK configuration chain.
    pub async fn new(name: impl Into<String>, config: AwsConfig) -> Self {
        let sdk = config.sdk_config().await;
        Self {
            name: name.into(),
            client: aws_sdk_secretsmanager::Client::new(&sdk),
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for aws.secretsmanager store"));
        }
        let mut request = self.client.get_secret_value().secret_id(&reference.path);
        if let Some(version) = &reference.version {
            // Stage labels (AWSCURRENT/AWSPREVIOUS or custom) select versions.
            request = request.version_stage(version);
        }

        let output = ctx
            .run("secretsmanager get-secret-value", async {
                request.send().await.map_err(|e| {
                    classify_sdk_error(&self.name, &reference.path, "resolve", format!("{e:?}"))
                })
            })
            .await?;

        let raw = output
            .secret_string()
            .map(String::from)
            .ok_or_else(|| {
                UmbraError::validation_field(
                    &self.name,
                    "value",
                    format!("secret '{}' holds a binary payload", reference.path),
                )
            })?;
        let value = extract_field(&self.name, &reference.path, &raw, reference.field.as_deref())?;

        let mut secret = Secret::new(value);
        if let Some(version_id) = output.version_id() {
            secret = secret.with_version(version_id.to_string());
        }
        Ok(secret)
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        let result = ctx
            .run("secretsmanager describe-secret", async {
                self.client
                    .describe_secret()
                    .secret_id(&reference.path)
                    .send()
                    .await
                    .map_err(|e| {
                        classify_sdk_error(
                            &self.name,
                            &reference.path,
                            "describe",
                            format!("{e:?}"),
                        )
                    })
            })
            .await;

        match result {
            Ok(output) => {
                let mut meta = SecretMetadata::present();
                meta.updated_at = output
                    .last_changed_date()
                    .and_then(|d| chrono::DateTime::from_timestamp(d.secs(), 0));
                for tag in output.tags().iter() {
                    if let (Some(k), Some(v)) = (tag.key(), tag.value()) {
                        meta.tags.insert(k.to_string(), v.to_string());
                    }
                }
                Ok(meta)
            }
            Err(err) if matches!(err.kind(), umbra_error::ErrorKind::NotFound { .. }) => {
                Ok(SecretMetadata::absent())
            }
            Err(err) => Err(err),
        }
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
            .with_versioning()
            .with_metadata()
            .with_binary()
            .with_auth(["iam"])
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        ctx.run("secretsmanager list-secrets", async {
            self.client
                .list_secrets()
                .max_results(1)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_sdk_error(&self.name, "(list)", "validate", format!("{e:?}")))
        })
        .await
    }
}

/// Factory for the `aws.secretsmanager` type.
pub struct SecretsManagerFactory;

#[async_trait]
impl StoreFactory for SecretsManagerFactory {
    fn type_name(&self) -> &'static str {
        "aws.secretsmanager"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: AwsConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid aws.secretsmanager store config: {e}"),
            )
        })?;
        Ok(Arc::new(SecretsManagerStore::new(name, parsed).await))
    }
}

// ── SSM Parameter Store ─────────────────────────────────────────────────────

/// Store backed by AWS SSM Parameter Store.
pub struct SsmStore {
    name: String,
    client: aws_sdk_ssm::Client,
}

impl SsmStore {
    /// Build a store, resolving the SDK configuration chain.
    pub async fn new(name: impl Into<String>, config: AwsConfig) -> Self {
        let sdk = config.sdk_config().await;
        Self {
            name: name.into(),
            client: aws_sdk_ssm::Client::new(&sdk),
        }
    }

    /// SSM parameter names are absolute.
    fn parameter_name(reference: &StoreRef) -> String {
        if reference.path.starts_with('/') {
            reference.path.clone()
        } else {
            format!("/{}", reference.path)
        }
    }
}

#[async_trait]
impl SecretStore for SsmStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for aws.ssm store"));
        }
        let mut parameter = Self::parameter_name(reference);
        if let Some(version) = &reference.version {
            parameter = format!("{parameter}:{version}");
        }

        let output = ctx
            .run("ssm get-parameter", async {
                self.client
                    .get_parameter()
                    .name(&parameter)
                    .with_decryption(true)
                    .send()
                    .await
                    .map_err(|e| {
                        classify_sdk_error(&self.name, &reference.path, "resolve", format!("{e:?}"))
                    })
            })
            .await?;

        let parameter = output.parameter().ok_or_else(|| {
            UmbraError::not_found(&self.name, &reference.path)
        })?;
        let raw = parameter.value().unwrap_or_default();
        let value = extract_field(&self.name, &reference.path, raw, reference.field.as_deref())?;

        let mut secret = Secret::new(value);
        secret = secret.with_version(parameter.version().to_string());
        Ok(secret)
    }

    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        let name = Self::parameter_name(reference);
        let result = ctx
            .run("ssm get-parameter", async {
                self.client
                    .get_parameter()
                    .name(&name)
                    .with_decryption(false)
                    .send()
                    .await
                    .map_err(|e| {
                        classify_sdk_error(
                            &self.name,
                            &reference.path,
                            "describe",
                            format!("{e:?}"),
                        )
                    })
            })
            .await;

        match result {
            Ok(output) => Ok(match output.parameter() {
                Some(parameter) => {
                    let mut meta = SecretMetadata::present();
                    meta.version = Some(parameter.version().to_string());
                    meta.updated_at = parameter
                        .last_modified_date()
                        .and_then(|d| chrono::DateTime::from_timestamp(d.secs(), 0));
                    meta
                }
                None => SecretMetadata::absent(),
            }),
            Err(err) if matches!(err.kind(), umbra_error::ErrorKind::NotFound { .. }) => {
                Ok(SecretMetadata::absent())
            }
            Err(err) => Err(err),
        }
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none()
            .with_versioning()
            .with_metadata()
            .with_auth(["iam"])
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        ctx.run("ssm describe-parameters", async {
            self.client
                .describe_parameters()
                .max_results(1)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify_sdk_error(&self.name, "(list)", "validate", format!("{e:?}")))
        })
        .await
    }
}

/// Factory for the `aws.ssm` type.
pub struct SsmFactory;

#[async_trait]
impl StoreFactory for SsmFactory {
    fn type_name(&self) -> &'static str {
        "aws.ssm"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: AwsConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid aws.ssm store config: {e}"),
            )
        })?;
        Ok(Arc::new(SsmStore::new(name, parsed).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdk_errors_classify_onto_the_taxonomy() {
        let not_found = classify_sdk_error(
            "sm",
            "db/creds",
            "resolve",
            "ResourceNotFoundException: Secrets Manager can't find the specified secret".into(),
        );
        assert!(matches!(not_found.kind(), umbra_error::ErrorKind::NotFound { .. }));

        let auth = classify_sdk_error(
            "sm",
            "db/creds",
            "resolve",
            "AccessDeniedException: not authorized".into(),
        );
        assert!(matches!(auth.kind(), umbra_error::ErrorKind::Auth { .. }));

        let throttle = classify_sdk_error(
            "sm",
            "db/creds",
            "resolve",
            "ThrottlingException: Rate exceeded".into(),
        );
        assert!(throttle.is_retryable());
    }

    #[test]
    fn ssm_names_are_absolute() {
        assert_eq!(
            SsmStore::parameter_name(&StoreRef::new("ssm", "app/db/password")),
            "/app/db/password"
        );
        assert_eq!(
            SsmStore::parameter_name(&StoreRef::new("ssm", "/already/absolute")),
            "/already/absolute"
        );
    }
}
