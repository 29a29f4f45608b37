//! Filesystem store: one file per secret under a configured root.
//!
//! Binary-capable: payloads that are not UTF-8 are delivered base64-encoded
//! with an `encoding` metadata marker. Path traversal out of the root is
//! rejected before any I/O.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use umbra_core::{Secret, SecretMetadata, StoreCapabilities, StoreRef};
use umbra_error::{Result, UmbraError};

use crate::context::OpContext;
use crate::contract::{SecretStore, StoreFactory};
use crate::extract::extract_field;

#[derive(Debug, Deserialize)]
struct FileConfig {
    /// Directory all secret paths are relative to.
    root: PathBuf,
}

/// Store reading secrets from files under a root directory.
pub struct FileStore {
    name: String,
    root: PathBuf,
}

impl FileStore {
    /// Build from a name and root directory.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Resolve the on-disk path, rejecting traversal and absolute paths.
    fn secret_path(&self, reference: &StoreRef) -> Result<PathBuf> {
        if reference.path.is_empty() {
            return Err(UmbraError::validation("empty key for file store"));
        }
        let relative = Path::new(&reference.path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(UmbraError::validation_field(
                &self.name,
                "path",
                format!("path '{}' escapes the store root", reference.path),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl SecretStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn resolve(&self, ctx: &OpContext, reference: &StoreRef) -> Result<Secret> {
        let path = self.secret_path(reference)?;
        let bytes = ctx
            .run("file resolve", async {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(UmbraError::not_found(&self.name, &reference.path))
                    }
                    Err(e) => Err(UmbraError::provider(&self.name, "resolve", e)),
                }
            })
            .await?;

        match String::from_utf8(bytes) {
            Ok(text) => {
                let trimmed = text.strip_suffix('\n').unwrap_or(&text);
                let value =
                    extract_field(&self.name, &reference.path, trimmed, reference.field.as_deref())?;
                Ok(Secret::new(value))
            }
            Err(raw) => {
                if reference.field.is_some() {
                    return Err(UmbraError::validation_field(
                        &self.name,
                        reference.field.as_deref().unwrap_or_default(),
                        "field extraction requested on a binary payload",
                    ));
                }
                Ok(Secret::new(BASE64.encode(raw.as_bytes()))
                    .with_metadata("encoding", "base64"))
            }
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(store = %self.name, path = %reference.path))]
    async fn describe(&self, ctx: &OpContext, reference: &StoreRef) -> Result<SecretMetadata> {
        let path = self.secret_path(reference)?;
        ctx.run("file describe", async {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    let updated_at = meta
                        .modified()
                        .ok()
                        .map(DateTime::<Utc>::from);
                    let mut out = SecretMetadata::present().with_size(meta.len());
                    out.updated_at = updated_at;
                    Ok(out)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(SecretMetadata::absent())
                }
                Err(e) => Err(UmbraError::provider(&self.name, "describe", e)),
            }
        })
        .await
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::none().with_metadata().with_binary()
    }

    async fn validate(&self, ctx: &OpContext) -> Result<()> {
        ctx.run("file validate", async {
            let meta = tokio::fs::metadata(&self.root)
                .await
                .map_err(|e| {
                    UmbraError::config(
                        format!("secret_stores.{}.config.root", self.name),
                        format!("store root '{}' is not accessible: {e}", self.root.display()),
                    )
                    .with_suggestion("create the directory or fix the configured root")
                })?;
            if !meta.is_dir() {
                return Err(UmbraError::config(
                    format!("secret_stores.{}.config.root", self.name),
                    format!("store root '{}' is not a directory", self.root.display()),
                ));
            }
            Ok(())
        })
        .await
    }
}

/// Factory for the `file` type.
pub struct FileFactory;

#[async_trait]
impl StoreFactory for FileFactory {
    fn type_name(&self) -> &'static str {
        "file"
    }

    async fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SecretStore>> {
        let parsed: FileConfig = serde_json::from_value(config.clone()).map_err(|e| {
            UmbraError::config(
                format!("secret_stores.{name}.config"),
                format!("invalid file store config: {e}"),
            )
            .with_suggestion("set `root` to the directory holding secret files")
        })?;
        Ok(Arc::new(FileStore::new(name, parsed.root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("token"), "tok-123\n").await.unwrap();
        tokio::fs::create_dir(dir.path().join("db")).await.unwrap();
        tokio::fs::write(
            dir.path().join("db/creds"),
            r#"{"username":"u","password":"p"}"#,
        )
        .await
        .unwrap();
        let store = FileStore::new("files", dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn resolves_and_trims_trailing_newline() {
        let (_dir, store) = fixture().await;
        let secret = store
            .resolve(&OpContext::new(), &StoreRef::new("files", "token"))
            .await
            .unwrap();
        secret.value.expose(|s| assert_eq!(s, "tok-123"));
    }

    #[tokio::test]
    async fn resolves_nested_path_with_field() {
        let (_dir, store) = fixture().await;
        let secret = store
            .resolve(
                &OpContext::new(),
                &StoreRef::new("files", "db/creds").with_field("password"),
            )
            .await
            .unwrap();
        secret.value.expose(|s| assert_eq!(s, "p"));
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_io() {
        let (_dir, store) = fixture().await;
        let err = store
            .resolve(&OpContext::new(), &StoreRef::new("files", "../etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Validation { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_not_found_and_describe_says_absent() {
        let (_dir, store) = fixture().await;
        let err = store
            .resolve(&OpContext::new(), &StoreRef::new("files", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::NotFound { .. }));

        let meta = store
            .describe(&OpContext::new(), &StoreRef::new("files", "nope"))
            .await
            .unwrap();
        assert!(!meta.exists);
    }

    #[tokio::test]
    async fn validate_fails_on_missing_root() {
        let store = FileStore::new("files", "/definitely/not/here/umbra");
        let err = store.validate(&OpContext::new()).await.unwrap_err();
        assert!(matches!(err.kind(), umbra_error::ErrorKind::Config { .. }));
    }
}
