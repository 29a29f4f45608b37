//! The `two-key` strategy: zero-downtime rotation over versioned storage.
//!
//! A secondary credential is created alongside the primary, verified end to
//! end, promoted, and only then is the old key deprecated. Requires the
//! backing store to support versioning so both keys can exist at once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use umbra_error::Result;
use umbra_store::OpContext;

use crate::catalog::ServiceCatalog;
use crate::fingerprint::fingerprint;
use crate::model::{
    PlanStep, RotationPlan, RotationRequest, RotationResult, RotationStatusKind, SecretInfo,
    StepAction,
};
use crate::strategy::{
    RotationStrategy, StepExecutor, execute_steps, finish_completed, replacement_value,
};

/// Create-secondary → verify → promote → deprecate-old; zero downtime.
pub struct TwoKeyStrategy {
    executor: Arc<dyn StepExecutor>,
    catalog: RwLock<Option<Arc<dyn ServiceCatalog>>>,
}

impl TwoKeyStrategy {
    /// A strategy executing through `executor`.
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            catalog: RwLock::new(None),
        }
    }
}

#[async_trait]
impl RotationStrategy for TwoKeyStrategy {
    fn name(&self) -> &'static str {
        "two-key"
    }

    async fn supports_secret(&self, _ctx: &OpContext, info: &SecretInfo) -> bool {
        // Both keys must be addressable at once; that is what store
        // versioning provides. Unknown capabilities mean no.
        info.capabilities.as_ref().is_some_and(|c| c.versioning)
    }

    async fn plan(&self, request: &RotationRequest) -> Result<RotationPlan> {
        let target = request.service_ref.to_string();
        Ok(RotationPlan {
            service_ref: request.service_ref.clone(),
            strategy: self.name().to_string(),
            steps: vec![
                PlanStep::new(
                    "create-secondary",
                    "create the secondary credential alongside the primary",
                    StepAction::Create,
                    target.clone(),
                ),
                PlanStep::new(
                    "verify-secondary",
                    "verify the secondary credential end to end",
                    StepAction::Verify,
                    target.clone(),
                ),
                PlanStep::new(
                    "promote",
                    "promote the secondary credential to primary",
                    StepAction::Promote,
                    target.clone(),
                ),
                PlanStep::new(
                    "deprecate-old",
                    "retire the previous primary credential",
                    StepAction::Deprecate,
                    target,
                ),
            ],
            estimated_time: Duration::from_secs(60),
            fingerprint: fingerprint(request),
            created_at: Utc::now(),
            metadata: request.metadata.clone(),
        })
    }

    #[tracing::instrument(skip(self, ctx, request), fields(service = %request.service_ref))]
    async fn rotate(&self, ctx: &OpContext, request: &RotationRequest) -> Result<RotationResult> {
        let plan = self.plan(request).await?;
        let new_value = replacement_value(&self.catalog, request);

        let mut result = RotationResult::pending(plan.clone());
        result.status = RotationStatusKind::InProgress;
        let mut executed = Vec::new();

        let ok = execute_steps(
            ctx,
            self.name(),
            request,
            &plan.steps,
            &self.executor,
            &new_value,
            &mut result,
            &mut executed,
        )
        .await;
        if ok {
            finish_completed(&mut result, self.name());
        }
        Ok(result)
    }

    fn set_catalog(&self, catalog: Arc<dyn ServiceCatalog>) {
        *self.catalog.write() = Some(catalog);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RecordingExecutor;
    use umbra_core::{ServiceRef, StoreCapabilities};

    fn info_with_versioning(versioning: bool) -> SecretInfo {
        let caps = if versioning {
            StoreCapabilities::none().with_versioning()
        } else {
            StoreCapabilities::none()
        };
        SecretInfo::new(ServiceRef::new("postgres", "prod-db", "password"))
            .with_store("vault", caps)
    }

    #[tokio::test]
    async fn requires_versioning_capability() {
        let strategy = TwoKeyStrategy::new(Arc::new(RecordingExecutor::new()));
        let ctx = OpContext::new();
        assert!(strategy.supports_secret(&ctx, &info_with_versioning(true)).await);
        assert!(!strategy.supports_secret(&ctx, &info_with_versioning(false)).await);
        // Unknown capabilities: refuse rather than guess.
        let unknown = SecretInfo::new(ServiceRef::new("postgres", "db", "password"));
        assert!(!strategy.supports_secret(&ctx, &unknown).await);
    }

    #[tokio::test]
    async fn plan_keeps_both_keys_until_promotion() {
        let strategy = TwoKeyStrategy::new(Arc::new(RecordingExecutor::new()));
        let request =
            RotationRequest::new(ServiceRef::new("postgres", "prod-db", "password"));
        let plan = strategy.plan(&request).await.unwrap();
        let names: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["create-secondary", "verify-secondary", "promote", "deprecate-old"]
        );
    }
}
