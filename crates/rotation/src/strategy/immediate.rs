//! The `immediate` strategy: create, verify, deprecate.
//!
//! The new credential replaces the old one as part of creation, so a brief
//! unavailability window is acceptable. The simplest strategy and the
//! default for services without zero-downtime needs.

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

/// Create → verify → deprecate, with brief unavailability.
pub struct ImmediateStrategy {
    executor: Arc<dyn StepExecutor>,
    catalog: RwLock<Option<Arc<dyn ServiceCatalog>>>,
}

impl ImmediateStrategy {
    /// A strategy executing through `executor`.
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            catalog: RwLock::new(None),
        }
    }
}

#[async_trait]
impl RotationStrategy for ImmediateStrategy {
    fn name(&self) -> &'static str {
        "immediate"
    }

    async fn supports_secret(&self, _ctx: &OpContext, _info: &SecretInfo) -> bool {
        // Any credential can be replaced in place.
        true
    }

    async fn plan(&self, request: &RotationRequest) -> Result<RotationPlan> {
        let target = request.service_ref.to_string();
        Ok(RotationPlan {
            service_ref: request.service_ref.clone(),
            strategy: self.name().to_string(),
            steps: vec![
                PlanStep::new(
                    "create",
                    "create the replacement credential and install it",
                    StepAction::Create,
                    target.clone(),
                ),
                PlanStep::new(
                    "verify",
                    "verify the replacement credential works",
                    StepAction::Verify,
                    target.clone(),
                ),
                PlanStep::new(
                    "deprecate",
                    "retire the previous credential",
                    StepAction::Deprecate,
                    target,
                ),
            ],
            estimated_time: Duration::from_secs(30),
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
