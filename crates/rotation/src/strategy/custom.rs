//! The `custom` strategy: steps supplied verbatim by the request.
//!
//! The engine performs action dispatch only; it does not reorder, validate
//! semantics, or invent steps. Useful for services whose rotation choreography
//! is defined in configuration rather than code.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use umbra_error::{Result, UmbraError};
use umbra_store::OpContext;

use crate::fingerprint::fingerprint;
use crate::model::{
    RotationPlan, RotationRequest, RotationResult, RotationStatusKind, SecretInfo,
};
use crate::strategy::{
    RotationStrategy, StepExecutor, execute_steps, finish_completed,
};

/// Dispatch the request's own steps, in order.
pub struct CustomStrategy {
    executor: Arc<dyn StepExecutor>,
}

impl CustomStrategy {
    /// A strategy executing through `executor`.
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl RotationStrategy for CustomStrategy {
    fn name(&self) -> &'static str {
        "custom"
    }

    async fn supports_secret(&self, _ctx: &OpContext, _info: &SecretInfo) -> bool {
        // Support is determined by whether the request carries steps, which
        // is checked at planning time.
        true
    }

    async fn plan(&self, request: &RotationRequest) -> Result<RotationPlan> {
        let steps = request
            .steps
            .clone()
            .filter(|steps| !steps.is_empty())
            .ok_or_else(|| {
                UmbraError::validation(
                    "custom strategy selected but the request carries no steps",
                )
                .with_suggestion("supply `steps` on the rotation request")
            })?;
        Ok(RotationPlan {
            service_ref: request.service_ref.clone(),
            strategy: self.name().to_string(),
            estimated_time: Duration::from_secs(15 * steps.len() as u64),
            steps,
            fingerprint: fingerprint(request),
            created_at: Utc::now(),
            metadata: request.metadata.clone(),
        })
    }

    #[tracing::instrument(skip(self, ctx, request), fields(service = %request.service_ref))]
    async fn rotate(&self, ctx: &OpContext, request: &RotationRequest) -> Result<RotationResult> {
        let plan = self.plan(request).await?;
        // Custom rotations never generate values; callers own the material.
        let new_value = request
            .new_value
            .clone()
            .unwrap_or_else(|| umbra_core::SecretString::new(""));

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
}
