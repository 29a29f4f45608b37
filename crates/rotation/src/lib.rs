//! Umbra rotation engine
//!
//! Credential rotation as a pipeline: a [`RotationRequest`] selects (or is
//! assigned) a [`strategy`](crate::strategy::RotationStrategy), the engine
//! plans, executes, verifies and (when needed) rolls back, every action
//! lands in the result's audit trail, and the outcome is persisted as
//! append-only NDJSON history plus an atomically rewritten status document
//! per service. Fingerprints give retries at-most-once semantics; lifecycle
//! events and metrics fan out without ever blocking the pipeline.

pub mod catalog;
pub mod engine;
pub mod events;
pub mod fingerprint;
pub mod generate;
pub mod model;
pub mod store;
pub mod strategy;
pub mod ttl;
pub mod validator;

pub use catalog::{
    Constraints, CredentialKindDef, ServiceCatalog, ServiceInstanceDef, ServiceTypeDef,
    StaticCatalog,
};
pub use engine::{DEFAULT_BATCH_CONCURRENCY, RotationEngine, RotationEngineBuilder};
pub use events::{
    EventBus, EventSink, MetricsRecorder, RotationEvent, RotationEventType, TracingMetrics,
};
pub use fingerprint::fingerprint;
pub use model::{
    AuditEntry, AuditStatus, HistoryRecord, PlanStep, RotationPlan, RotationRequest,
    RotationResult, RotationStatus, RotationStatusKind, SecretInfo, ServiceRotationState,
    StepAction,
};
pub use store::RotationStore;
pub use strategy::{
    CustomStrategy, ImmediateStrategy, OverlapStrategy, RecordingExecutor, RotationStrategy,
    StepExecutor, StepOutcome, StrategyRegistry, TwoKeyStrategy,
};
pub use ttl::parse_ttl;
pub use validator::{ValidationReport, validate_credential};

/// Commonly used types.
pub mod prelude {
    pub use crate::catalog::{ServiceCatalog, StaticCatalog};
    pub use crate::engine::RotationEngine;
    pub use crate::model::{
        RotationRequest, RotationResult, RotationStatusKind, SecretInfo,
    };
    pub use crate::strategy::{RotationStrategy, StepExecutor};
    pub use umbra_core::prelude::*;
}
