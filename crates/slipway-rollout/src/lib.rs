//! slipway-rollout — the deployment orchestrator.
//!
//! Drives one deployment through its phases against the container
//! runtime, with an explicit timeout on every wait and a cooperative
//! abort check between phases.
//!
//! ```text
//! Idle → DeployingInactiveSlot → Warmup → HealthVerifying
//!      → TrafficSwitching → Finalizing → Succeeded | Failed | RolledBack
//! ```
//!
//! Canary deployments walk `CanaryStep` phases between warmup and
//! finalizing; rolling deployments walk `RollingBatch` phases.

pub mod context;
pub mod orchestrator;
pub mod phase;
pub mod strategy;

pub use context::{GraceTasks, RolloutContext, RolloutOutcome};
pub use orchestrator::{DeployResult, DeploymentOrchestrator};
pub use phase::{batch_count, DeploymentPhase, PhaseBoard};
pub use strategy::{executor_for, StrategyExecutor};
