//! slipway-rollback — returning a deployment to its previous version.
//!
//! # Architecture
//!
//! ```text
//! RollbackEngine
//!   ├── create_rollback_plan(deployment) → gradual | immediate
//!   ├── execute_rollback(id, trigger)
//!   │   ├── verify-previous-version
//!   │   ├── scale-down-current
//!   │   ├── restore-previous
//!   │   ├── verify-health
//!   │   └── final checklist → history completed | failed
//!   └── setup_automatic_rollback_triggers(id, thresholds)
//!       └── per-deployment monitor task (30s), single-shot, 1h lifetime
//! ```
//!
//! Rollbacks are serialized per deployment: a second attempt while one is
//! running is rejected with `Conflict`.

pub mod engine;
pub mod history;
pub mod monitor;
pub mod plan;

pub use engine::RollbackEngine;
pub use history::{
    ChecklistItem, RollbackHistory, RollbackStatus, RollbackTrigger, StepOutcome, TriggerKind,
};
pub use monitor::evaluate_thresholds;
pub use plan::{
    create_rollback_plan, PlanKind, PlanThresholds, RiskAssessment, RiskLevel, RollbackPlan,
    RollbackStep, StepKind,
};
