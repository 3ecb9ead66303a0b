//! Lifecycle events published on the event bus.
//!
//! Consumers (the reporting/CLI layer, the scheduler's rollback bridge)
//! subscribe through `slipway_state::EventBus`.

use serde::{Deserialize, Serialize};

use crate::deployment::{DeploymentId, Strategy};
use crate::order::{Command, OrderId};

/// Severity of an alert or rollback trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderQueued {
        order_id: OrderId,
        command: Command,
    },
    OrderStarted {
        order_id: OrderId,
    },
    OrderCompleted {
        order_id: OrderId,
        deployment_id: Option<DeploymentId>,
    },
    OrderFailed {
        order_id: OrderId,
        stage: String,
        cause: String,
    },
    OrderCancelled {
        order_id: OrderId,
        reason: String,
    },
    DeploymentStarted {
        deployment_id: DeploymentId,
        application: String,
        environment: String,
        strategy: Strategy,
    },
    DeploymentCompleted {
        deployment_id: DeploymentId,
    },
    DeploymentFailed {
        deployment_id: DeploymentId,
        stage: String,
        cause: String,
    },
    DeploymentRolledBack {
        deployment_id: DeploymentId,
        rollback_id: String,
    },
    AlertTriggered {
        alert_id: String,
        deployment_id: DeploymentId,
        rule_id: String,
        severity: Severity,
        value: f64,
        threshold: f64,
    },
    /// An alert action asks for a rollback; consumed asynchronously.
    RollbackRequested {
        deployment_id: DeploymentId,
        reason: String,
        severity: Severity,
    },
    /// An alert action asks for a replica change; consumed asynchronously.
    ScaleRequested {
        deployment_id: DeploymentId,
        replicas: u32,
    },
    /// An automatic rollback failed and needs a human.
    RollbackEscalated {
        deployment_id: DeploymentId,
        reason: String,
    },
}

impl Event {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderQueued { .. } => "order_queued",
            Event::OrderStarted { .. } => "order_started",
            Event::OrderCompleted { .. } => "order_completed",
            Event::OrderFailed { .. } => "order_failed",
            Event::OrderCancelled { .. } => "order_cancelled",
            Event::DeploymentStarted { .. } => "deployment_started",
            Event::DeploymentCompleted { .. } => "deployment_completed",
            Event::DeploymentFailed { .. } => "deployment_failed",
            Event::DeploymentRolledBack { .. } => "deployment_rolled_back",
            Event::AlertTriggered { .. } => "alert_triggered",
            Event::RollbackRequested { .. } => "rollback_requested",
            Event::ScaleRequested { .. } => "scale_requested",
            Event::RollbackEscalated { .. } => "rollback_escalated",
        }
    }
}
