//! Orders — the command surface accepted by the scheduler.
//!
//! An order is immutable once accepted. The scheduler wraps it in a
//! [`QueuedOrder`] which carries the mutable queue bookkeeping.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deployment::{RollbackThresholds, Strategy, TrafficLevel};

/// Caller-assigned order identifier.
pub type OrderId = String;

/// The command an order asks the scheduler to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Deploy,
    Rollback,
    Scale,
    Promote,
    Status,
    Abort,
}

impl Command {
    /// Commands that change what runs in an (application, environment) pair.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Command::Deploy | Command::Rollback | Command::Scale | Command::Promote
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Deploy => "deploy",
            Command::Rollback => "rollback",
            Command::Scale => "scale",
            Command::Promote => "promote",
            Command::Status => "status",
            Command::Abort => "abort",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order priority. Only `Critical` may supersede a queued conflicting order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// How strict the pre-deploy compliance gate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLevel {
    Basic,
    Standard,
    Strict,
}

/// Typed parameter bag. Which fields are required depends on the command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderParameters {
    pub application: Option<String>,
    pub environment: Option<String>,
    pub strategy: Option<Strategy>,
    /// Image tag to deploy (e.g. `billing:v2`).
    pub image: Option<String>,
    pub replicas: Option<u32>,
    /// Promote: environment whose current image is promoted.
    pub source_environment: Option<String>,
    /// Abort: the active order to abort.
    pub target_order_id: Option<OrderId>,
    /// Rollback/status: explicit deployment instead of the latest one.
    pub deployment_id: Option<String>,
    pub traffic: Option<TrafficLevel>,
    pub health_check_path: Option<String>,
    /// Error rate above which health samples fail (0.0–1.0).
    pub rollback_threshold: Option<f64>,
    /// Install an automatic rollback monitor with these thresholds after deploy.
    pub auto_rollback: Option<RollbackThresholds>,
}

/// Constraints the scheduler enforces on admission and execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConstraints {
    /// Unix epoch millis; must be in the future when the order arrives.
    pub deadline: Option<u64>,
    pub compliance_level: Option<ComplianceLevel>,
    pub max_rollback_time_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderContext {
    /// Orders that must complete successfully before this one may start.
    pub dependencies: Vec<OrderId>,
    pub requested_by: Option<String>,
    pub reason: Option<String>,
}

/// A command submitted to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub command: Command,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub parameters: OrderParameters,
    #[serde(default)]
    pub constraints: OrderConstraints,
    #[serde(default)]
    pub context: OrderContext,
}

impl Order {
    /// Create a bare order; fill parameters through the public fields.
    pub fn new(id: impl Into<String>, command: Command) -> Self {
        Self {
            id: id.into(),
            command,
            priority: Priority::Normal,
            parameters: OrderParameters::default(),
            constraints: OrderConstraints::default(),
            context: OrderContext::default(),
        }
    }

    /// Deploy `image` of `application` into `environment` (blue-green).
    pub fn deploy(
        id: impl Into<String>,
        application: &str,
        environment: &str,
        image: &str,
    ) -> Self {
        let mut order = Self::new(id, Command::Deploy);
        order.parameters.application = Some(application.to_string());
        order.parameters.environment = Some(environment.to_string());
        order.parameters.image = Some(image.to_string());
        order
    }

    /// Roll back the latest deployment of `application` in `environment`.
    pub fn rollback(id: impl Into<String>, application: &str, environment: &str) -> Self {
        let mut order = Self::new(id, Command::Rollback);
        order.parameters.application = Some(application.to_string());
        order.parameters.environment = Some(environment.to_string());
        order
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.parameters.strategy = Some(strategy);
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.context.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    /// The (application, environment) pair this order mutates, if any.
    pub fn mutation_target(&self) -> Option<(&str, &str)> {
        if !self.command.is_mutating() {
            return None;
        }
        let app = self.parameters.application.as_deref()?;
        let env = self.parameters.environment.as_deref()?;
        Some((app, env))
    }

    pub fn application(&self) -> Option<&str> {
        self.parameters.application.as_deref()
    }

    pub fn environment(&self) -> Option<&str> {
        self.parameters.environment.as_deref()
    }
}

/// Lifecycle of an order inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

/// An accepted order plus its queue bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOrder {
    pub order: Order,
    /// Unix epoch millis when the order was accepted.
    pub queued_at: u64,
    /// Unix epoch millis when the order is expected to start.
    pub estimated_start: u64,
    pub estimated_duration_secs: u64,
    pub dependencies: Vec<OrderId>,
    pub status: QueueStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutating_commands() {
        assert!(Command::Deploy.is_mutating());
        assert!(Command::Rollback.is_mutating());
        assert!(Command::Scale.is_mutating());
        assert!(!Command::Status.is_mutating());
        assert!(!Command::Abort.is_mutating());
    }

    #[test]
    fn critical_outranks_everything() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn mutation_target_requires_pair() {
        let order = Order::deploy("o-1", "billing", "production", "billing:v2");
        assert_eq!(order.mutation_target(), Some(("billing", "production")));

        let mut status = Order::new("o-2", Command::Status);
        status.parameters.application = Some("billing".into());
        status.parameters.environment = Some("production".into());
        assert_eq!(status.mutation_target(), None);
    }

    #[test]
    fn order_deserializes_with_defaults() {
        let json = r#"{
            "id": "o-9",
            "command": "deploy",
            "parameters": {
                "application": "billing",
                "environment": "staging",
                "image": "billing:v3",
                "strategy": "canary"
            }
        }"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.priority, Priority::Normal);
        assert_eq!(order.parameters.strategy, Some(Strategy::Canary));
        assert!(order.context.dependencies.is_empty());
    }
}
