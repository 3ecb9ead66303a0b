//! Error taxonomy shared by the scheduler, orchestrator and rollback engine.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the deployment core.
pub type SlipwayResult<T> = Result<T, SlipwayError>;

/// Everything that can stop an order from completing.
///
/// `Validation` and `Conflict` are raised synchronously on admission,
/// before the container runtime is touched. The rest surface from
/// execution and end up in a failed report.
#[derive(Debug, Error)]
pub enum SlipwayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resources exhausted: {message}")]
    ResourceExhaustion {
        message: String,
        alternatives: Vec<String>,
    },

    #[error("{stage} timed out after {after_secs}s")]
    Timeout { stage: String, after_secs: u64 },

    #[error("health verification failed: {passed}/{total} samples passed")]
    HealthCheckFailure { passed: u32, total: u32 },

    #[error("traffic switch failed: error rate {error_rate:.4} exceeds threshold {threshold:.4}")]
    TrafficSwitchFailure { error_rate: f64, threshold: f64 },

    #[error("rollback failed at {step}: {cause}")]
    RollbackFailure { step: String, cause: String },

    #[error("security gate blocked {image}: {}", .reasons.join("; "))]
    SecurityGate { image: String, reasons: Vec<String> },

    #[error("canary rejected at {percentage}%: {reason}")]
    CanaryRejected { percentage: u8, reason: String },

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("runtime error during {stage}: {message}")]
    Runtime { stage: String, message: String },

    #[error("state error: {0}")]
    State(String),
}

impl SlipwayError {
    pub fn timeout(stage: &str, after: Duration) -> Self {
        SlipwayError::Timeout {
            stage: stage.to_string(),
            after_secs: after.as_secs(),
        }
    }

    /// Short machine-friendly name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            SlipwayError::Validation(_) => "validation_error",
            SlipwayError::Conflict(_) => "conflict_error",
            SlipwayError::ResourceExhaustion { .. } => "resource_exhaustion_error",
            SlipwayError::Timeout { .. } => "timeout_error",
            SlipwayError::HealthCheckFailure { .. } => "health_check_failure",
            SlipwayError::TrafficSwitchFailure { .. } => "traffic_switch_failure",
            SlipwayError::RollbackFailure { .. } => "rollback_failure",
            SlipwayError::SecurityGate { .. } => "security_gate",
            SlipwayError::CanaryRejected { .. } => "canary_rejected",
            SlipwayError::Aborted(_) => "aborted",
            SlipwayError::NotFound(_) => "not_found",
            SlipwayError::Runtime { .. } => "runtime_error",
            SlipwayError::State(_) => "state_error",
        }
    }

    /// The stage an execution error belongs to.
    pub fn stage(&self) -> &str {
        match self {
            SlipwayError::Validation(_)
            | SlipwayError::Conflict(_)
            | SlipwayError::ResourceExhaustion { .. } => "admission",
            SlipwayError::Timeout { stage, .. } | SlipwayError::Runtime { stage, .. } => stage,
            SlipwayError::HealthCheckFailure { .. } => "health_verification",
            SlipwayError::TrafficSwitchFailure { .. } => "traffic_switch",
            SlipwayError::RollbackFailure { .. } => "rollback",
            SlipwayError::SecurityGate { .. } => "security_scan",
            SlipwayError::CanaryRejected { .. } => "canary_analysis",
            SlipwayError::Aborted(_) => "abort",
            SlipwayError::NotFound(_) | SlipwayError::State(_) => "lookup",
        }
    }

    /// Operator-facing next actions for a failed order.
    pub fn recommended_actions(&self) -> Vec<String> {
        let actions: &[&str] = match self {
            SlipwayError::Validation(_) => &["Fix the order parameters and resubmit"],
            SlipwayError::Conflict(_) => &[
                "Wait for the conflicting order to finish",
                "Resubmit with critical priority to supersede queued work",
            ],
            SlipwayError::ResourceExhaustion { .. } => &[
                "Retry once the queue drains",
                "Cancel lower-priority queued orders",
            ],
            SlipwayError::Timeout { .. } => &[
                "Inspect container logs for slow startup",
                "Increase the phase timeout if startup is legitimately slow",
            ],
            SlipwayError::HealthCheckFailure { .. } => &[
                "Inspect the new version's health endpoint and error logs",
                "Fix the regression and redeploy",
            ],
            SlipwayError::TrafficSwitchFailure { .. } => &[
                "Confirm traffic returned to the previous slot",
                "Compare error rates under production load before retrying",
            ],
            SlipwayError::RollbackFailure { .. } => &[
                "Escalate to the on-call engineer",
                "Restore the previous version manually",
            ],
            SlipwayError::SecurityGate { .. } => &[
                "Patch critical vulnerabilities and rebuild the image",
                "Remove exposed secrets from the image",
            ],
            SlipwayError::CanaryRejected { .. } => &[
                "Compare canary and stable metrics",
                "Fix the regression before restarting the canary",
            ],
            SlipwayError::Aborted(_) => &["Resubmit the order when ready"],
            SlipwayError::NotFound(_) => &["Check the application and environment names"],
            SlipwayError::Runtime { .. } => &[
                "Check container runtime availability",
                "Retry the order",
            ],
            SlipwayError::State(_) => &["Retry the order"],
        };
        actions.iter().map(|a| a.to_string()).collect()
    }
}
