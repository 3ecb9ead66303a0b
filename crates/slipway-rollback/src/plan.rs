//! Rollback plans.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use slipway_core::{Deployment, EnvironmentTier, TrafficLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    /// Production under high traffic: longer budget, strict thresholds.
    Gradual,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    VerifyPreviousVersion,
    ScaleDownCurrent,
    RestorePrevious,
    VerifyHealth,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::VerifyPreviousVersion => "verify_previous_version",
            StepKind::ScaleDownCurrent => "scale_down_current",
            StepKind::RestorePrevious => "restore_previous",
            StepKind::VerifyHealth => "verify_health",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackStep {
    /// Execution order, ascending from 1.
    pub order: u32,
    pub kind: StepKind,
    pub description: String,
    pub timeout_secs: u64,
}

impl RollbackStep {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Limits the final checklist holds the restored version to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanThresholds {
    pub error_rate: f64,
    pub response_time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub id: String,
    pub deployment_id: String,
    pub kind: PlanKind,
    pub target_image: Option<String>,
    pub steps: Vec<RollbackStep>,
    /// Sum of the step timeouts.
    pub estimated_duration_secs: u64,
    pub thresholds: PlanThresholds,
    pub risk: RiskAssessment,
}

impl RollbackPlan {
    /// Steps in execution order.
    pub fn ordered_steps(&self) -> Vec<RollbackStep> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

fn step(order: u32, kind: StepKind, description: &str, timeout_secs: u64) -> RollbackStep {
    RollbackStep {
        order,
        kind,
        description: description.to_string(),
        timeout_secs,
    }
}

fn assess_risk(deployment: &Deployment) -> RiskAssessment {
    let level = match EnvironmentTier::of(&deployment.environment) {
        EnvironmentTier::Production => RiskLevel::High,
        EnvironmentTier::Staging => RiskLevel::Medium,
        EnvironmentTier::Development => RiskLevel::Low,
    };
    let mut factors = vec![format!("{} environment", deployment.environment)];
    if deployment.traffic == TrafficLevel::High {
        factors.push("high traffic".to_string());
    }
    if deployment.previous_image.is_none() {
        factors.push("no previous version recorded".to_string());
    }
    RiskAssessment { level, factors }
}

/// Build the plan for rolling `deployment` back to its previous image.
pub fn create_rollback_plan(deployment: &Deployment) -> RollbackPlan {
    let gradual = EnvironmentTier::of(&deployment.environment) == EnvironmentTier::Production
        && deployment.traffic == TrafficLevel::High;

    let (kind, timeouts, thresholds) = if gradual {
        (
            PlanKind::Gradual,
            [60, 60, 120, 60],
            PlanThresholds {
                error_rate: 0.05,
                response_time_ms: 1000.0,
            },
        )
    } else {
        (
            PlanKind::Immediate,
            [30, 30, 30, 30],
            PlanThresholds {
                error_rate: 0.10,
                response_time_ms: 2000.0,
            },
        )
    };

    let steps = vec![
        step(
            1,
            StepKind::VerifyPreviousVersion,
            "Confirm a previous version is recorded",
            timeouts[0],
        ),
        step(
            2,
            StepKind::ScaleDownCurrent,
            "Scale the current version to zero",
            timeouts[1],
        ),
        step(
            3,
            StepKind::RestorePrevious,
            "Redeploy the previous version and route traffic to it",
            timeouts[2],
        ),
        step(
            4,
            StepKind::VerifyHealth,
            "Wait for the previous version to report healthy",
            timeouts[3],
        ),
    ];

    RollbackPlan {
        id: format!("rb-{}", uuid::Uuid::new_v4()),
        deployment_id: deployment.id.clone(),
        kind,
        target_image: deployment.previous_image.clone(),
        estimated_duration_secs: steps.iter().map(|s| s.timeout_secs).sum(),
        steps,
        thresholds,
        risk: assess_risk(deployment),
    }
}
