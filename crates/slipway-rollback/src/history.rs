//! Rollback triggers and history records.

use serde::{Deserialize, Serialize};

use slipway_core::event::Severity;

use crate::plan::{RollbackPlan, StepKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Automatic,
}

/// Why a rollback was started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackTrigger {
    pub kind: TriggerKind,
    pub reason: String,
    pub severity: Severity,
    pub initiated_by: String,
}

impl RollbackTrigger {
    pub fn manual(reason: &str, initiated_by: &str) -> Self {
        Self {
            kind: TriggerKind::Manual,
            reason: reason.to_string(),
            severity: Severity::Medium,
            initiated_by: initiated_by.to_string(),
        }
    }

    pub fn automatic(reason: &str, severity: Severity) -> Self {
        Self {
            kind: TriggerKind::Automatic,
            reason: reason.to_string(),
            severity,
            initiated_by: "rollback-monitor".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    InProgress,
    Completed,
    Failed,
}

impl RollbackStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RollbackStatus::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub kind: StepKind,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// One rollback attempt. Frozen once completed or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackHistory {
    pub id: String,
    pub deployment_id: String,
    pub trigger: RollbackTrigger,
    pub plan: RollbackPlan,
    pub status: RollbackStatus,
    pub steps: Vec<StepOutcome>,
    pub checklist: Vec<ChecklistItem>,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}
