//! Execution reports — one per order, success or failure.

use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentId;
use crate::order::{Command, Order, OrderId};
use crate::scan::SecurityScan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    InProgress,
    Success,
    Failed,
    Cancelled,
}

impl ReportStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReportStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
    Critical,
}

/// One lifecycle entry in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    /// Unix epoch millis.
    pub timestamp: u64,
    pub level: EventLevel,
    pub stage: String,
    pub message: String,
}

/// Where and why an order failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: String,
    pub stage: String,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub order_id: OrderId,
    pub command: Command,
    pub application: Option<String>,
    pub environment: Option<String>,
    pub deployment_id: Option<DeploymentId>,
    pub status: ReportStatus,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub duration_ms: Option<u64>,
    pub events: Vec<ReportEvent>,
    /// 0–100, penalised by error/warning events and long runtimes.
    pub quality_score: u32,
    /// 0–100, derived from the security scan.
    pub compliance_score: u32,
    pub security_scan: Option<SecurityScan>,
    pub failure: Option<FailureDetail>,
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
    /// Command-specific payload (scaling result, status view, …).
    pub details: serde_json::Value,
}

impl Report {
    /// Fresh `in_progress` report for `order`.
    pub fn start(order: &Order, now: u64) -> Self {
        Self {
            order_id: order.id.clone(),
            command: order.command,
            application: order.parameters.application.clone(),
            environment: order.parameters.environment.clone(),
            deployment_id: None,
            status: ReportStatus::InProgress,
            started_at: now,
            completed_at: None,
            duration_ms: None,
            events: Vec::new(),
            quality_score: 100,
            compliance_score: 100,
            security_scan: None,
            failure: None,
            recommendations: Vec::new(),
            next_steps: Vec::new(),
            details: serde_json::Value::Null,
        }
    }

    pub fn record(&mut self, level: EventLevel, stage: &str, message: impl Into<String>) {
        self.events.push(ReportEvent {
            timestamp: crate::epoch_millis(),
            level,
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    pub fn count_events(&self, levels: &[EventLevel]) -> usize {
        self.events
            .iter()
            .filter(|e| levels.contains(&e.level))
            .count()
    }
}
