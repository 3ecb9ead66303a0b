//! slipway-metrics — observation and decisions for live deployments.
//!
//! Samples runtime metrics into per-deployment snapshot rings, evaluates
//! alert rules with cooldown, and computes canary verdicts.
//!
//! # Architecture
//!
//! ```text
//! MetricsEngine
//!   ├── start_monitoring() → per-deployment sampling task (30s)
//!   │   ├── capture_snapshot() → SnapshotRing (last 1000)
//!   │   └── evaluate_alert_rules() → Alert + actions
//!   │       ├── webhook/email/slack → NotifyCallback
//!   │       └── rollback/scale → Event on the EventBus
//!   └── stop_monitoring() / stop_all()
//!
//! canary
//!   └── analyze(percentage, canary, stable) → CanaryAnalysis
//! ```

pub mod alerts;
pub mod canary;
pub mod engine;
pub mod snapshot;

pub use alerts::{default_rules, Alert, AlertAction, AlertCondition, AlertRule};
pub use canary::{analyze, compare, confidence, determine_verdict, CanaryAnalysis, CanaryComparison, Verdict};
pub use engine::{MetricsEngine, NotifyCallback};
pub use snapshot::{MetricSnapshot, SnapshotRing};
