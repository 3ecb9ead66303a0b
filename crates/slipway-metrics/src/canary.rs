//! Canary analysis — compare canary against stable and decide.

use serde::{Deserialize, Serialize};

use crate::snapshot::MetricSnapshot;

/// Error-rate increase that forces a rollback.
const ROLLBACK_ERROR_DELTA: f64 = 0.02;
/// Response-time increase (ms) that forces a rollback.
const ROLLBACK_LATENCY_DELTA_MS: f64 = 100.0;
/// Minimum canary success rate.
const MIN_SUCCESS_RATE: f64 = 0.95;
/// Deltas below these let the canary advance before 100%.
const CONTINUE_ERROR_DELTA: f64 = 0.01;
const CONTINUE_LATENCY_DELTA_MS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    Hold,
    Rollback,
}

/// Canary minus stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryComparison {
    pub error_rate_delta: f64,
    pub response_time_delta_ms: f64,
    pub throughput_delta: f64,
    /// `1 - canary.error_rate`.
    pub success_rate: f64,
}

/// One canary step's paired snapshots and decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryAnalysis {
    pub percentage: u8,
    pub canary: MetricSnapshot,
    pub stable: MetricSnapshot,
    pub comparison: CanaryComparison,
    pub verdict: Verdict,
    /// 0–100.
    pub confidence: f64,
    pub reason: String,
}

pub fn compare(canary: &MetricSnapshot, stable: &MetricSnapshot) -> CanaryComparison {
    CanaryComparison {
        error_rate_delta: canary.error_rate - stable.error_rate,
        response_time_delta_ms: canary.response_time_ms - stable.response_time_ms,
        throughput_delta: canary.throughput_rps - stable.throughput_rps,
        success_rate: 1.0 - canary.error_rate,
    }
}

fn rollback_reason(cmp: &CanaryComparison) -> Option<String> {
    if cmp.error_rate_delta > ROLLBACK_ERROR_DELTA {
        return Some(format!(
            "error rate delta {:.4} exceeds {ROLLBACK_ERROR_DELTA}",
            cmp.error_rate_delta
        ));
    }
    if cmp.response_time_delta_ms > ROLLBACK_LATENCY_DELTA_MS {
        return Some(format!(
            "response time delta {:.1}ms exceeds {ROLLBACK_LATENCY_DELTA_MS}ms",
            cmp.response_time_delta_ms
        ));
    }
    if cmp.success_rate < MIN_SUCCESS_RATE {
        return Some(format!(
            "success rate {:.4} below {MIN_SUCCESS_RATE}",
            cmp.success_rate
        ));
    }
    None
}

/// Rollback conditions win regardless of `percentage`.
pub fn determine_verdict(cmp: &CanaryComparison, percentage: u8) -> Verdict {
    if rollback_reason(cmp).is_some() {
        return Verdict::Rollback;
    }
    if percentage >= 100 {
        return Verdict::Continue;
    }
    if cmp.error_rate_delta.abs() < CONTINUE_ERROR_DELTA
        && cmp.response_time_delta_ms.abs() < CONTINUE_LATENCY_DELTA_MS
    {
        return Verdict::Continue;
    }
    Verdict::Hold
}

/// `100 - 1000|Δerr| - 0.1|Δrt| - 0.1|Δthroughput|`, clamped to 0–100.
pub fn confidence(cmp: &CanaryComparison) -> f64 {
    (100.0
        - 1000.0 * cmp.error_rate_delta.abs()
        - 0.1 * cmp.response_time_delta_ms.abs()
        - 0.1 * cmp.throughput_delta.abs())
    .clamp(0.0, 100.0)
}

pub fn analyze(percentage: u8, canary: MetricSnapshot, stable: MetricSnapshot) -> CanaryAnalysis {
    let comparison = compare(&canary, &stable);
    let verdict = determine_verdict(&comparison, percentage);
    let reason = match verdict {
        Verdict::Rollback => rollback_reason(&comparison).unwrap_or_default(),
        Verdict::Continue => "canary within tolerance".to_string(),
        Verdict::Hold => "canary deviates from stable; observing longer".to_string(),
    };
    CanaryAnalysis {
        percentage,
        confidence: confidence(&comparison),
        canary,
        stable,
        comparison,
        verdict,
        reason,
    }
}
