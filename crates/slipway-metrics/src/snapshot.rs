//! Metric snapshots and the bounded per-deployment ring.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use slipway_runtime::RuntimeMetrics;

/// Point-in-time metrics sample for a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub deployment_id: String,
    /// Unix epoch millis.
    pub timestamp: u64,
    pub response_time_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub throughput_rps: f64,
    pub request_count: u64,
    pub error_count: u64,
    /// Error rate (0.0–1.0).
    pub error_rate: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Synthetic 0–100 aggregate.
    pub health_score: f64,
    pub availability: f64,
}

impl MetricSnapshot {
    pub fn from_runtime(deployment_id: &str, metrics: &RuntimeMetrics, timestamp: u64) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            timestamp,
            response_time_ms: metrics.response_time_ms,
            latency_p50_ms: metrics.response_time_p50_ms,
            latency_p95_ms: metrics.response_time_p95_ms,
            latency_p99_ms: metrics.response_time_p99_ms,
            throughput_rps: metrics.throughput_rps,
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            error_rate: metrics.error_rate,
            cpu_percent: metrics.cpu_percent,
            memory_percent: metrics.memory_percent,
            health_score: health_score(metrics),
            availability: metrics.availability,
        }
    }
}

/// Aggregate health on a 0–100 scale.
///
/// Errors cost up to 50 points (1 per 0.1% error rate), p95 latency above
/// 500ms up to 20, CPU above 80% and memory above 85% up to 15 each.
pub fn health_score(m: &RuntimeMetrics) -> f64 {
    let error_penalty = (m.error_rate * 1000.0).min(50.0);
    let latency_penalty = ((m.response_time_p95_ms - 500.0).max(0.0) / 50.0).min(20.0);
    let cpu_penalty = (m.cpu_percent - 80.0).clamp(0.0, 15.0);
    let memory_penalty = (m.memory_percent - 85.0).clamp(0.0, 15.0);
    (100.0 - error_penalty - latency_penalty - cpu_penalty - memory_penalty).clamp(0.0, 100.0)
}

/// Bounded snapshot history per deployment, oldest dropped first.
#[derive(Clone)]
pub struct SnapshotRing {
    rings: Arc<RwLock<HashMap<String, VecDeque<MetricSnapshot>>>>,
    capacity: usize,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Append and trim in one write-lock section.
    pub async fn record(&self, snapshot: MetricSnapshot) {
        let mut rings = self.rings.write().await;
        let ring = rings
            .entry(snapshot.deployment_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));
        ring.push_back(snapshot);
        while ring.len() > self.capacity {
            ring.pop_front();
        }
    }

    pub async fn latest(&self, deployment_id: &str) -> Option<MetricSnapshot> {
        let rings = self.rings.read().await;
        rings.get(deployment_id).and_then(|r| r.back().cloned())
    }

    /// Up to `limit` most recent snapshots, newest first.
    pub async fn history(&self, deployment_id: &str, limit: usize) -> Vec<MetricSnapshot> {
        let rings = self.rings.read().await;
        rings
            .get(deployment_id)
            .map(|r| r.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, deployment_id: &str) -> usize {
        let rings = self.rings.read().await;
        rings.get(deployment_id).map(|r| r.len()).unwrap_or(0)
    }

    pub async fn remove(&self, deployment_id: &str) {
        self.rings.write().await.remove(deployment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: &str, ts: u64) -> MetricSnapshot {
        MetricSnapshot::from_runtime(id, &RuntimeMetrics::healthy(), ts)
    }

    #[tokio::test]
    async fn ring_drops_oldest_on_overflow() {
        let ring = SnapshotRing::new(1000);
        for ts in 0..1005 {
            ring.record(snap("d-1", ts)).await;
        }
        assert_eq!(ring.len("d-1").await, 1000);
        let history = ring.history("d-1", 2000).await;
        assert_eq!(history.first().unwrap().timestamp, 1004);
        assert_eq!(history.last().unwrap().timestamp, 5);
    }

    #[tokio::test]
    async fn rings_are_per_deployment() {
        let ring = SnapshotRing::new(10);
        ring.record(snap("d-1", 1)).await;
        ring.record(snap("d-2", 2)).await;
        assert_eq!(ring.latest("d-1").await.unwrap().timestamp, 1);
        assert_eq!(ring.latest("d-2").await.unwrap().timestamp, 2);
        ring.remove("d-1").await;
        assert!(ring.latest("d-1").await.is_none());
    }

    #[test]
    fn health_score_of_baseline_is_high() {
        let score = health_score(&RuntimeMetrics::healthy());
        assert!(score > 95.0, "score = {score}");
    }

    #[test]
    fn health_score_penalises_errors() {
        let score = health_score(&RuntimeMetrics::with_error_rate(0.06));
        assert!((score - 50.0).abs() < 1e-9, "score = {score}");
    }
}
