//! Deployment phases and the per-deployment phase board.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Current phase of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum DeploymentPhase {
    Idle,
    /// New version going into the inactive slot (or canary/primary).
    DeployingInactiveSlot,
    Warmup,
    HealthVerifying,
    TrafficSwitching,
    /// Canary: holding at a traffic percentage.
    CanaryStep { percentage: u8 },
    /// Rolling update: processing batch N of M.
    RollingBatch { current: u32, total: u32 },
    Finalizing,
    Succeeded,
    Failed { stage: String },
    /// Failed, with traffic returned to the previous version.
    RolledBack,
}

impl DeploymentPhase {
    /// Stage label used in errors and abort messages.
    pub fn stage(&self) -> String {
        match self {
            DeploymentPhase::Idle => "idle".into(),
            DeploymentPhase::DeployingInactiveSlot => "deploy".into(),
            DeploymentPhase::Warmup => "warmup".into(),
            DeploymentPhase::HealthVerifying => "health_verification".into(),
            DeploymentPhase::TrafficSwitching => "traffic_switch".into(),
            DeploymentPhase::CanaryStep { percentage } => format!("canary_{percentage}"),
            DeploymentPhase::RollingBatch { current, .. } => format!("rolling_batch_{current}"),
            DeploymentPhase::Finalizing => "finalize".into(),
            DeploymentPhase::Succeeded => "succeeded".into(),
            DeploymentPhase::Failed { stage } => stage.clone(),
            DeploymentPhase::RolledBack => "rolled_back".into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentPhase::Succeeded | DeploymentPhase::Failed { .. } | DeploymentPhase::RolledBack
        )
    }
}

/// Terminal phases remembered after their deployments finish.
const FINISHED_LIMIT: usize = 256;

#[derive(Default)]
struct Board {
    phases: HashMap<String, DeploymentPhase>,
    /// Deployments that reached a terminal phase, oldest first.
    finished: VecDeque<String>,
}

/// Observable phase per deployment id. Running deployments are always
/// on the board; only the most recent finished ones are kept.
#[derive(Clone)]
pub struct PhaseBoard {
    board: Arc<Mutex<Board>>,
    limit: usize,
}

impl Default for PhaseBoard {
    fn default() -> Self {
        Self::with_limit(FINISHED_LIMIT)
    }
}

impl PhaseBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            board: Arc::new(Mutex::new(Board::default())),
            limit,
        }
    }

    pub fn set(&self, deployment_id: &str, phase: DeploymentPhase) {
        let mut board = self.board.lock().unwrap_or_else(|p| p.into_inner());
        board.finished.retain(|id| id != deployment_id);
        if phase.is_terminal() {
            board.finished.push_back(deployment_id.to_string());
        }
        board.phases.insert(deployment_id.to_string(), phase);

        while board.finished.len() > self.limit {
            if let Some(oldest) = board.finished.pop_front() {
                board.phases.remove(&oldest);
            }
        }
    }

    pub fn get(&self, deployment_id: &str) -> Option<DeploymentPhase> {
        self.board
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .phases
            .get(deployment_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.board.lock().unwrap_or_else(|p| p.into_inner()).phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Number of batches for a rolling update.
pub fn batch_count(total_replicas: u32, batch_size: u32) -> u32 {
    if batch_size == 0 {
        return 1;
    }
    total_replicas.div_ceil(batch_size)
}
