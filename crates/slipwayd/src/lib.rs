//! slipwayd — the Slipway daemon.
//!
//! Assembles the deployment subsystems around one runtime:
//! - State store and event bus
//! - Deployment orchestrator (blue-green, canary, rolling, recreate)
//! - Rollback engine with automatic triggers
//! - Metrics engine with alert rules
//! - Order scheduler and the alert event bridge
//!
//! The binary runs JSON order files against the in-memory runtime and
//! prints the resulting reports.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use slipway_core::SlipwayConfig;

pub mod order_file;
pub mod session;

pub use order_file::{OrderFile, SeedInstance};
pub use session::{run_orders, Rejection, RunSummary};

/// Load `slipway.toml`, or the stock settings when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SlipwayConfig> {
    match path {
        Some(path) => {
            let config = SlipwayConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => Ok(SlipwayConfig::default()),
    }
}
