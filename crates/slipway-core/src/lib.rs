//! slipway-core — shared vocabulary for the Slipway deployment core.
//!
//! Every other crate in the workspace speaks in these types: orders and
//! their queue entries, deployments and blue/green slots, reports, the
//! lifecycle events published on the event bus, and the error taxonomy
//! that execution failures are reported through.
//!
//! Configuration lives here too: `slipway.toml` is parsed into a
//! [`SlipwayConfig`] whose sections are handed to each subsystem.

pub mod config;
pub mod deployment;
pub mod error;
pub mod event;
pub mod order;
pub mod report;
pub mod scan;
pub mod signal;

pub use config::{
    ConfigError, MetricsSettings, OrchestratorSettings, RollbackSettings, SchedulerSettings,
    SlipwayConfig,
};
pub use deployment::*;
pub use error::{SlipwayError, SlipwayResult};
pub use event::Event;
pub use order::*;
pub use report::*;
pub use scan::*;
pub use signal::{AbortHandle, AbortSignal};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
