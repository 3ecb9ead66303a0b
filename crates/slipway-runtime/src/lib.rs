//! slipway-runtime — the capabilities the deployment core consumes.
//!
//! The core never talks to a real orchestrator. It drives an injected
//! [`ContainerRuntime`] and gates images through an injected
//! [`SecurityScanner`]. [`InMemoryRuntime`] and [`StaticScanner`] are
//! complete in-process implementations used by the daemon's simulation
//! mode and by every test in the workspace.
//!
//! # Architecture
//!
//! ```text
//! ContainerRuntime (async trait)
//!   ├── deploy(config, target)
//!   ├── check_health(name, env, check) → bool
//!   ├── get_metrics(name, env) → RuntimeMetrics
//!   ├── switch_traffic(config, from, to)
//!   ├── route_canary(config, percentage)
//!   └── scale(name, env, replicas) → ScalingResult
//!
//! SecurityScanner (async trait)
//!   └── scan_image(tag) → SecurityScan
//! ```

pub mod error;
pub mod memory;
pub mod runtime;
pub mod scanner;

pub use error::{RuntimeError, RuntimeResult};
pub use memory::{FailPoint, InMemoryRuntime, RuntimeCall};
pub use runtime::{ContainerRuntime, RuntimeMetrics, ScalingResult};
pub use scanner::{SecurityScanner, StaticScanner};
