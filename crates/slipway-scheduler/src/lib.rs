//! slipway-scheduler — order admission, dispatch and reporting.
//!
//! # Architecture
//!
//! ```text
//! receive_order(order)
//!   ├── validate            (per-command fields, deadline, replica limit)
//!   ├── check conflicts     (one mutating order per application/environment)
//!   └── queue               (estimated start + duration)
//!
//! process_order_queue()     dispatch while processing < cap (3)
//!   └── execute_order       → command handler → Report (always stored)
//!
//! EventBridge               RollbackRequested / ScaleRequested → orders
//! ```
//!
//! Command handlers live in [`handlers::Services`], which also owns the
//! orchestrator, rollback engine and metrics engine the orders drive.

pub mod admission;
pub mod bridge;
pub mod handlers;
pub mod scheduler;
pub mod scoring;

pub use bridge::EventBridge;
pub use handlers::Services;
pub use scheduler::{CancelOutcome, OrderScheduler, OrderState, QueueSnapshot};
