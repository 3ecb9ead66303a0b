//! slipway-state — shared in-memory state for the deployment core.
//!
//! # Architecture
//!
//! The `StateStore` holds reports, deployment records and blue/green slot
//! status behind a single `Arc<RwLock<_>>`. It is `Clone` + `Send` +
//! `Sync` and is handed by reference to the scheduler, orchestrator and
//! rollback engine; there are no process-wide singletons. Locks are held
//! only for the duration of a map operation, never across an `.await`.
//!
//! The `EventBus` fans lifecycle events out to subscribers over unbounded
//! channels, so a live subscriber sees every event published after it
//! subscribed.

pub mod error;
pub mod events;
pub mod store;

pub use error::{StateError, StateResult};
pub use events::EventBus;
pub use store::StateStore;
