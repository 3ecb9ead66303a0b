//! Event bridge — turns alert-driven requests into scheduler orders.
//!
//! Alert actions never call the rollback engine directly. They publish
//! `RollbackRequested` / `ScaleRequested`; the bridge consumes those and
//! submits orders, so the requests go through admission like any other.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use slipway_core::event::Severity;
use slipway_core::*;

use crate::scheduler::OrderScheduler;

/// Handle to the running bridge task.
pub struct EventBridge {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl EventBridge {
    /// Subscribe to the scheduler's event bus and start consuming.
    pub fn spawn(scheduler: OrderScheduler) -> Self {
        let events = scheduler.services().events.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(scheduler, events, shutdown_rx));
        info!("event bridge started");
        Self {
            handle,
            shutdown_tx,
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "event bridge task ended abnormally");
        }
    }
}

async fn run(
    scheduler: OrderScheduler,
    mut events: mpsc::UnboundedReceiver<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { return };
                handle_event(&scheduler, event);
            }
            _ = shutdown.changed() => {
                debug!("event bridge shutting down");
                return;
            }
        }
    }
}

fn handle_event(scheduler: &OrderScheduler, event: Event) {
    let order = match event {
        Event::RollbackRequested {
            deployment_id,
            reason,
            severity,
        } => rollback_order(scheduler, &deployment_id, &reason, severity),
        Event::ScaleRequested {
            deployment_id,
            replicas,
        } => scale_order(scheduler, &deployment_id, replicas),
        _ => return,
    };
    let Some(order) = order else { return };

    let id = order.id.clone();
    match scheduler.receive_order(order) {
        Ok(_) => info!(order_id = %id, "order submitted from alert"),
        Err(e) => warn!(order_id = %id, error = %e, "alert-driven order rejected"),
    }
}

fn lookup(scheduler: &OrderScheduler, deployment_id: &str) -> Option<Deployment> {
    match scheduler.services().state.get_deployment(deployment_id) {
        Ok(Some(d)) => Some(d),
        Ok(None) => {
            warn!(%deployment_id, "request for unknown deployment ignored");
            None
        }
        Err(e) => {
            warn!(%deployment_id, error = %e, "deployment lookup failed");
            None
        }
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn rollback_order(
    scheduler: &OrderScheduler,
    deployment_id: &str,
    reason: &str,
    severity: Severity,
) -> Option<Order> {
    let deployment = lookup(scheduler, deployment_id)?;
    if deployment.status == DeploymentStatus::RolledBack {
        debug!(%deployment_id, "already rolled back; request ignored");
        return None;
    }
    let mut order = Order::rollback(
        format!("alert-rollback-{}", short_id()),
        &deployment.application,
        &deployment.environment,
    )
    .with_priority(Priority::Critical);
    order.parameters.deployment_id = Some(deployment_id.to_string());
    order.context.reason = Some(format!("{reason} ({})", severity.as_str()));
    order.context.requested_by = Some("alert-bridge".to_string());
    Some(order)
}

fn scale_order(scheduler: &OrderScheduler, deployment_id: &str, replicas: u32) -> Option<Order> {
    let deployment = lookup(scheduler, deployment_id)?;
    let mut order = Order::new(format!("alert-scale-{}", short_id()), Command::Scale)
        .with_priority(Priority::High);
    order.parameters.application = Some(deployment.application);
    order.parameters.environment = Some(deployment.environment);
    order.parameters.deployment_id = Some(deployment_id.to_string());
    order.parameters.replicas = Some(replicas);
    order.context.requested_by = Some("alert-bridge".to_string());
    Some(order)
}
