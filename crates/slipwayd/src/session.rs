//! One daemon session: assemble the subsystems, feed them an order file,
//! collect the reports, tear everything down.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use slipway_core::{Order, Report, ReportStatus, SlipwayConfig, SlipwayError};
use slipway_runtime::{InMemoryRuntime, StaticScanner};
use slipway_scheduler::{EventBridge, OrderScheduler, Services};

use crate::order_file::OrderFile;

/// An order the scheduler refused at admission.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub order_id: String,
    pub kind: String,
    pub error: String,
}

/// Everything a session produced, in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reports: Vec<Report>,
    pub rejected: Vec<Rejection>,
}

impl RunSummary {
    /// True when every order was accepted and succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.rejected.is_empty()
            && self
                .reports
                .iter()
                .all(|r| r.status == ReportStatus::Success)
    }

    pub fn report(&self, order_id: &str) -> Option<&Report> {
        self.reports.iter().find(|r| r.order_id == order_id)
    }
}

/// Run every order in `file` against `runtime` and wait for all reports.
pub async fn run_orders(
    config: &SlipwayConfig,
    file: OrderFile,
    runtime: Arc<InMemoryRuntime>,
) -> anyhow::Result<RunSummary> {
    for seed in &file.instances {
        runtime.seed_instance(&seed.name, &seed.environment, &seed.image, seed.replicas);
    }
    let scanner = file
        .scans
        .into_iter()
        .fold(StaticScanner::new(), |scanner, scan| {
            let image = scan.image.clone();
            scanner.with_result(&image, scan)
        });

    let services = Services::new(runtime, Arc::new(scanner), config);
    let scheduler = OrderScheduler::new(services.clone(), config.scheduler.clone());
    let bridge = EventBridge::spawn(scheduler.clone());
    info!(orders = file.orders.len(), "session started");

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for order in file.orders {
        let id = order.id.clone();
        match submit(&scheduler, order).await {
            Ok(()) => accepted.push(id),
            Err(e) => {
                warn!(order_id = %id, error = %e, "order rejected");
                rejected.push(Rejection {
                    order_id: id,
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    let mut reports = Vec::with_capacity(accepted.len());
    for id in &accepted {
        reports.push(scheduler.wait_for_report(id).await?);
    }
    scheduler.drain().await;

    bridge.shutdown().await;
    services.shutdown().await;
    info!(
        reports = reports.len(),
        rejected = rejected.len(),
        "session finished"
    );
    Ok(RunSummary { reports, rejected })
}

/// Orders in a file often touch the same pair back to back. A conflict
/// with work already in flight waits for the scheduler to go idle and is
/// retried once.
async fn submit(scheduler: &OrderScheduler, order: Order) -> Result<(), SlipwayError> {
    match scheduler.receive_order(order.clone()) {
        Err(SlipwayError::Conflict(reason)) => {
            info!(order_id = %order.id, %reason, "waiting for conflicting work to finish");
            scheduler.drain().await;
            scheduler.receive_order(order).map(|_| ())
        }
        other => other.map(|_| ()),
    }
}
