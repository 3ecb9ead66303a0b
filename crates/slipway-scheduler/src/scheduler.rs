//! Order scheduler — admission, conflict resolution and bounded dispatch.
//!
//! The `OrderScheduler` is the control loop that:
//! - Validates orders and rejects conflicting ones before any runtime call
//! - Queues accepted orders with start and duration estimates
//! - Dispatches eligible orders while fewer than the cap are processing
//! - Produces exactly one report per order, whatever the outcome

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use slipway_core::*;

use crate::admission;
use crate::handlers::Services;
use crate::scoring;

/// An order currently being executed.
struct ActiveOrder {
    order: Order,
    abort: AbortHandle,
}

#[derive(Default)]
struct Ledger {
    /// Queued orders in insertion order.
    queue: Vec<QueuedOrder>,
    active: HashMap<OrderId, ActiveOrder>,
    completed: u64,
    completed_secs: f64,
}

impl Ledger {
    fn average_secs(&self, seed: u64) -> f64 {
        if self.completed == 0 {
            seed as f64
        } else {
            self.completed_secs / self.completed as f64
        }
    }

    /// Orders (active or queued) mutating the same pair as `order`.
    fn conflicts_with(&self, order: &Order) -> (Vec<OrderId>, Vec<OrderId>) {
        let Some(target) = order.mutation_target() else {
            return (Vec::new(), Vec::new());
        };
        let active = self
            .active
            .values()
            .filter(|a| a.order.mutation_target() == Some(target))
            .map(|a| a.order.id.clone())
            .collect();
        let queued = self
            .queue
            .iter()
            .filter(|q| q.order.mutation_target() == Some(target))
            .map(|q| q.order.id.clone())
            .collect();
        (active, queued)
    }
}

/// Where an order stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "record", rename_all = "snake_case")]
pub enum OrderState {
    Queued(QueuedOrder),
    Processing(Report),
    Finished(Report),
}

impl OrderState {
    pub fn report(&self) -> Option<&Report> {
        match self {
            OrderState::Queued(_) => None,
            OrderState::Processing(r) | OrderState::Finished(r) => Some(r),
        }
    }
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub queued: Vec<QueuedOrder>,
    pub processing: Vec<OrderId>,
    pub max_concurrent: usize,
    pub average_processing_secs: f64,
}

/// Result of [`OrderScheduler::cancel_order`].
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The order was still queued and has been removed.
    Dequeued(Report),
    /// The order was running; an abort order was executed against it.
    AbortRequested(Report),
}

/// Releases an active order's registration when dropped.
struct Registration {
    ledger: Arc<Mutex<Ledger>>,
    order_id: OrderId,
    started: Instant,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|p| p.into_inner());
        if ledger.active.remove(&self.order_id).is_some() {
            ledger.completed += 1;
            ledger.completed_secs += self.started.elapsed().as_secs_f64();
        }
    }
}

#[derive(Clone)]
pub struct OrderScheduler {
    services: Services,
    settings: SchedulerSettings,
    ledger: Arc<Mutex<Ledger>>,
    finished: Arc<Notify>,
}

impl OrderScheduler {
    pub fn new(services: Services, settings: SchedulerSettings) -> Self {
        Self {
            services,
            settings,
            ledger: Arc::new(Mutex::new(Ledger::default())),
            finished: Arc::new(Notify::new()),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Validate, check conflicts, queue, and kick the dispatcher.
    ///
    /// Every rejection happens here, before the container runtime sees
    /// the order. A `critical` order supersedes queued non-critical
    /// orders on the same (application, environment) pair.
    pub fn receive_order(&self, order: Order) -> SlipwayResult<QueuedOrder> {
        let now = epoch_millis();
        admission::validate(&order, &self.settings, now)?;

        let (queued, superseded) = {
            let mut ledger = self.ledger();
            if ledger.active.contains_key(&order.id)
                || ledger.queue.iter().any(|q| q.order.id == order.id)
                || self.services.state.get_report(&order.id)?.is_some()
            {
                return Err(SlipwayError::Conflict(format!(
                    "order {} already exists",
                    order.id
                )));
            }
            for dep in &order.context.dependencies {
                let known = ledger.active.contains_key(dep)
                    || ledger.queue.iter().any(|q| &q.order.id == dep)
                    || self.services.state.get_report(dep)?.is_some();
                if !known {
                    return Err(SlipwayError::Validation(format!(
                        "unknown dependency {dep}"
                    )));
                }
            }

            let superseded_ids = self.check_order_conflicts(&ledger, &order)?;
            if ledger.queue.len() - superseded_ids.len() >= self.settings.max_queue_size {
                return Err(SlipwayError::ResourceExhaustion {
                    message: format!(
                        "queue is full ({} orders)",
                        self.settings.max_queue_size
                    ),
                    alternatives: vec![
                        "Retry once queued orders drain".to_string(),
                        "Cancel lower-priority queued orders".to_string(),
                    ],
                });
            }
            let mut superseded = Vec::new();
            ledger.queue.retain(|q| {
                if superseded_ids.contains(&q.order.id) {
                    superseded.push(q.order.clone());
                    false
                } else {
                    true
                }
            });

            let depth = ledger.queue.len();
            let average = ledger.average_secs(self.settings.default_processing_secs);
            let queued = QueuedOrder {
                queued_at: now,
                estimated_start: admission::estimated_start(now, depth, average),
                estimated_duration_secs: admission::estimated_duration_secs(&order),
                dependencies: order.context.dependencies.clone(),
                status: QueueStatus::Queued,
                order,
            };
            ledger.queue.push(queued.clone());
            (queued, superseded)
        };

        for old in superseded {
            warn!(order_id = %old.id, by = %queued.order.id, "queued order superseded");
            let reason = format!("superseded by critical order {}", queued.order.id);
            self.close_unstarted(&old, ReportStatus::Cancelled, None, reason);
        }

        info!(
            order_id = %queued.order.id,
            command = %queued.order.command,
            priority = ?queued.order.priority,
            estimated_start = queued.estimated_start,
            "order queued"
        );
        self.services.events.publish(Event::OrderQueued {
            order_id: queued.order.id.clone(),
            command: queued.order.command,
        });
        self.process_order_queue();
        Ok(queued)
    }

    /// Queued orders `order` may supersede; `Conflict` if it may not run.
    fn check_order_conflicts(&self, ledger: &Ledger, order: &Order) -> SlipwayResult<Vec<OrderId>> {
        let (active, queued) = ledger.conflicts_with(order);
        if let Some(id) = active.first() {
            return Err(SlipwayError::Conflict(format!(
                "order {id} is already processing the same application and environment"
            )));
        }
        if queued.is_empty() {
            return Ok(Vec::new());
        }
        let supersedable = order.priority == Priority::Critical
            && queued.iter().all(|id| {
                ledger
                    .queue
                    .iter()
                    .any(|q| &q.order.id == id && q.order.priority != Priority::Critical)
            });
        if supersedable {
            Ok(queued)
        } else {
            Err(SlipwayError::Conflict(format!(
                "order {} is already queued for the same application and environment",
                queued[0]
            )))
        }
    }

    /// Dispatch every eligible queued order while below the concurrency
    /// cap. Returns how many were started.
    pub fn process_order_queue(&self) -> usize {
        let mut dispatched = Vec::new();
        let mut dead = Vec::new();
        {
            let mut ledger = self.ledger();
            let mut index = 0;
            while index < ledger.queue.len() {
                if ledger.active.len() >= self.settings.max_concurrent_orders {
                    break;
                }
                match self.dependencies_ready(&ledger.queue[index]) {
                    Readiness::Waiting => index += 1,
                    Readiness::Broken(reason) => {
                        let entry = ledger.queue.remove(index);
                        dead.push((entry.order, reason));
                    }
                    Readiness::Ready => {
                        let entry = ledger.queue.remove(index);
                        let (abort, signal) = AbortHandle::new();
                        ledger.active.insert(
                            entry.order.id.clone(),
                            ActiveOrder {
                                order: entry.order.clone(),
                                abort,
                            },
                        );
                        dispatched.push((entry.order, signal));
                    }
                }
            }
        }

        for (order, reason) in dead {
            warn!(order_id = %order.id, %reason, "dependency failed; order dropped");
            self.close_unstarted(
                &order,
                ReportStatus::Failed,
                Some(SlipwayError::Validation(reason.clone())),
                reason,
            );
        }

        let count = dispatched.len();
        for (order, signal) in dispatched {
            let registration = Registration {
                ledger: self.ledger.clone(),
                order_id: order.id.clone(),
                started: Instant::now(),
            };
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.execute_order(&order, signal).await;
                drop(registration);
                scheduler.finished.notify_waiters();
                scheduler.process_order_queue();
            });
        }
        if count > 0 {
            debug!(dispatched = count, "orders dispatched");
        }
        count
    }

    fn dependencies_ready(&self, entry: &QueuedOrder) -> Readiness {
        for dep in &entry.dependencies {
            match self.services.state.get_report(dep) {
                Ok(Some(report)) => match report.status {
                    ReportStatus::Success => {}
                    ReportStatus::InProgress => return Readiness::Waiting,
                    status => {
                        return Readiness::Broken(format!(
                            "dependency {dep} finished {status:?}"
                        ));
                    }
                },
                Ok(None) => return Readiness::Waiting,
                Err(e) => {
                    error!(order_id = %entry.order.id, error = %e, "dependency lookup failed");
                    return Readiness::Waiting;
                }
            }
        }
        Readiness::Ready
    }

    /// Run one order to completion and store its report.
    ///
    /// Never fails: every outcome, including a handler error or an
    /// expired deadline, ends up in the returned report. A deadline fires
    /// the order's abort signal; the strategy stops at its next phase
    /// boundary and finishes the deployment record itself.
    pub async fn execute_order(&self, order: &Order, signal: AbortSignal) -> Report {
        let started = Instant::now();
        let mut report = Report::start(order, epoch_millis());
        report.record(
            EventLevel::Info,
            "dispatch",
            format!("{} order started", order.command),
        );
        self.store(&report);
        self.services.events.publish(Event::OrderStarted {
            order_id: order.id.clone(),
        });
        info!(order_id = %order.id, command = %order.command, "order started");

        let result = match order.constraints.deadline {
            Some(deadline) => {
                let remaining = Duration::from_millis(deadline.saturating_sub(epoch_millis()));
                let (result, expired) = {
                    let work = self.dispatch(order, &mut report, signal);
                    tokio::pin!(work);
                    let outcome = tokio::select! {
                        result = &mut work => (result, false),
                        _ = tokio::time::sleep(remaining) => {
                            if self.signal_abort(&order.id, "deadline exceeded") {
                                warn!(order_id = %order.id, "deadline passed; abort signalled");
                            } else {
                                warn!(order_id = %order.id, "deadline passed for an unregistered order");
                            }
                            ((&mut work).await, true)
                        }
                    };
                    outcome
                };
                match result {
                    Err(SlipwayError::Aborted(_)) if expired => {
                        Err(SlipwayError::timeout("deadline", remaining))
                    }
                    Ok(()) if expired => {
                        report.record(EventLevel::Warning, "deadline", "finished after the deadline");
                        Ok(())
                    }
                    other => other,
                }
            }
            None => self.dispatch(order, &mut report, signal).await,
        };

        scoring::finalize(&mut report, &result, started.elapsed());
        self.store(&report);
        match &result {
            Ok(()) => {
                info!(
                    order_id = %order.id,
                    quality = report.quality_score,
                    duration_ms = report.duration_ms,
                    "order completed"
                );
                self.services.events.publish(Event::OrderCompleted {
                    order_id: order.id.clone(),
                    deployment_id: report.deployment_id.clone(),
                });
            }
            Err(err) => {
                error!(order_id = %order.id, stage = err.stage(), error = %err, "order failed");
                self.services.events.publish(Event::OrderFailed {
                    order_id: order.id.clone(),
                    stage: err.stage().to_string(),
                    cause: err.to_string(),
                });
            }
        }
        report
    }

    async fn dispatch(
        &self,
        order: &Order,
        report: &mut Report,
        signal: AbortSignal,
    ) -> SlipwayResult<()> {
        match order.command {
            Command::Abort => self.abort_target(order, report),
            _ => self.services.handle(order, report, signal).await,
        }
    }

    /// Fire the abort signal of an active order.
    fn signal_abort(&self, order_id: &str, reason: &str) -> bool {
        match self.ledger().active.get(order_id) {
            Some(active) => {
                active.abort.abort(reason);
                true
            }
            None => false,
        }
    }

    /// Abort handler: signal the target, or dequeue it if not started.
    fn abort_target(&self, order: &Order, report: &mut Report) -> SlipwayResult<()> {
        let target = order
            .parameters
            .target_order_id
            .as_deref()
            .ok_or_else(|| SlipwayError::Validation("abort requires target_order_id".into()))?;
        let reason = order.context.reason.as_deref().unwrap_or("aborted by order");
        report.details = json!({ "target_order_id": target });

        let dequeued = {
            let mut ledger = self.ledger();
            if let Some(active) = ledger.active.get(target) {
                active.abort.abort(reason);
                report.record(
                    EventLevel::Warning,
                    "abort",
                    format!("abort signalled to {target}: {reason}"),
                );
                info!(order_id = %order.id, %target, "abort signalled");
                return Ok(());
            }
            let position = ledger.queue.iter().position(|q| q.order.id == target);
            position.map(|i| ledger.queue.remove(i))
        };
        match dequeued {
            Some(entry) => {
                report.record(EventLevel::Warning, "abort", format!("{target} removed from the queue"));
                self.close_unstarted(
                    &entry.order,
                    ReportStatus::Cancelled,
                    None,
                    reason.to_string(),
                );
                Ok(())
            }
            None => Err(SlipwayError::NotFound(format!("no queued or active order {target}"))),
        }
    }

    /// Cancel an order. Queued orders are removed on the spot; an active
    /// order gets a synthesized abort order and stops at its next phase
    /// boundary.
    pub async fn cancel_order(&self, order_id: &str, reason: &str) -> SlipwayResult<CancelOutcome> {
        let (dequeued, active) = {
            let mut ledger = self.ledger();
            let position = ledger.queue.iter().position(|q| q.order.id == order_id);
            let dequeued = position.map(|i| ledger.queue.remove(i));
            (dequeued, ledger.active.contains_key(order_id))
        };

        if let Some(entry) = dequeued {
            let report = self.close_unstarted(
                &entry.order,
                ReportStatus::Cancelled,
                None,
                reason.to_string(),
            );
            info!(%order_id, %reason, "queued order cancelled");
            return Ok(CancelOutcome::Dequeued(report));
        }
        if !active {
            return Err(SlipwayError::NotFound(format!(
                "no queued or active order {order_id}"
            )));
        }

        let mut abort = Order::new(
            format!("{order_id}-abort-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            Command::Abort,
        );
        abort.priority = Priority::Critical;
        abort.parameters.target_order_id = Some(order_id.to_string());
        abort.context.reason = Some(reason.to_string());
        let report = self.execute_order(&abort, AbortSignal::never()).await;
        Ok(CancelOutcome::AbortRequested(report))
    }

    /// Write the terminal report of an order that never started.
    fn close_unstarted(
        &self,
        order: &Order,
        status: ReportStatus,
        error: Option<SlipwayError>,
        reason: String,
    ) -> Report {
        let mut report = Report::start(order, epoch_millis());
        match error {
            Some(err) => {
                scoring::finalize(&mut report, &Err(err), Duration::ZERO);
                if let Some(failure) = report.failure.as_mut() {
                    failure.stage = "dependencies".to_string();
                }
            }
            None => {
                report.record(EventLevel::Warning, "queue", reason.clone());
                report.completed_at = Some(epoch_millis());
                report.duration_ms = Some(0);
            }
        }
        report.status = status;
        self.store(&report);

        let order_id = order.id.clone();
        match status {
            ReportStatus::Cancelled => self
                .services
                .events
                .publish(Event::OrderCancelled { order_id, reason }),
            _ => self.services.events.publish(Event::OrderFailed {
                order_id,
                stage: "dependencies".to_string(),
                cause: reason,
            }),
        }
        self.finished.notify_waiters();
        report
    }

    fn store(&self, report: &Report) {
        if let Err(e) = self.services.state.put_report(report) {
            error!(order_id = %report.order_id, error = %e, "failed to store report");
        }
    }

    /// Current standing of an order. Finished reports never change, so
    /// repeated calls for a finished order return identical reports.
    pub fn get_order_status(&self, order_id: &str) -> SlipwayResult<OrderState> {
        {
            let ledger = self.ledger();
            if let Some(entry) = ledger.queue.iter().find(|q| q.order.id == order_id) {
                return Ok(OrderState::Queued(entry.clone()));
            }
        }
        match self.services.state.get_report(order_id)? {
            Some(report) if report.status.is_terminal() => Ok(OrderState::Finished(report)),
            Some(report) => Ok(OrderState::Processing(report)),
            None => Err(SlipwayError::NotFound(format!("order {order_id}"))),
        }
    }

    /// Wait until an order has a terminal report.
    pub async fn wait_for_report(&self, order_id: &str) -> SlipwayResult<Report> {
        loop {
            let notified = self.finished.notified();
            match self.get_order_status(order_id) {
                Ok(OrderState::Finished(report)) => return Ok(report),
                Ok(_) => {}
                Err(SlipwayError::NotFound(_)) if self.ledger().active.contains_key(order_id) => {}
                Err(e) => return Err(e),
            }
            notified.await;
        }
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        let ledger = self.ledger();
        let mut processing: Vec<OrderId> = ledger.active.keys().cloned().collect();
        processing.sort();
        QueueSnapshot {
            queued: ledger.queue.clone(),
            processing,
            max_concurrent: self.settings.max_concurrent_orders,
            average_processing_secs: ledger.average_secs(self.settings.default_processing_secs),
        }
    }

    /// Wait for every queued and processing order to finish.
    pub async fn drain(&self) {
        loop {
            let notified = self.finished.notified();
            {
                let ledger = self.ledger();
                if ledger.queue.is_empty() && ledger.active.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

enum Readiness {
    Ready,
    Waiting,
    Broken(String),
}
