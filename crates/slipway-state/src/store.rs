//! StateStore — in-memory persistence for reports, deployments and slots.
//!
//! Provides typed CRUD operations over the records the scheduler,
//! orchestrator and rollback engine share. Terminal reports are frozen:
//! once a report reaches success/failed/cancelled it can be read but not
//! replaced, which keeps `get_order_status` idempotent.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use slipway_core::*;

use crate::error::{StateError, StateResult};

type PairKey = (String, String);

#[derive(Default)]
struct Tables {
    reports: HashMap<OrderId, Report>,
    deployments: HashMap<DeploymentId, Deployment>,
    /// Deployment ids in creation order, for "latest" lookups.
    deployment_log: Vec<DeploymentId>,
    /// (application, environment) → [blue, green].
    slots: HashMap<PairKey, [SlotStatus; 2]>,
}

/// Thread-safe in-memory state store.
#[derive(Clone, Default)]
pub struct StateStore {
    tables: Arc<RwLock<Tables>>,
}

fn pair(application: &str, environment: &str) -> PairKey {
    (application.to_string(), environment.to_string())
}

fn slot_index(slot: Slot) -> usize {
    match slot {
        Slot::Blue => 0,
        Slot::Green => 1,
    }
}

fn idle_pair() -> [SlotStatus; 2] {
    [SlotStatus::idle(Slot::Blue), SlotStatus::idle(Slot::Green)]
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StateResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| StateError::Poisoned(e.to_string()))
    }

    fn write(&self) -> StateResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| StateError::Poisoned(e.to_string()))
    }

    // ── Reports ────────────────────────────────────────────────────

    /// Insert or update a report. Terminal reports cannot be replaced.
    pub fn put_report(&self, report: &Report) -> StateResult<()> {
        let mut tables = self.write()?;
        if let Some(existing) = tables.reports.get(&report.order_id) {
            if existing.status.is_terminal() {
                return Err(StateError::Immutable(format!(
                    "report {}",
                    report.order_id
                )));
            }
        }
        tables
            .reports
            .insert(report.order_id.clone(), report.clone());
        debug!(order_id = %report.order_id, status = ?report.status, "report stored");
        Ok(())
    }

    pub fn get_report(&self, order_id: &str) -> StateResult<Option<Report>> {
        Ok(self.read()?.reports.get(order_id).cloned())
    }

    pub fn list_reports(&self) -> StateResult<Vec<Report>> {
        let mut reports: Vec<Report> = self.read()?.reports.values().cloned().collect();
        reports.sort_by_key(|r| r.started_at);
        Ok(reports)
    }

    // ── Deployments ────────────────────────────────────────────────

    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let mut tables = self.write()?;
        if !tables.deployments.contains_key(&deployment.id) {
            tables.deployment_log.push(deployment.id.clone());
        }
        tables
            .deployments
            .insert(deployment.id.clone(), deployment.clone());
        debug!(deployment_id = %deployment.id, status = ?deployment.status, "deployment stored");
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        Ok(self.read()?.deployments.get(id).cloned())
    }

    /// Apply `f` to a stored deployment and return the updated record.
    pub fn update_deployment(
        &self,
        id: &str,
        f: impl FnOnce(&mut Deployment),
    ) -> StateResult<Deployment> {
        let mut tables = self.write()?;
        let deployment = tables
            .deployments
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(format!("deployment {id}")))?;
        f(deployment);
        deployment.updated_at = epoch_millis();
        Ok(deployment.clone())
    }

    /// Most recently created deployment for the pair, whatever its status.
    pub fn latest_deployment(
        &self,
        application: &str,
        environment: &str,
    ) -> StateResult<Option<Deployment>> {
        self.latest_matching(application, environment, |_| true)
    }

    /// Most recent deployment for the pair that finished successfully.
    pub fn latest_successful_deployment(
        &self,
        application: &str,
        environment: &str,
    ) -> StateResult<Option<Deployment>> {
        self.latest_matching(application, environment, |d| {
            d.status == DeploymentStatus::Success
        })
    }

    /// The most recent successful deployment of the same pair created
    /// after `deployment_id`, if one has replaced it.
    pub fn superseding_deployment(&self, deployment_id: &str) -> StateResult<Option<Deployment>> {
        let tables = self.read()?;
        let Some(target) = tables.deployments.get(deployment_id) else {
            return Err(StateError::NotFound(format!("deployment {deployment_id}")));
        };
        Ok(tables
            .deployment_log
            .iter()
            .rev()
            .take_while(|id| id.as_str() != deployment_id)
            .filter_map(|id| tables.deployments.get(id))
            .find(|d| {
                d.application == target.application
                    && d.environment == target.environment
                    && d.status == DeploymentStatus::Success
            })
            .cloned())
    }

    /// Deployments of the pair created before `deployment_id`.
    pub fn earlier_deployments(&self, deployment_id: &str) -> StateResult<Vec<Deployment>> {
        let tables = self.read()?;
        let Some(target) = tables.deployments.get(deployment_id) else {
            return Err(StateError::NotFound(format!("deployment {deployment_id}")));
        };
        Ok(tables
            .deployment_log
            .iter()
            .take_while(|id| id.as_str() != deployment_id)
            .filter_map(|id| tables.deployments.get(id))
            .filter(|d| {
                d.application == target.application && d.environment == target.environment
            })
            .cloned()
            .collect())
    }

    fn latest_matching(
        &self,
        application: &str,
        environment: &str,
        pred: impl Fn(&Deployment) -> bool,
    ) -> StateResult<Option<Deployment>> {
        let tables = self.read()?;
        Ok(tables
            .deployment_log
            .iter()
            .rev()
            .filter_map(|id| tables.deployments.get(id))
            .find(|d| d.application == application && d.environment == environment && pred(d))
            .cloned())
    }

    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let tables = self.read()?;
        Ok(tables
            .deployment_log
            .iter()
            .filter_map(|id| tables.deployments.get(id))
            .cloned()
            .collect())
    }

    // ── Slots ──────────────────────────────────────────────────────

    /// Both slots of the pair; unknown pairs report two idle slots.
    pub fn slots(&self, application: &str, environment: &str) -> StateResult<Vec<SlotStatus>> {
        let tables = self.read()?;
        Ok(tables
            .slots
            .get(&pair(application, environment))
            .cloned()
            .unwrap_or_else(idle_pair)
            .to_vec())
    }

    /// The slot recorded as active, if any.
    pub fn active_slot(&self, application: &str, environment: &str) -> StateResult<Option<Slot>> {
        let tables = self.read()?;
        Ok(tables
            .slots
            .get(&pair(application, environment))
            .and_then(|s| s.iter().find(|st| st.is_active).map(|st| st.slot)))
    }

    /// Make `slot` the only active slot, with all traffic.
    pub fn activate_slot(
        &self,
        application: &str,
        environment: &str,
        slot: Slot,
        image: Option<&str>,
    ) -> StateResult<()> {
        let mut tables = self.write()?;
        let now = epoch_millis();
        let slots = tables
            .slots
            .entry(pair(application, environment))
            .or_insert_with(idle_pair);
        for status in slots.iter_mut() {
            let active = status.slot == slot;
            status.is_active = active;
            status.traffic.percentage = if active { 100 } else { 0 };
            if active {
                if let Some(image) = image {
                    status.image = Some(image.to_string());
                }
            }
            status.updated_at = now;
        }
        debug!(%application, %environment, %slot, "slot activated");
        Ok(())
    }

    /// Record the image deployed into a (not yet active) slot.
    pub fn record_slot_image(
        &self,
        application: &str,
        environment: &str,
        slot: Slot,
        image: &str,
    ) -> StateResult<()> {
        let mut tables = self.write()?;
        let slots = tables
            .slots
            .entry(pair(application, environment))
            .or_insert_with(idle_pair);
        let status = &mut slots[slot_index(slot)];
        status.image = Some(image.to_string());
        status.updated_at = epoch_millis();
        Ok(())
    }

    /// Update the observed health and request count of a slot.
    pub fn update_slot_health(
        &self,
        application: &str,
        environment: &str,
        slot: Slot,
        health: SlotHealth,
        request_count: u64,
    ) -> StateResult<()> {
        let mut tables = self.write()?;
        let slots = tables
            .slots
            .entry(pair(application, environment))
            .or_insert_with(idle_pair);
        let status = &mut slots[slot_index(slot)];
        status.health = health;
        status.traffic.request_count = request_count;
        status.updated_at = epoch_millis();
        Ok(())
    }
}
