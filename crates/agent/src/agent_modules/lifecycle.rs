//! Entry points the CRUD layer calls to keep probe loops in line with records.
//!
//! Every operation on one monitor id runs under that id's lock, so a start,
//! stop or reconfigure never interleaves with another for the same record.
//! Different ids never contend.
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lookout_common::{MonitorId, MonitorRecord, MonitorState};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::probe::ProbeRegistry;
use super::repository::{MonitorRepository, RepositoryError};
use super::service_monitor::{MonitorScheduler, MonitorTask};
use super::tracker::TrackerSnapshot;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Monitor {0} already has a running probe loop")]
    AlreadyRunning(MonitorId),
    #[error("Monitor not found: {0}")]
    NotFound(MonitorId),
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct LifecycleController {
    scheduler: MonitorScheduler,
    repository: Arc<dyn MonitorRepository>,
    tasks: DashMap<MonitorId, MonitorTask>,
    locks: DashMap<MonitorId, Arc<Mutex<()>>>,
}

impl LifecycleController {
    pub fn new(scheduler: MonitorScheduler, repository: Arc<dyn MonitorRepository>) -> Self {
        Self {
            scheduler,
            repository,
            tasks: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ProbeRegistry> {
        self.scheduler.registry()
    }

    fn lock_for(&self, id: MonitorId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    /// Drops the id's lock entry once nobody else holds or waits on it.
    fn release_lock(&self, id: MonitorId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Starts a probe loop with a fresh tracker. Disabled records are ignored.
    pub async fn start(&self, record: MonitorRecord) -> Result<(), LifecycleError> {
        let lock = self.lock_for(record.id);
        let _guard = lock.lock().await;
        self.start_locked(record)
    }

    /// Replaces any running loop for the record; alert state always starts over.
    pub async fn reconfigure(&self, record: MonitorRecord) -> Result<(), LifecycleError> {
        let lock = self.lock_for(record.id);
        let _guard = lock.lock().await;
        self.stop_locked(record.id).await;
        self.start_locked(record)
    }

    /// Cancels the loop and discards its tracker. No-op if nothing is running.
    pub async fn stop(&self, id: MonitorId) {
        let lock = self.lock_for(id);
        {
            let _guard = lock.lock().await;
            self.stop_locked(id).await;
        }
        self.release_lock(id, lock);
    }

    /// Persists the new state, then starts or stops the loop to match.
    pub async fn toggle_state(&self, id: MonitorId, enabled: bool) -> Result<(), LifecycleError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        self.repository
            .set_monitor_state(id, MonitorState::from(enabled))
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(id) => LifecycleError::NotFound(id),
            })?;

        if !enabled {
            self.stop_locked(id).await;
            return Ok(());
        }
        if self.tasks.contains_key(&id) {
            debug!(monitor_id = id, "Monitor already running; toggle is a no-op.");
            return Ok(());
        }
        let record = self
            .repository
            .get_monitor(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;
        self.start_locked(record)
    }

    /// Stops the loop and purges the record from persistence.
    pub async fn remove(&self, id: MonitorId) -> Result<(), LifecycleError> {
        let lock = self.lock_for(id);
        let deleted = {
            let _guard = lock.lock().await;
            self.stop_locked(id).await;
            self.repository.delete_monitor(id).await
        };
        self.release_lock(id, lock);
        deleted?;
        info!(monitor_id = id, "Monitor removed.");
        Ok(())
    }

    /// Starts every enabled record in persistence. Returns how many were started.
    pub async fn start_all(&self) -> Result<usize, LifecycleError> {
        let mut started = 0;
        for record in self.repository.list_monitors().await? {
            if !record.is_enabled() {
                continue;
            }
            let id = record.id;
            match self.start(record).await {
                Ok(()) => started += 1,
                Err(e) => warn!(monitor_id = id, error = %e, "Failed to start monitor."),
            }
        }
        info!(count = started, "Started monitors from persistence.");
        Ok(started)
    }

    /// Brings running loops in line with `desired`: stops what is gone or
    /// disabled, restarts what changed (or died), starts what is new.
    pub async fn reconcile(&self, desired: Vec<MonitorRecord>) {
        let desired_ids: HashSet<MonitorId> = desired
            .iter()
            .filter(|r| r.is_enabled())
            .map(|r| r.id)
            .collect();

        for id in self.running_ids() {
            if !desired_ids.contains(&id) {
                info!(monitor_id = id, "Stopping monitor no longer in the desired set.");
                self.stop(id).await;
            }
        }

        for record in desired.into_iter().filter(|r| r.is_enabled()) {
            let id = record.id;
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;

            let needs_restart = match self.tasks.get(&id) {
                Some(task) => task.record() != &record || task.is_finished(),
                None => true,
            };
            if !needs_restart {
                continue;
            }
            if self.stop_locked(id).await {
                info!(monitor_id = id, "Monitor configuration changed; restarting.");
            }
            if let Err(e) = self.start_locked(record) {
                error!(monitor_id = id, error = %e, "Failed to start monitor during reconcile.");
            }
        }
    }

    /// Synchronized snapshot of a running monitor's alert state.
    pub fn status(&self, id: MonitorId) -> Option<TrackerSnapshot> {
        self.tasks.get(&id).map(|task| task.snapshot())
    }

    pub fn running_ids(&self) -> Vec<MonitorId> {
        let mut ids: Vec<MonitorId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub async fn shutdown(&self) {
        let ids = self.running_ids();
        info!(count = ids.len(), "Stopping all monitors.");
        for id in ids {
            self.stop(id).await;
        }
    }

    fn start_locked(&self, record: MonitorRecord) -> Result<(), LifecycleError> {
        let id = record.id;
        if !record.is_enabled() {
            debug!(monitor_id = id, "Monitor is disabled; not starting.");
            return Ok(());
        }
        match self.tasks.entry(id) {
            Entry::Occupied(_) => {
                error!(monitor_id = id, "Refusing to start a second probe loop for a monitor.");
                Err(LifecycleError::AlreadyRunning(id))
            }
            Entry::Vacant(slot) => {
                info!(monitor_id = id, monitor_name = %record.name, "Starting monitor.");
                slot.insert(self.scheduler.spawn(record));
                Ok(())
            }
        }
    }

    /// Returns whether a loop was running.
    async fn stop_locked(&self, id: MonitorId) -> bool {
        let Some((_, task)) = self.tasks.remove(&id) else {
            return false;
        };
        task.stop().await;
        info!(monitor_id = id, "Monitor stopped.");
        true
    }
}
