//! Boundary to the persistence layer that owns monitor records.
use async_trait::async_trait;
use lookout_common::{MonitorId, MonitorRecord, MonitorState};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Monitor not found: {0}")]
    NotFound(MonitorId),
}

/// What the engine needs from record storage. Listing and pagination for UIs
/// live elsewhere.
#[async_trait]
pub trait MonitorRepository: Send + Sync {
    async fn get_monitor(&self, id: MonitorId) -> Result<Option<MonitorRecord>, RepositoryError>;

    async fn list_monitors(&self) -> Result<Vec<MonitorRecord>, RepositoryError>;

    async fn upsert_monitor(&self, record: MonitorRecord) -> Result<(), RepositoryError>;

    /// Writes back the enabled/disabled flag; the only field the engine persists.
    async fn set_monitor_state(
        &self,
        id: MonitorId,
        state: MonitorState,
    ) -> Result<(), RepositoryError>;

    async fn delete_monitor(&self, id: MonitorId) -> Result<(), RepositoryError>;
}

/// Process-local store, ordered by id.
#[derive(Default)]
pub struct InMemoryRepository {
    monitors: RwLock<BTreeMap<MonitorId, MonitorRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_monitors(records: impl IntoIterator<Item = MonitorRecord>) -> Self {
        Self {
            monitors: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }

    /// Replaces the whole set, returning it in id order.
    pub async fn replace_all(&self, records: Vec<MonitorRecord>) -> Vec<MonitorRecord> {
        let mut monitors = self.monitors.write().await;
        *monitors = records.into_iter().map(|r| (r.id, r)).collect();
        monitors.values().cloned().collect()
    }
}

#[async_trait]
impl MonitorRepository for InMemoryRepository {
    async fn get_monitor(&self, id: MonitorId) -> Result<Option<MonitorRecord>, RepositoryError> {
        Ok(self.monitors.read().await.get(&id).cloned())
    }

    async fn list_monitors(&self) -> Result<Vec<MonitorRecord>, RepositoryError> {
        Ok(self.monitors.read().await.values().cloned().collect())
    }

    async fn upsert_monitor(&self, record: MonitorRecord) -> Result<(), RepositoryError> {
        self.monitors.write().await.insert(record.id, record);
        Ok(())
    }

    async fn set_monitor_state(
        &self,
        id: MonitorId,
        state: MonitorState,
    ) -> Result<(), RepositoryError> {
        let mut monitors = self.monitors.write().await;
        let record = monitors.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        record.state = state;
        Ok(())
    }

    async fn delete_monitor(&self, id: MonitorId) -> Result<(), RepositoryError> {
        self.monitors
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound(id))
    }
}
