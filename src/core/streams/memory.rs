use super::{new_stream_id, RegistryError, StreamRecord, StreamStatus, StreamStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Records in creation order. Shared by the in-memory and file stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StreamLedger {
    #[serde(default)]
    records: Vec<StreamRecord>,
}

impl StreamLedger {
    pub(crate) fn create(&mut self, conversation_id: &str) -> Result<StreamRecord, RegistryError> {
        let record = StreamRecord::new(new_stream_id()?, conversation_id, Utc::now());
        self.records.push(record.clone());
        Ok(record)
    }

    pub(crate) fn lookup_latest(&self, conversation_id: &str) -> Option<StreamRecord> {
        self.records
            .iter()
            .rev()
            .find(|record| record.conversation_id == conversation_id)
            .cloned()
    }

    /// Returns the record and whether the mark changed it.
    pub(crate) fn close(
        &mut self,
        stream_id: &str,
        status: StreamStatus,
    ) -> Result<(StreamRecord, bool), RegistryError> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.stream_id == stream_id)
            .ok_or_else(|| RegistryError::UnknownStream(stream_id.to_string()))?;
        let changed = record.close(status, Utc::now());
        if !changed {
            debug!(
                stream_id,
                requested = status.as_str(),
                current = record.status().as_str(),
                "Stream already terminal"
            );
        }
        Ok((record.clone(), changed))
    }

    pub(crate) fn records_for(&self, conversation_id: &str) -> Vec<StreamRecord> {
        self.records
            .iter()
            .filter(|record| record.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

/// Process-local stream registry.
#[derive(Debug, Default)]
pub struct MemoryStreamStore {
    ledger: Mutex<StreamLedger>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn create(&self, conversation_id: &str) -> Result<StreamRecord, RegistryError> {
        self.ledger.lock().await.create(conversation_id)
    }

    async fn lookup_latest(
        &self,
        conversation_id: &str,
    ) -> Result<Option<StreamRecord>, RegistryError> {
        Ok(self.ledger.lock().await.lookup_latest(conversation_id))
    }

    async fn mark_completed(&self, stream_id: &str) -> Result<StreamRecord, RegistryError> {
        let (record, _) = self
            .ledger
            .lock()
            .await
            .close(stream_id, StreamStatus::Completed)?;
        Ok(record)
    }

    async fn mark_cancelled(&self, stream_id: &str) -> Result<StreamRecord, RegistryError> {
        let (record, _) = self
            .ledger
            .lock()
            .await
            .close(stream_id, StreamStatus::Cancelled)?;
        Ok(record)
    }

    async fn records_for(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StreamRecord>, RegistryError> {
        Ok(self.ledger.lock().await.records_for(conversation_id))
    }
}
