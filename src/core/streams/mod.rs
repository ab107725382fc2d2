//! Durable record of generation streams, keyed by conversation.
//!
//! A [`StreamRecord`] is created when a model turn starts generating and is
//! closed exactly once, either completed or cancelled. The newest record for
//! a conversation is the one that resumption looks at; older ones are kept
//! for audit.

pub mod file;
pub mod generation;
pub mod memory;
pub mod notify;

use crate::core::config::{Config, StreamRegistryBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use file::FileStreamStore;
pub use generation::GenerationHandle;
pub use memory::MemoryStreamStore;
pub use notify::{AppendNotification, MalformedNotification, NotificationHub};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream_id: String,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    InFlight,
    Completed,
    Cancelled,
}

impl StreamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::InFlight => "in-flight",
            StreamStatus::Completed => "completed",
            StreamStatus::Cancelled => "cancelled",
        }
    }
}

impl StreamRecord {
    pub fn new(
        stream_id: impl Into<String>,
        conversation_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            conversation_id: conversation_id.into(),
            created_at,
            completed_at: None,
            cancelled_at: None,
        }
    }

    pub fn status(&self) -> StreamStatus {
        if self.cancelled_at.is_some() {
            StreamStatus::Cancelled
        } else if self.completed_at.is_some() {
            StreamStatus::Completed
        } else {
            StreamStatus::InFlight
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.status() == StreamStatus::InFlight
    }

    /// Applies a terminal mark unless the record is already terminal.
    /// Returns whether anything changed.
    pub(crate) fn close(&mut self, status: StreamStatus, at: DateTime<Utc>) -> bool {
        if !self.is_in_flight() {
            return false;
        }
        match status {
            StreamStatus::Completed => self.completed_at = Some(at),
            StreamStatus::Cancelled => self.cancelled_at = Some(at),
            StreamStatus::InFlight => return false,
        }
        true
    }
}

#[derive(Debug)]
pub enum RegistryError {
    /// No record carries this stream id.
    UnknownStream(String),
    /// The backing store could not be read or written.
    Unavailable(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownStream(stream_id) => write!(f, "Unknown stream: {stream_id}"),
            RegistryError::Unavailable(message) => {
                write!(f, "Stream registry unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Storage contract for stream records.
///
/// Terminal marks are idempotent: marking an already-terminal record is a
/// no-op that returns the record unchanged.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Starts a new in-flight record, superseding earlier ones for lookup.
    async fn create(&self, conversation_id: &str) -> Result<StreamRecord, RegistryError>;

    async fn lookup_latest(
        &self,
        conversation_id: &str,
    ) -> Result<Option<StreamRecord>, RegistryError>;

    async fn mark_completed(&self, stream_id: &str) -> Result<StreamRecord, RegistryError>;

    async fn mark_cancelled(&self, stream_id: &str) -> Result<StreamRecord, RegistryError>;

    /// Every record for the conversation, oldest first.
    async fn records_for(&self, conversation_id: &str)
        -> Result<Vec<StreamRecord>, RegistryError>;
}

/// Opens the store described by `config`, or `None` when resumption is not
/// configured.
pub fn open_store(config: &Config) -> Result<Option<Arc<dyn StreamStore>>, RegistryError> {
    let Some(registry) = &config.stream_registry else {
        return Ok(None);
    };
    let store: Arc<dyn StreamStore> = match registry.backend {
        StreamRegistryBackend::Memory => Arc::new(MemoryStreamStore::new()),
        StreamRegistryBackend::File => {
            let path = match &registry.path {
                Some(path) => path.clone(),
                None => Config::default_stream_registry_path()
                    .map_err(|err| RegistryError::Unavailable(err.to_string()))?,
            };
            Arc::new(FileStreamStore::open(path)?)
        }
    };
    Ok(Some(store))
}

/// Random 128-bit stream id, hex encoded.
pub fn new_stream_id() -> Result<String, RegistryError> {
    let mut bytes = [0_u8; 16];
    getrandom::fill(&mut bytes).map_err(|err| RegistryError::Unavailable(err.to_string()))?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}
