use super::memory::StreamLedger;
use super::{RegistryError, StreamRecord, StreamStatus, StreamStore};
use crate::core::config::data::path_display;
use async_trait::async_trait;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

/// Stream registry persisted as one JSON document.
///
/// The document is the only state: every operation reads it afresh, so
/// several stores opened on the same path see each other's records. Every
/// change is written to a temporary file next to the target and renamed over
/// it, so readers never observe a partial document. Read-modify-write cycles
/// are serialized within the process.
pub struct FileStreamStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStreamStore {
    /// Opens the registry at `path`, checking that an existing document parses.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let store = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        store.load()?;
        debug!(path = %path_display(&store.path), "Opened stream registry");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StreamLedger, RegistryError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StreamLedger::default()),
            Err(err) => {
                return Err(RegistryError::Unavailable(format!(
                    "Failed to read {}: {err}",
                    path_display(&self.path)
                )))
            }
        };
        serde_json::from_str(&contents).map_err(|err| {
            RegistryError::Unavailable(format!(
                "Failed to parse {}: {err}",
                path_display(&self.path)
            ))
        })
    }

    fn persist(&self, ledger: &StreamLedger) -> Result<(), RegistryError> {
        write_atomically(&self.path, ledger).map_err(|err| {
            RegistryError::Unavailable(format!(
                "Failed to write {}: {err}",
                path_display(&self.path)
            ))
        })
    }

    async fn close(
        &self,
        stream_id: &str,
        status: StreamStatus,
    ) -> Result<StreamRecord, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut ledger = self.load()?;
        let (record, changed) = ledger.close(stream_id, status)?;
        if changed {
            self.persist(&ledger)?;
        }
        Ok(record)
    }
}

fn write_atomically(path: &Path, ledger: &StreamLedger) -> Result<(), Box<dyn std::error::Error>> {
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir)?;
    }

    let contents = serde_json::to_string_pretty(ledger)?;
    let mut temp_file = match parent {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    temp_file.write_all(contents.as_bytes())?;
    temp_file.as_file_mut().sync_all()?;
    temp_file
        .persist(path)
        .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;
    Ok(())
}

#[async_trait]
impl StreamStore for FileStreamStore {
    async fn create(&self, conversation_id: &str) -> Result<StreamRecord, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut ledger = self.load()?;
        let record = ledger.create(conversation_id)?;
        self.persist(&ledger)?;
        Ok(record)
    }

    async fn lookup_latest(
        &self,
        conversation_id: &str,
    ) -> Result<Option<StreamRecord>, RegistryError> {
        Ok(self.load()?.lookup_latest(conversation_id))
    }

    async fn mark_completed(&self, stream_id: &str) -> Result<StreamRecord, RegistryError> {
        self.close(stream_id, StreamStatus::Completed).await
    }

    async fn mark_cancelled(&self, stream_id: &str) -> Result<StreamRecord, RegistryError> {
        self.close(stream_id, StreamStatus::Cancelled).await
    }

    async fn records_for(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StreamRecord>, RegistryError> {
        Ok(self.load()?.records_for(conversation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("streams.json");

        let store = FileStreamStore::open(&path).expect("open");
        let first = store.create("conv").await.expect("create");
        let second = store.create("conv").await.expect("create");
        store
            .mark_cancelled(&second.stream_id)
            .await
            .expect("cancel");
        drop(store);

        let reopened = FileStreamStore::open(&path).expect("reopen");
        let latest = reopened
            .lookup_latest("conv")
            .await
            .expect("lookup")
            .expect("record");
        assert_eq!(latest.stream_id, second.stream_id);
        assert_eq!(latest.status(), StreamStatus::Cancelled);

        let history = reopened.records_for("conv").await.expect("records");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stream_id, first.stream_id);
        assert!(history[0].is_in_flight());
    }

    #[tokio::test]
    async fn repeated_terminal_marks_keep_the_stored_value() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("streams.json");
        let store = FileStreamStore::open(&path).expect("open");
        let record = store.create("conv").await.expect("create");

        let completed = store
            .mark_completed(&record.stream_id)
            .await
            .expect("complete");
        store
            .mark_cancelled(&record.stream_id)
            .await
            .expect("cancel is a no-op");

        let reopened = FileStreamStore::open(&path).expect("reopen");
        let stored = reopened
            .lookup_latest("conv")
            .await
            .expect("lookup")
            .expect("record");
        assert_eq!(stored.completed_at, completed.completed_at);
        assert!(stored.cancelled_at.is_none());
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("streams.json");
        fs::write(&path, "{ not json").expect("write");

        let err = match FileStreamStore::open(&path) {
            Ok(_) => panic!("expected parse failure"),
            Err(err) => err,
        };
        assert!(matches!(err, RegistryError::Unavailable(message) if message.contains("Failed to parse")));
    }

    #[tokio::test]
    async fn stores_on_one_path_share_records() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("streams.json");
        let writer = FileStreamStore::open(&path).expect("open writer");
        let reader = FileStreamStore::open(&path).expect("open reader");

        let started = writer.create("conv").await.expect("create");
        let seen = reader
            .lookup_latest("conv")
            .await
            .expect("lookup")
            .expect("record written by the other store");
        assert_eq!(seen.stream_id, started.stream_id);

        let other = reader.create("other").await.expect("create");
        writer
            .mark_completed(&started.stream_id)
            .await
            .expect("complete");
        assert_eq!(
            reader
                .lookup_latest("conv")
                .await
                .expect("lookup")
                .expect("record")
                .status(),
            StreamStatus::Completed
        );

        let reopened = FileStreamStore::open(&path).expect("reopen");
        assert_eq!(reopened.records_for("conv").await.expect("records").len(), 1);
        let kept = reopened.records_for("other").await.expect("records");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].stream_id, other.stream_id);
    }

    #[tokio::test]
    async fn unreadable_document_is_never_overwritten() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("streams.json");
        let store = FileStreamStore::open(&path).expect("open");
        store.create("conv").await.expect("create");

        fs::write(&path, "{ truncated").expect("write");
        assert!(store.create("conv").await.is_err());
        assert!(store.lookup_latest("conv").await.is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), "{ truncated");
        assert_eq!(store.path(), path.as_path());
    }

    #[tokio::test]
    async fn failed_write_is_reported() {
        let dir = tempdir().expect("tempdir");
        // A directory in place of the document makes every access fail.
        let path = dir.path().join("streams.json");
        fs::create_dir(&path).expect("mkdir");
        let store = FileStreamStore {
            path: path.clone(),
            write_lock: Mutex::new(()),
        };

        assert!(matches!(
            store.create("conv").await,
            Err(RegistryError::Unavailable(_))
        ));
        assert!(path.is_dir());
    }
}
