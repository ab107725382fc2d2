use super::notify::{AppendNotification, NotificationHub};
use super::{RegistryError, StreamRecord, StreamStore};
use crate::core::message::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Publisher side of one generation stream.
///
/// Creating a handle registers the stream; finishing it writes the terminal
/// mark and closes the notification topic. Both finishing calls are safe to
/// repeat.
pub struct GenerationHandle {
    store: Arc<dyn StreamStore>,
    hub: Arc<NotificationHub>,
    record: StreamRecord,
    cancel_token: CancellationToken,
}

impl GenerationHandle {
    pub async fn begin(
        store: Arc<dyn StreamStore>,
        hub: Arc<NotificationHub>,
        conversation_id: &str,
    ) -> Result<Self, RegistryError> {
        let record = store.create(conversation_id).await?;
        debug!(
            stream_id = %record.stream_id,
            conversation_id,
            "Generation stream started"
        );
        Ok(Self {
            store,
            hub,
            record,
            cancel_token: CancellationToken::new(),
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.record.stream_id
    }

    pub fn record(&self) -> &StreamRecord {
        &self.record
    }

    /// Fires when the stream is cancelled; the generating task should stop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Replays a produced message to whoever is attached to this stream.
    pub fn publish(&self, message: &Message) -> usize {
        match AppendNotification::for_message(message) {
            Ok(notification) => self
                .hub
                .publish(self.stream_id(), &notification)
                .unwrap_or_else(|err| {
                    warn!(stream_id = %self.stream_id(), error = %err, "Failed to encode notification");
                    0
                }),
            Err(err) => {
                warn!(stream_id = %self.stream_id(), error = %err, "Failed to encode message");
                0
            }
        }
    }

    pub async fn complete(&mut self) -> Result<&StreamRecord, RegistryError> {
        self.record = self.store.mark_completed(&self.record.stream_id).await?;
        self.hub.close(&self.record.stream_id);
        Ok(&self.record)
    }

    pub async fn cancel(&mut self) -> Result<&StreamRecord, RegistryError> {
        self.cancel_token.cancel();
        self.record = self.store.mark_cancelled(&self.record.stream_id).await?;
        self.hub.close(&self.record.stream_id);
        Ok(&self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::MessageRole;
    use crate::core::streams::{MemoryStreamStore, StreamStatus};

    async fn handle(conversation_id: &str) -> (GenerationHandle, Arc<dyn StreamStore>, Arc<NotificationHub>) {
        let store: Arc<dyn StreamStore> = Arc::new(MemoryStreamStore::new());
        let hub = Arc::new(NotificationHub::default());
        let handle = GenerationHandle::begin(Arc::clone(&store), Arc::clone(&hub), conversation_id)
            .await
            .expect("begin");
        (handle, store, hub)
    }

    #[tokio::test]
    async fn begin_registers_an_in_flight_stream() {
        let (handle, store, _hub) = handle("conv").await;
        let latest = store
            .lookup_latest("conv")
            .await
            .expect("lookup")
            .expect("record");
        assert_eq!(latest.stream_id, handle.stream_id());
        assert!(latest.is_in_flight());
    }

    #[tokio::test]
    async fn published_messages_reach_subscribers() {
        let (mut handle, _store, hub) = handle("conv").await;
        let mut subscription = hub.subscribe(handle.stream_id());

        let delivered = handle.publish(&Message::text("m1", MessageRole::Assistant, "partial"));
        assert_eq!(delivered, 1);
        handle.complete().await.expect("complete");

        let raw = subscription.next().await.expect("notification");
        let notification = AppendNotification::parse(&raw).expect("parse");
        assert_eq!(notification.message_id().expect("id"), "m1");
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn cancel_fires_token_and_sticks() {
        let (mut handle, store, _hub) = handle("conv").await;
        let token = handle.cancel_token();

        let cancelled_at = handle.cancel().await.expect("cancel").cancelled_at;
        assert!(token.is_cancelled());
        let after_complete = handle.complete().await.expect("complete is a no-op").clone();
        assert_eq!(after_complete.status(), StreamStatus::Cancelled);
        assert_eq!(after_complete.cancelled_at, cancelled_at);

        let again = handle.cancel().await.expect("cancel again").clone();
        assert_eq!(again.cancelled_at, cancelled_at);
        assert_eq!(
            store
                .lookup_latest("conv")
                .await
                .expect("lookup")
                .map(|record| record.status()),
            Some(StreamStatus::Cancelled)
        );
    }
}
