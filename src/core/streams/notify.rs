//! Out-of-band `append-message` delivery, scoped per stream.
//!
//! Topics carry the raw wire text so a subscriber sees exactly what was
//! published, malformed payloads included, and decides what to keep.

use crate::core::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const APPEND_MESSAGE: &str = "append-message";

const DEFAULT_TOPIC_CAPACITY: usize = 64;

/// Wire shape: `{"type": "append-message", "message": <blob>}`.
///
/// The blob is normally a JSON string holding a serialized message; a plain
/// JSON object is accepted as well. Only the message `id` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedNotification(pub String);

impl fmt::Display for MalformedNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed notification: {}", self.0)
    }
}

impl std::error::Error for MalformedNotification {}

impl AppendNotification {
    pub fn for_message(message: &Message) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: APPEND_MESSAGE.to_string(),
            message: Value::String(serde_json::to_string(message)?),
        })
    }

    /// Parses wire text, rejecting other notification types.
    pub fn parse(raw: &str) -> Result<Self, MalformedNotification> {
        let notification: Self =
            serde_json::from_str(raw).map_err(|err| MalformedNotification(err.to_string()))?;
        if notification.kind != APPEND_MESSAGE {
            return Err(MalformedNotification(format!(
                "unexpected type '{}'",
                notification.kind
            )));
        }
        Ok(notification)
    }

    fn message_value(&self) -> Result<Value, MalformedNotification> {
        match &self.message {
            Value::String(blob) => serde_json::from_str(blob)
                .map_err(|err| MalformedNotification(format!("message blob: {err}"))),
            Value::Object(_) => Ok(self.message.clone()),
            other => Err(MalformedNotification(format!(
                "message must be a string or object, got {other}"
            ))),
        }
    }

    pub fn message_id(&self) -> Result<String, MalformedNotification> {
        self.message_value()?
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MalformedNotification("message has no id".to_string()))
    }

    pub fn decode_message(&self) -> Result<Message, MalformedNotification> {
        serde_json::from_value(self.message_value()?)
            .map_err(|err| MalformedNotification(format!("message: {err}")))
    }
}

/// Per-stream publish/subscribe topics.
///
/// Publishing never blocks and never fails for lack of listeners. A new
/// subscriber only sees what is published after it subscribed.
pub struct NotificationHub {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<String>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes a notification, returning how many subscribers received it.
    pub fn publish(
        &self,
        stream_id: &str,
        notification: &AppendNotification,
    ) -> Result<usize, serde_json::Error> {
        let raw = serde_json::to_string(notification)?;
        Ok(self.publish_raw(stream_id, raw))
    }

    /// Publishes wire text as received from elsewhere. Only subscribers
    /// create topics; a topic whose subscribers are all gone is dropped here.
    pub fn publish_raw(&self, stream_id: &str, raw: String) -> usize {
        let mut topics = self.topics();
        let Some(sender) = topics.get(stream_id) else {
            debug!(stream_id, "No subscribers for stream notification");
            return 0;
        };
        if sender.receiver_count() == 0 {
            topics.remove(stream_id);
            debug!(stream_id, "Dropped topic without subscribers");
            return 0;
        }
        let delivered = sender.send(raw).unwrap_or(0);
        debug!(stream_id, delivered, "Published stream notification");
        delivered
    }

    pub fn subscribe(&self, stream_id: &str) -> NotificationSubscription {
        let receiver = self
            .topics()
            .entry(stream_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        NotificationSubscription {
            stream_id: stream_id.to_string(),
            receiver,
        }
    }

    #[cfg(test)]
    pub(crate) fn topic_count(&self) -> usize {
        self.topics().len()
    }

    /// Drops the topic. Subscribers drain what is buffered and then end.
    pub fn close(&self, stream_id: &str) {
        self.topics().remove(stream_id);
    }
}

pub struct NotificationSubscription {
    stream_id: String,
    receiver: broadcast::Receiver<String>,
}

impl NotificationSubscription {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Next raw notification, or `None` once the topic is closed. Items lost
    /// to lag are skipped.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(raw) => return Some(raw),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(stream_id = %self.stream_id, skipped, "Notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
