//! Reattaching a client to a generation that is still running.

use crate::core::streams::NotificationHub;
use crate::utils::sse::SseEventParser;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const STREAM_ID_HEADER: &str = "x-stream-id";

const RESUME_HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Topic used when neither the registry nor the server names the stream.
pub fn conversation_topic(conversation_id: &str) -> String {
    format!("conv:{conversation_id}")
}

/// Work that moves notifications from the reattached stream into the hub.
/// It is started by the caller once it has subscribed, so nothing is
/// published before anyone listens.
pub type ForwardTask = Pin<Box<dyn Future<Output = ()> + Send>>;

pub enum Reattached {
    Attached {
        /// The stream the server attached to, when known.
        stream_id: Option<String>,
        forward: Option<ForwardTask>,
    },
    /// The server has no running generation for this conversation.
    NothingToResume,
}

#[async_trait]
pub trait ResumeTransport: Send + Sync {
    /// Asks the server to reattach. `stream_id` is `None` when the registry
    /// could not be consulted.
    async fn reattach(
        &self,
        conversation_id: &str,
        stream_id: Option<&str>,
    ) -> Result<Reattached, String>;
}

/// Reattaches by opening `GET {base_url}/{conversation}/stream`, an event
/// stream whose `data:` payloads are append notifications.
pub struct HttpResumeTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
    hub: Arc<NotificationHub>,
}

impl HttpResumeTransport {
    pub fn new(base_url: &str, hub: Arc<NotificationHub>) -> Result<Self, String> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = reqwest::Url::parse(&format!("{trimmed}/"))
            .map_err(|err| format!("Invalid resume base URL {base_url}: {err}"))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(RESUME_HTTP_CONNECT_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            client,
            base_url,
            hub,
        })
    }

    pub fn stream_url(
        &self,
        conversation_id: &str,
        stream_id: Option<&str>,
    ) -> Result<reqwest::Url, String> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| format!("Resume base URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .push(conversation_id)
            .push("stream");
        if let Some(stream_id) = stream_id {
            url.query_pairs_mut().append_pair("streamId", stream_id);
        }
        Ok(url)
    }
}

#[async_trait]
impl ResumeTransport for HttpResumeTransport {
    async fn reattach(
        &self,
        conversation_id: &str,
        stream_id: Option<&str>,
    ) -> Result<Reattached, String> {
        let url = self.stream_url(conversation_id, stream_id)?;
        debug!(conversation_id, url = %url, "Reattaching to generation stream");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Reattached::NothingToResume);
        }
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let topic = stream_id
            .map(str::to_string)
            .or_else(|| {
                response
                    .headers()
                    .get(STREAM_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
            .unwrap_or_else(|| conversation_topic(conversation_id));
        let hub = Arc::clone(&self.hub);
        let forward: ForwardTask = Box::pin(forward_events(response, hub, topic.clone()));

        Ok(Reattached::Attached {
            stream_id: Some(topic),
            forward: Some(forward),
        })
    }
}

async fn forward_events(
    response: reqwest::Response,
    hub: Arc<NotificationHub>,
    stream_id: String,
) {
    let mut stream = response.bytes_stream();
    let mut parser = SseEventParser::default();
    let mut forwarded = 0_usize;

    while let Some(chunk) = stream.next().await {
        let events = match chunk {
            Ok(bytes) => parser.push(&bytes),
            Err(err) => {
                debug!(stream_id = %stream_id, error = %err, "Resumed stream failed");
                break;
            }
        };
        for event in events {
            hub.publish_raw(&stream_id, event.data);
            forwarded += 1;
        }
    }
    for event in parser.finish() {
        hub.publish_raw(&stream_id, event.data);
        forwarded += 1;
    }

    debug!(stream_id = %stream_id, forwarded, "Resumed stream ended");
    hub.close(&stream_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_appends_conversation_and_stream_id() {
        let hub = Arc::new(NotificationHub::default());
        let transport =
            HttpResumeTransport::new("https://chat.example.com/api/chat/", hub).expect("transport");

        assert_eq!(
            transport
                .stream_url("conv 1", None)
                .expect("url")
                .as_str(),
            "https://chat.example.com/api/chat/conv%201/stream"
        );
        assert_eq!(
            transport
                .stream_url("conv", Some("s-1"))
                .expect("url")
                .as_str(),
            "https://chat.example.com/api/chat/conv/stream?streamId=s-1"
        );
    }

    #[test]
    fn conversation_topic_is_prefixed() {
        assert_eq!(conversation_topic("abc"), "conv:abc");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let hub = Arc::new(NotificationHub::default());
        assert!(HttpResumeTransport::new("not a url", hub).is_err());
    }
}
