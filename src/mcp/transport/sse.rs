use super::{
    apply_json_post_headers, apply_protocol_version_header, protocol, ToolTransport,
    TransportError, TransportOptions, MCP_EVENT_STREAM_ACCEPT,
};
use crate::core::config::ToolEndpointConfig;
use crate::utils::sse::{is_event_stream_content_type, SseEvent, SseEventParser};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::RequestId;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

const ENDPOINT_EVENT: &str = "endpoint";
const MESSAGE_EVENT: &str = "message";

/// Client side of the legacy HTTP+SSE transport.
///
/// A long-lived GET stream carries every server message; the first
/// `endpoint` event names the URL that client messages are POSTed to.
/// Dropping the transport stops the background reader.
pub struct SseTransport {
    endpoint_id: String,
    client: reqwest::Client,
    headers: HeaderMap,
    post_url: reqwest::Url,
    inbound: mpsc::UnboundedReceiver<Value>,
    requested_protocol_version: String,
    negotiated_protocol_version: Option<String>,
    next_request_id: i64,
    _reader: DropGuard,
}

impl SseTransport {
    pub async fn connect(
        config: &ToolEndpointConfig,
        options: TransportOptions,
    ) -> Result<Self, TransportError> {
        let stream_url = reqwest::Url::parse(config.url.trim()).map_err(|err| {
            TransportError::Protocol(format!("Invalid endpoint URL {}: {err}", config.url))
        })?;

        let response = options
            .client
            .get(stream_url.clone())
            .headers(options.headers.clone())
            .header(reqwest::header::ACCEPT, MCP_EVENT_STREAM_ACCEPT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Protocol(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !is_event_stream_content_type(content_type) {
            return Err(TransportError::Protocol(format!(
                "Expected an event stream, got '{content_type}'."
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        tokio::spawn(read_events(
            config.id.clone(),
            response,
            endpoint_tx,
            inbound_tx,
            cancel_token.clone(),
        ));
        let reader_guard = cancel_token.drop_guard();

        let endpoint = endpoint_rx.await.map_err(|_| {
            TransportError::Protocol("Event stream closed before announcing an endpoint.".to_string())
        })?;
        let post_url = stream_url.join(&endpoint).map_err(|err| {
            TransportError::Protocol(format!("Invalid message endpoint '{endpoint}': {err}"))
        })?;
        debug!(endpoint_id = %config.id, post_url = %post_url, "SSE message endpoint announced");

        Ok(Self {
            endpoint_id: config.id.clone(),
            client: options.client,
            headers: options.headers,
            post_url,
            inbound: inbound_rx,
            requested_protocol_version: protocol::requested_protocol_version(config),
            negotiated_protocol_version: None,
            next_request_id: 0,
            _reader: reader_guard,
        })
    }

    pub fn post_url(&self) -> &reqwest::Url {
        &self.post_url
    }

    fn next_request_id(&mut self) -> i64 {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.saturating_add(1);
        request_id
    }

    async fn post(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let payload = serde_json::to_string(message)
            .map_err(|err| TransportError::Protocol(err.to_string()))?;
        let protocol_version = protocol::effective_protocol_version(
            &self.requested_protocol_version,
            self.negotiated_protocol_version.as_deref(),
        );
        let request = self
            .client
            .post(self.post_url.clone())
            .headers(self.headers.clone());
        let response = apply_protocol_version_header(
            apply_json_post_headers(request),
            Some(protocol_version.as_str()),
        )
        .body(payload)
        .send()
        .await?;

        if !response.status().is_success() {
            return Err(TransportError::Protocol(format!(
                "HTTP error: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolTransport for SseTransport {
    async fn send_request(
        &mut self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError> {
        let request_id = self.next_request_id();
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(RequestId::Integer(request_id)),
        )
        .map_err(|err| TransportError::Protocol(err.to_string()))?;

        debug!(endpoint_id = %self.endpoint_id, request_id, "Sending MCP SSE request");
        self.post(&message).await?;

        while let Some(value) = self.inbound.recv().await {
            if !is_response_to(&value, request_id) {
                continue;
            }
            return serde_json::from_value::<ServerMessage>(value)
                .map_err(|err| TransportError::Protocol(err.to_string()));
        }

        Err(TransportError::Unreachable(
            "Event stream closed before the response arrived.".to_string(),
        ))
    }

    async fn send_notification(
        &mut self,
        notification: NotificationFromClient,
    ) -> Result<(), TransportError> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| TransportError::Protocol(err.to_string()))?;
        self.post(&message).await
    }

    fn set_negotiated_protocol_version(&mut self, protocol_version: String) {
        self.negotiated_protocol_version = Some(protocol_version);
    }
}

fn is_response_to(value: &Value, request_id: i64) -> bool {
    let answers = value.get("result").is_some() || value.get("error").is_some();
    answers && value.get("id").and_then(Value::as_i64) == Some(request_id)
}

async fn read_events(
    endpoint_id: String,
    response: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
    inbound_tx: mpsc::UnboundedSender<Value>,
    cancel_token: CancellationToken,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = response.bytes_stream();
    let mut parser = SseEventParser::default();

    loop {
        let chunk = tokio::select! {
            _ = cancel_token.cancelled() => return,
            chunk = stream.next() => chunk,
        };

        let (events, finished) = match chunk {
            Some(Ok(bytes)) => (parser.push(&bytes), false),
            Some(Err(err)) => {
                debug!(endpoint_id = %endpoint_id, error = %err, "SSE stream failed");
                return;
            }
            None => (parser.finish(), true),
        };

        for event in events {
            route_event(&endpoint_id, event, &mut endpoint_tx, &inbound_tx);
        }
        if finished {
            debug!(endpoint_id = %endpoint_id, "SSE stream ended");
            return;
        }
    }
}

fn route_event(
    endpoint_id: &str,
    event: SseEvent,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
    inbound_tx: &mpsc::UnboundedSender<Value>,
) {
    match event.kind() {
        ENDPOINT_EVENT => {
            if let Some(tx) = endpoint_tx.take() {
                let _ = tx.send(event.data.trim().to_string());
            }
        }
        MESSAGE_EVENT => match serde_json::from_str::<Value>(&event.data) {
            Ok(value) => {
                let _ = inbound_tx.send(value);
            }
            Err(err) => {
                debug!(endpoint_id, error = %err, "Dropping undecodable SSE message");
            }
        },
        other => {
            debug!(endpoint_id, event = other, "Ignoring SSE event");
        }
    }
}
