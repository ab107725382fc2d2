use super::{
    apply_json_post_headers, apply_protocol_version_header, protocol, ToolTransport,
    TransportError, TransportOptions, MCP_SESSION_ID_HEADER,
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
use tracing::debug;

/// Client side of the MCP streamable HTTP transport: every JSON-RPC message
/// is a POST to one URL, answered by JSON or by an event stream.
pub struct StreamableHttpTransport {
    endpoint_id: String,
    client: reqwest::Client,
    url: reqwest::Url,
    headers: HeaderMap,
    session_id: Option<String>,
    requested_protocol_version: String,
    negotiated_protocol_version: Option<String>,
    next_request_id: i64,
}

impl StreamableHttpTransport {
    pub fn new(
        config: &ToolEndpointConfig,
        options: TransportOptions,
    ) -> Result<Self, TransportError> {
        let url = reqwest::Url::parse(config.url.trim()).map_err(|err| {
            TransportError::Protocol(format!("Invalid endpoint URL {}: {err}", config.url))
        })?;
        Ok(Self {
            endpoint_id: config.id.clone(),
            client: options.client,
            url,
            headers: options.headers,
            session_id: None,
            requested_protocol_version: protocol::requested_protocol_version(config),
            negotiated_protocol_version: None,
            next_request_id: 0,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn effective_protocol_version(&self) -> String {
        protocol::effective_protocol_version(
            &self.requested_protocol_version,
            self.negotiated_protocol_version.as_deref(),
        )
    }

    fn next_request_id(&mut self) -> i64 {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.saturating_add(1);
        request_id
    }

    async fn post(&mut self, message: &ClientMessage) -> Result<reqwest::Response, TransportError> {
        let payload = serde_json::to_string(message)
            .map_err(|err| TransportError::Protocol(err.to_string()))?;
        let protocol_version = self.effective_protocol_version();
        let request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone());
        let mut request = apply_protocol_version_header(
            apply_json_post_headers(request),
            Some(protocol_version.as_str()),
        )
        .body(payload);

        if let Some(session_id) = &self.session_id {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Protocol(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
        {
            self.session_id = Some(session_id);
        }
        Ok(response)
    }
}

#[async_trait]
impl ToolTransport for StreamableHttpTransport {
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

        debug!(endpoint_id = %self.endpoint_id, url = %self.url, request_id, "Sending MCP HTTP request");
        let response = self.post(&message).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if is_event_stream_content_type(&content_type) {
            next_sse_server_message(response).await
        } else {
            let body = response.bytes().await?;
            serde_json::from_slice::<ServerMessage>(&body)
                .map_err(|err| TransportError::Protocol(err.to_string()))
        }
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
        self.post(&message).await.map(|_| ())
    }

    fn set_negotiated_protocol_version(&mut self, protocol_version: String) {
        self.negotiated_protocol_version = Some(protocol_version);
    }
}

/// Reads an event-stream response until the first JSON-RPC response or error.
/// Server-initiated requests and notifications on the same stream are skipped.
async fn next_sse_server_message(
    response: reqwest::Response,
) -> Result<ServerMessage, TransportError> {
    let mut stream = response.bytes_stream();
    let mut parser = SseEventParser::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in parser.push(&chunk) {
            if let Some(message) = decode_sse_event(&event)? {
                return Ok(message);
            }
        }
    }

    for event in parser.finish() {
        if let Some(message) = decode_sse_event(&event)? {
            return Ok(message);
        }
    }

    Err(TransportError::Protocol(
        "Empty event-stream response.".to_string(),
    ))
}

/// Decodes one event's data, which may have arrived over several `data:`
/// lines.
fn decode_sse_event(event: &SseEvent) -> Result<Option<ServerMessage>, TransportError> {
    let payload = event.data.trim();
    if payload.is_empty() {
        return Ok(None);
    }

    let message = serde_json::from_str::<ServerMessage>(payload)
        .map_err(|err| TransportError::Protocol(err.to_string()))?;
    Ok(match message {
        ServerMessage::Response(_) | ServerMessage::Error(_) => Some(message),
        _ => None,
    })
}
