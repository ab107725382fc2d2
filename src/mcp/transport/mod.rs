//! Transports for tool-provider endpoints.
//!
//! Both variants speak MCP JSON-RPC; they differ only in how messages travel.
//! [`ToolTransportKind`] picks the variant from configuration and everything
//! above it works through the [`ToolTransport`] trait.

use crate::core::config::ToolEndpointConfig;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use rust_mcp_schema::{InitializeRequestParams, InitializeResult, PaginatedRequestParams, Tool};
use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;

pub mod protocol;
pub mod sse;
pub mod streamable_http;

use sse::SseTransport;
use streamable_http::StreamableHttpTransport;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_EVENT_STREAM_ACCEPT: &str = "text/event-stream";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Why a transport call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint could not be reached or the connection dropped.
    Unreachable(String),
    /// The endpoint answered with something other than valid MCP.
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unreachable(message) => write!(f, "unreachable: {message}"),
            TransportError::Protocol(message) => write!(f, "protocol error: {message}"),
        }
    }
}

impl StdError for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            TransportError::Unreachable(err.to_string())
        } else {
            TransportError::Protocol(err.to_string())
        }
    }
}

/// Supported tool endpoint transports.
///
/// - [`ToolTransportKind::StreamableHttp`] POSTs every message to one URL.
/// - [`ToolTransportKind::ServerSentEvents`] keeps a GET event stream open and
///   POSTs to the endpoint it announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolTransportKind {
    StreamableHttp,
    ServerSentEvents,
}

/// Shared HTTP resources handed to a transport for one connection.
#[derive(Clone)]
pub struct TransportOptions {
    pub client: reqwest::Client,
    /// Endpoint-specific headers attached to every request.
    pub headers: HeaderMap,
}

/// Message exchange contract shared by every transport variant.
#[async_trait]
pub trait ToolTransport: Send {
    async fn send_request(
        &mut self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError>;

    async fn send_notification(
        &mut self,
        notification: NotificationFromClient,
    ) -> Result<(), TransportError>;

    fn set_negotiated_protocol_version(&mut self, protocol_version: String);
}

impl ToolTransportKind {
    /// Resolves transport type from config, defaulting to streamable HTTP.
    pub fn from_config(config: &ToolEndpointConfig) -> Result<Self, String> {
        let transport = config
            .transport
            .as_deref()
            .map(str::trim)
            .unwrap_or("streamable-http")
            .to_ascii_lowercase();
        match transport.as_str() {
            "streamable-http" | "streamable_http" | "http" => Ok(ToolTransportKind::StreamableHttp),
            "sse" | "server-sent-events" | "server_sent_events" => {
                Ok(ToolTransportKind::ServerSentEvents)
            }
            other => Err(format!("Unsupported tool transport: {}", other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolTransportKind::StreamableHttp => "streamable-http",
            ToolTransportKind::ServerSentEvents => "sse",
        }
    }

    /// Opens a connection of this kind. Streamable HTTP is lazy and only
    /// validates the URL; SSE waits for the endpoint announcement.
    pub async fn open(
        self,
        config: &ToolEndpointConfig,
        options: TransportOptions,
    ) -> Result<Box<dyn ToolTransport>, TransportError> {
        match self {
            ToolTransportKind::StreamableHttp => {
                Ok(Box::new(StreamableHttpTransport::new(config, options)?))
            }
            ToolTransportKind::ServerSentEvents => {
                Ok(Box::new(SseTransport::connect(config, options).await?))
            }
        }
    }
}

pub fn apply_json_post_headers(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    request
        .header(reqwest::header::CONTENT_TYPE, MCP_JSON_CONTENT_TYPE)
        .header(reqwest::header::ACCEPT, MCP_JSON_AND_SSE_ACCEPT)
}

pub fn apply_protocol_version_header(
    request: reqwest::RequestBuilder,
    protocol_version: Option<&str>,
) -> reqwest::RequestBuilder {
    match protocol_version {
        Some(protocol_version) if !protocol_version.trim().is_empty() => {
            request.header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
        }
        _ => request,
    }
}

/// Runs the initialize handshake and records the negotiated version.
pub async fn initialize(
    transport: &mut dyn ToolTransport,
    params: InitializeRequestParams,
) -> Result<InitializeResult, TransportError> {
    let response = transport
        .send_request(RequestFromClient::InitializeRequest(params))
        .await?;
    let result = protocol::parse_initialize_result(response).map_err(TransportError::Protocol)?;
    transport.set_negotiated_protocol_version(result.protocol_version.clone());
    transport
        .send_notification(NotificationFromClient::InitializedNotification(None))
        .await?;
    Ok(result)
}

/// Lists tools across pages, stopping at `max_tools`.
///
/// A server that does not implement `tools/list` has no tools.
pub async fn list_tools(
    transport: &mut dyn ToolTransport,
    max_tools: usize,
) -> Result<Vec<Tool>, TransportError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    let mut seen_cursors = HashSet::new();

    loop {
        let params = cursor.take().map(|cursor| PaginatedRequestParams {
            cursor: Some(cursor),
            meta: None,
        });
        let response = transport
            .send_request(RequestFromClient::ListToolsRequest(params))
            .await?;
        if protocol::is_method_not_found(&response) {
            break;
        }

        let page = protocol::parse_list_tools(response).map_err(TransportError::Protocol)?;
        tools.extend(page.tools);
        if tools.len() >= max_tools {
            tools.truncate(max_tools);
            break;
        }

        match page.next_cursor {
            Some(next) if !next.is_empty() && seen_cursors.insert(next.clone()) => {
                cursor = Some(next);
            }
            _ => break,
        }
    }

    Ok(tools)
}
