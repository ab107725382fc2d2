//! Connects to one tool endpoint and lists its tools.
//!
//! Every failure is folded into an [`EndpointOutcome`] so callers never see a
//! transport error escape.

use super::transport::{self, protocol, ToolTransportKind, TransportError, TransportOptions};
use crate::core::config::{DiscoveryConfig, HeaderPair, ToolEndpointConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rust_mcp_schema::Tool;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointErrorKind {
    Unreachable,
    Protocol,
    Timeout,
}

impl EndpointErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointErrorKind::Unreachable => "unreachable",
            EndpointErrorKind::Protocol => "protocol",
            EndpointErrorKind::Timeout => "timeout",
        }
    }
}

/// A failed connection attempt, tagged with the endpoint it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointError {
    pub endpoint_id: String,
    pub kind: EndpointErrorKind,
    pub message: String,
}

impl EndpointError {
    pub fn new(
        endpoint_id: impl Into<String>,
        kind: EndpointErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            kind,
            message: message.into(),
        }
    }

    fn from_transport(endpoint_id: &str, err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(message) => {
                Self::new(endpoint_id, EndpointErrorKind::Unreachable, message)
            }
            TransportError::Protocol(message) => {
                Self::new(endpoint_id, EndpointErrorKind::Protocol, message)
            }
        }
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Endpoint '{}' {}: {}",
            self.endpoint_id,
            self.kind.as_str(),
            self.message
        )
    }
}

impl std::error::Error for EndpointError {}

/// Settled result of one adapter call.
#[derive(Debug, Clone)]
pub enum EndpointOutcome {
    /// The endpoint is switched off; nothing was attempted.
    Inactive,
    /// Connected and listed; the list may be empty.
    Connected(Vec<Tool>),
    Failed(EndpointError),
}

impl EndpointOutcome {
    pub fn tools(&self) -> &[Tool] {
        match self {
            EndpointOutcome::Connected(tools) => tools,
            EndpointOutcome::Inactive | EndpointOutcome::Failed(_) => &[],
        }
    }
}

/// Lists tools for one active endpoint.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn list_tools(&self, endpoint: &ToolEndpointConfig) -> Result<Vec<Tool>, EndpointError>;
}

/// Runs one endpoint through `connector`, logging the attempt and its result.
pub async fn connect_endpoint(
    connector: &dyn ToolConnector,
    endpoint: &ToolEndpointConfig,
) -> EndpointOutcome {
    if !endpoint.is_active {
        debug!(endpoint_id = %endpoint.id, "Skipping inactive tool endpoint");
        return EndpointOutcome::Inactive;
    }

    debug!(
        endpoint_id = %endpoint.id,
        url = %endpoint.url,
        transport = endpoint.transport.as_deref().unwrap_or("streamable-http"),
        "Connecting to tool endpoint"
    );
    match connector.list_tools(endpoint).await {
        Ok(tools) if tools.is_empty() => {
            info!(endpoint_id = %endpoint.id, "Tool endpoint exposes no tools");
            EndpointOutcome::Connected(tools)
        }
        Ok(tools) => {
            info!(endpoint_id = %endpoint.id, tool_count = tools.len(), "Listed endpoint tools");
            EndpointOutcome::Connected(tools)
        }
        Err(err) => {
            warn!(
                endpoint_id = %err.endpoint_id,
                kind = err.kind.as_str(),
                error = %err.message,
                "Tool endpoint failed"
            );
            EndpointOutcome::Failed(err)
        }
    }
}

/// [`ToolConnector`] that speaks MCP over the configured transport.
pub struct McpConnector {
    client: reqwest::Client,
    request_timeout: Duration,
    max_tools: usize,
}

impl McpConnector {
    pub fn new(discovery: &DiscoveryConfig) -> Result<Self, String> {
        let client = build_mcp_http_client(discovery)?;
        Ok(Self {
            client,
            request_timeout: Duration::from_secs(discovery.request_timeout_seconds()),
            max_tools: discovery.max_tools_per_endpoint(),
        })
    }

    async fn handshake_and_list(
        &self,
        endpoint: &ToolEndpointConfig,
    ) -> Result<Vec<Tool>, EndpointError> {
        let kind = ToolTransportKind::from_config(endpoint).map_err(|message| {
            EndpointError::new(&endpoint.id, EndpointErrorKind::Protocol, message)
        })?;
        let options = TransportOptions {
            client: self.client.clone(),
            headers: header_map(&endpoint.id, &endpoint.headers),
        };
        let as_endpoint_error = |err: TransportError| EndpointError::from_transport(&endpoint.id, err);

        let mut connection = kind
            .open(endpoint, options)
            .await
            .map_err(as_endpoint_error)?;
        let details =
            transport::initialize(connection.as_mut(), protocol::client_details_for(endpoint))
                .await
                .map_err(as_endpoint_error)?;
        if details.capabilities.tools.is_none() {
            debug!(endpoint_id = %endpoint.id, "Endpoint does not advertise tools");
            return Ok(Vec::new());
        }

        transport::list_tools(connection.as_mut(), self.max_tools)
            .await
            .map_err(as_endpoint_error)
    }
}

#[async_trait]
impl ToolConnector for McpConnector {
    async fn list_tools(&self, endpoint: &ToolEndpointConfig) -> Result<Vec<Tool>, EndpointError> {
        match tokio::time::timeout(self.request_timeout, self.handshake_and_list(endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(EndpointError::new(
                &endpoint.id,
                EndpointErrorKind::Timeout,
                format!("No answer within {} seconds", self.request_timeout.as_secs()),
            )),
        }
    }
}

// No client-wide request timeout: the SSE stream outlives any single request.
// The whole exchange is bounded in `list_tools` instead.
fn build_mcp_http_client(discovery: &DiscoveryConfig) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(discovery.connect_timeout_seconds()))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| err.to_string())
}

/// Converts configured header pairs into request headers. Pairs with a blank
/// key are dropped silently; pairs that are not valid HTTP are dropped with a
/// debug log.
pub fn header_map(endpoint_id: &str, pairs: &[HeaderPair]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for pair in pairs {
        let key = pair.key.trim();
        if key.is_empty() {
            continue;
        }
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(err) => {
                debug!(endpoint_id, header = key, error = %err, "Dropping invalid header name");
                continue;
            }
        };
        match HeaderValue::from_str(pair.value.trim()) {
            Ok(value) => {
                headers.append(name, value);
            }
            Err(err) => {
                debug!(endpoint_id, header = key, error = %err, "Dropping invalid header value");
            }
        }
    }
    headers
}
