use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_DISCOVERY_CONCURRENCY: usize = 8;
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_MAX_TOOLS_PER_ENDPOINT: usize = 100;
pub const DEFAULT_RESUME_DEBOUNCE_MILLIS: u64 = 250;

/// One request header attached to every call made to a tool endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HeaderPair {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl HeaderPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A user-configured tool-provider endpoint.
///
/// `transport` is kept as free text so an unsupported value only fails the
/// endpoint that carries it, not the whole configuration file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolEndpointConfig {
    pub id: String,
    pub display_name: String,
    pub url: String,
    pub transport: Option<String>,
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Overrides the protocol version requested during initialization.
    pub protocol_version: Option<String>,
}

impl ToolEndpointConfig {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            url: url.into(),
            transport: None,
            headers: Vec::new(),
            is_active: true,
            protocol_version: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DiscoveryConfig {
    /// Upper bound on endpoints connected at the same time.
    pub max_concurrency: Option<usize>,
    pub connect_timeout_seconds: Option<u64>,
    /// Bounds one whole endpoint connection, from the first request to the
    /// last page of tools.
    pub request_timeout_seconds: Option<u64>,
    pub max_tools_per_endpoint: Option<usize>,
}

impl DiscoveryConfig {
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_DISCOVERY_CONCURRENCY)
    }

    pub fn connect_timeout_seconds(&self) -> u64 {
        self.connect_timeout_seconds.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECONDS)
    }

    pub fn request_timeout_seconds(&self) -> u64 {
        self.request_timeout_seconds.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS)
    }

    pub fn max_tools_per_endpoint(&self) -> usize {
        self.max_tools_per_endpoint.unwrap_or(DEFAULT_MAX_TOOLS_PER_ENDPOINT)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamRegistryBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StreamRegistryConfig {
    #[serde(default)]
    pub backend: StreamRegistryBackend,
    /// Location of the registry document for the `file` backend.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ResumeConfig {
    pub debounce_millis: Option<u64>,
    /// Base URL of the chat API that serves `/{conversation}/stream`.
    pub base_url: Option<String>,
}

impl ResumeConfig {
    pub fn debounce_millis(&self) -> u64 {
        self.debounce_millis.unwrap_or(DEFAULT_RESUME_DEBOUNCE_MILLIS)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub tool_endpoints: Vec<ToolEndpointConfig>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Absent means resumption is disabled and every check skips.
    pub stream_registry: Option<StreamRegistryConfig>,
    #[serde(default)]
    pub resume: ResumeConfig,
}

fn default_true() -> bool {
    true
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
