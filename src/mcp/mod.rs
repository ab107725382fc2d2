//! Model Context Protocol tool discovery.
//!
//! [`adapter`] connects to a single endpoint. [`discovery`] fans out over all
//! configured endpoints and [`registry`] holds the namespaced result.

pub mod adapter;
pub mod discovery;
pub mod registry;
pub mod transport;

pub use adapter::{EndpointError, EndpointErrorKind, EndpointOutcome, McpConnector, ToolConnector};
pub use discovery::{discover_tools, discover_tools_with_report, DiscoveryReport};
pub use registry::{CapabilityEntry, CapabilityRegistry, ToolHandler};
