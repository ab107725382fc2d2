//! Concurrent tool discovery across every configured endpoint.

use super::adapter::{connect_endpoint, EndpointError, EndpointOutcome, ToolConnector};
use super::registry::{assign_prefixes, CapabilityRegistry, RegistryBuilder};
use crate::core::config::{DiscoveryConfig, ToolEndpointConfig};
use futures_util::stream::{self, StreamExt};
use tracing::info;

/// Per-run tally of endpoint outcomes.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// Endpoints that listed at least one tool.
    pub connected: usize,
    /// Endpoints that connected but listed nothing.
    pub empty: usize,
    pub inactive: usize,
    pub failures: Vec<EndpointError>,
    pub tool_count: usize,
}

impl DiscoveryReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    fn record(&mut self, outcome: &EndpointOutcome) {
        match outcome {
            EndpointOutcome::Inactive => self.inactive += 1,
            EndpointOutcome::Connected(tools) if tools.is_empty() => self.empty += 1,
            EndpointOutcome::Connected(_) => self.connected += 1,
            EndpointOutcome::Failed(err) => self.failures.push(err.clone()),
        }
    }
}

/// Builds a fresh registry from `endpoints`.
pub async fn discover_tools(
    connector: &dyn ToolConnector,
    endpoints: &[ToolEndpointConfig],
    discovery: &DiscoveryConfig,
) -> CapabilityRegistry {
    discover_tools_with_report(connector, endpoints, discovery)
        .await
        .0
}

/// Like [`discover_tools`], also returning the outcome tally.
///
/// Every endpoint is attempted; a failure only removes that endpoint's tools.
pub async fn discover_tools_with_report(
    connector: &dyn ToolConnector,
    endpoints: &[ToolEndpointConfig],
    discovery: &DiscoveryConfig,
) -> (CapabilityRegistry, DiscoveryReport) {
    let mut report = DiscoveryReport::default();
    if endpoints.is_empty() {
        return (CapabilityRegistry::default(), report);
    }

    let prefixes = assign_prefixes(endpoints);
    let limit = discovery.max_concurrency().min(endpoints.len());

    let outcomes: Vec<(usize, EndpointOutcome)> = stream::iter(endpoints.iter().enumerate())
        .map(|(index, endpoint)| async move { (index, connect_endpoint(connector, endpoint).await) })
        .buffer_unordered(limit)
        .collect()
        .await;

    let mut builder = RegistryBuilder::new();
    for (index, outcome) in outcomes {
        report.record(&outcome);
        if let EndpointOutcome::Connected(tools) = outcome {
            let endpoint = &endpoints[index];
            builder.add_endpoint_tools(&prefixes[index], &endpoint.id, tools);
        }
    }

    let registry = builder.build();
    report.tool_count = registry.len();
    info!(
        endpoints = endpoints.len(),
        connected = report.connected,
        empty = report.empty,
        inactive = report.inactive,
        failed = report.failed(),
        tool_count = report.tool_count,
        "Tool discovery finished"
    );
    (registry, report)
}
