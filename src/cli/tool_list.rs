use std::error::Error;

use crate::core::config::Config;
use crate::mcp::{discover_tools_with_report, CapabilityRegistry, DiscoveryReport, McpConnector};

pub async fn list_tools(config: &Config) -> Result<(), Box<dyn Error>> {
    if config.tool_endpoints.is_empty() {
        println!("No tool endpoints configured.");
        return Ok(());
    }

    let connector = McpConnector::new(&config.discovery)?;
    let (registry, report) =
        discover_tools_with_report(&connector, &config.tool_endpoints, &config.discovery).await;

    for line in render_tools(&registry, &report) {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn render_tools(registry: &CapabilityRegistry, report: &DiscoveryReport) -> Vec<String> {
    let mut lines = Vec::new();
    if registry.is_empty() {
        lines.push("No tools discovered.".to_string());
    } else {
        lines.push("Discovered tools:".to_string());
        for entry in registry.sorted() {
            let mut line = format!("  {}", entry.namespaced_id);
            if let Some(description) = entry.handler.description() {
                let summary = description.lines().next().unwrap_or_default().trim();
                if !summary.is_empty() {
                    line.push_str(&format!(" - {summary}"));
                }
            }
            lines.push(line);
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "{} tool(s): {} connected, {} empty, {} inactive, {} failed",
        report.tool_count,
        report.connected,
        report.empty,
        report.inactive,
        report.failed()
    ));
    for failure in &report.failures {
        lines.push(format!("  {failure}"));
    }
    lines
}
