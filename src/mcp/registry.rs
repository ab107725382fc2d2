use crate::core::config::ToolEndpointConfig;
use rust_mcp_schema::Tool;
use std::collections::{HashMap, HashSet};

/// Separates an endpoint prefix from the raw tool name in registry keys.
pub const NAMESPACE_SEPARATOR: &str = "__";

const FALLBACK_PREFIX: &str = "endpoint";

/// A discovered tool together with the endpoint that serves it.
#[derive(Debug, Clone)]
pub struct ToolHandler {
    endpoint_id: String,
    tool: Tool,
}

impl ToolHandler {
    pub fn new(endpoint_id: impl Into<String>, tool: Tool) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            tool,
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn description(&self) -> Option<&str> {
        self.tool.description.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityEntry {
    pub namespaced_id: String,
    pub underlying_id: String,
    pub owner_endpoint_id: String,
    pub handler: ToolHandler,
}

/// Namespaced tools from one discovery run. Built once, then read-only.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, CapabilityEntry>,
}

impl CapabilityRegistry {
    pub fn get(&self, namespaced_id: &str) -> Option<&CapabilityEntry> {
        self.entries.get(namespaced_id)
    }

    pub fn contains(&self, namespaced_id: &str) -> bool {
        self.entries.contains_key(namespaced_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityEntry> {
        self.entries.values()
    }

    /// Entries sorted by key, for stable display.
    pub fn sorted(&self) -> Vec<&CapabilityEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| a.namespaced_id.cmp(&b.namespaced_id));
        entries
    }
}

/// Collects settled endpoint results into a [`CapabilityRegistry`].
///
/// Keys are `{prefix}{NAMESPACE_SEPARATOR}{tool}`. Prefixes are unique per
/// endpoint and never contain the separator, so two endpoints cannot produce
/// the same key regardless of the order their tools are added.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, CapabilityEntry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint_tools(&mut self, prefix: &str, endpoint_id: &str, tools: Vec<Tool>) {
        for tool in tools {
            let namespaced_id = namespaced_id(prefix, &tool.name);
            let entry = CapabilityEntry {
                namespaced_id: namespaced_id.clone(),
                underlying_id: tool.name.clone(),
                owner_endpoint_id: endpoint_id.to_string(),
                handler: ToolHandler::new(endpoint_id, tool),
            };
            // A server listing the same name twice keeps its first definition.
            self.entries.entry(namespaced_id).or_insert(entry);
        }
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            entries: self.entries,
        }
    }
}

pub fn namespaced_id(prefix: &str, tool_name: &str) -> String {
    format!("{prefix}{NAMESPACE_SEPARATOR}{tool_name}")
}

/// Replaces each run of non-alphanumeric characters with `_` and trims
/// underscores from both ends.
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !sanitized.is_empty() {
                sanitized.push('_');
            }
            pending_separator = false;
            sanitized.push(ch);
        } else {
            pending_separator = true;
        }
    }
    sanitized
}

/// Assigns one unique prefix per endpoint, in configuration order.
///
/// The sanitized display name is preferred. A clash is resolved by appending
/// the sanitized endpoint id, then a counter.
pub fn assign_prefixes(endpoints: &[ToolEndpointConfig]) -> Vec<String> {
    let mut taken = HashSet::new();
    endpoints
        .iter()
        .map(|endpoint| {
            let id = sanitize_name(&endpoint.id);
            let mut base = sanitize_name(&endpoint.display_name);
            if base.is_empty() {
                base = if id.is_empty() {
                    FALLBACK_PREFIX.to_string()
                } else {
                    id.clone()
                };
            }

            let mut prefix = base.clone();
            if taken.contains(&prefix) && !id.is_empty() && id != base {
                prefix = format!("{base}_{id}");
            }
            let stem = prefix.clone();
            let mut counter = 2;
            while taken.contains(&prefix) {
                prefix = format!("{stem}_{counter}");
                counter += 1;
            }
            taken.insert(prefix.clone());
            prefix
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_mcp_schema::ToolInputSchema;

    fn sample_tool(name: &str) -> Tool {
        Tool {
            annotations: None,
            description: Some(format!("{name} tool")),
            execution: None,
            icons: Vec::new(),
            input_schema: ToolInputSchema::new(Vec::new(), None, None),
            meta: None,
            name: name.to_string(),
            output_schema: None,
            title: None,
        }
    }

    fn endpoint(id: &str, display_name: &str) -> ToolEndpointConfig {
        ToolEndpointConfig::new(id, display_name, "http://localhost/mcp")
    }

    #[test]
    fn sanitize_collapses_runs_and_trims() {
        assert_eq!(sanitize_name("My Search-API!"), "My_Search_API");
        assert_eq!(sanitize_name("  --weird__name--  "), "weird_name");
        assert_eq!(sanitize_name("ünïcode"), "n_code");
        assert_eq!(sanitize_name("***"), "");
    }

    #[test]
    fn prefixes_never_contain_separator() {
        let prefixes = assign_prefixes(&[endpoint("a", "x__y"), endpoint("b", "__")]);
        assert_eq!(prefixes, vec!["x_y", "b"]);
        assert!(prefixes.iter().all(|p| !p.contains(NAMESPACE_SEPARATOR)));
    }

    #[test]
    fn clashing_display_names_get_distinct_prefixes() {
        let prefixes = assign_prefixes(&[
            endpoint("one", "Web Search"),
            endpoint("two", "web-search"),
            endpoint("three", "Web.Search"),
            endpoint("one", "Web Search"),
        ]);
        assert_eq!(
            prefixes,
            vec!["Web_Search", "web_search", "Web_Search_three", "Web_Search_one"]
        );
    }

    #[test]
    fn repeated_id_and_name_fall_back_to_counter() {
        let prefixes = assign_prefixes(&[
            endpoint("docs", "Docs"),
            endpoint("docs", "Docs"),
            endpoint("docs", "Docs"),
        ]);
        assert_eq!(prefixes, vec!["Docs", "Docs_docs", "Docs_docs_2"]);
    }

    #[test]
    fn blank_display_name_uses_id_then_fallback() {
        let prefixes = assign_prefixes(&[endpoint("alpha-1", "   "), endpoint("!!", "??")]);
        assert_eq!(prefixes, vec!["alpha_1", "endpoint"]);
    }

    #[test]
    fn identical_tool_names_resolve_to_their_owner() {
        let mut builder = RegistryBuilder::new();
        builder.add_endpoint_tools("Alpha", "alpha", vec![sample_tool("search")]);
        builder.add_endpoint_tools("Beta", "beta", vec![sample_tool("search")]);
        let registry = builder.build();

        assert_eq!(registry.len(), 2);
        let alpha = registry.get("Alpha__search").expect("alpha entry");
        let beta = registry.get("Beta__search").expect("beta entry");
        assert_eq!(alpha.owner_endpoint_id, "alpha");
        assert_eq!(alpha.handler.endpoint_id(), "alpha");
        assert_eq!(beta.owner_endpoint_id, "beta");
        assert_eq!(beta.underlying_id, "search");
        assert_eq!(beta.handler.description(), Some("search tool"));
    }

    #[test]
    fn merge_order_does_not_change_the_registry() {
        let mut forward = RegistryBuilder::new();
        forward.add_endpoint_tools("A", "a", vec![sample_tool("x"), sample_tool("y")]);
        forward.add_endpoint_tools("B", "b", vec![sample_tool("x")]);

        let mut reverse = RegistryBuilder::new();
        reverse.add_endpoint_tools("B", "b", vec![sample_tool("x")]);
        reverse.add_endpoint_tools("A", "a", vec![sample_tool("x"), sample_tool("y")]);

        let keys = |registry: &CapabilityRegistry| {
            registry
                .sorted()
                .iter()
                .map(|entry| (entry.namespaced_id.clone(), entry.owner_endpoint_id.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&forward.build()), keys(&reverse.build()));
    }
}
