use crate::core::config::ToolEndpointConfig;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    ClientCapabilities, Implementation, InitializeRequestParams, InitializeResult,
    ListToolsResult, RpcError, LATEST_PROTOCOL_VERSION,
};
use serde_json::Value;

/// JSON-RPC code used by servers to indicate unsupported list methods.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;

pub(crate) fn requested_protocol_version(config: &ToolEndpointConfig) -> String {
    config
        .protocol_version
        .clone()
        .filter(|version| !version.trim().is_empty())
        .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string())
}

pub(crate) fn effective_protocol_version(requested: &str, negotiated: Option<&str>) -> String {
    match negotiated {
        Some(version) if !version.trim().is_empty() => version.to_string(),
        _ => requested.to_string(),
    }
}

pub(crate) fn client_details_for(config: &ToolEndpointConfig) -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "relaychat".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Relaychat MCP Client".to_string()),
            description: Some("Relaychat tool discovery client".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: requested_protocol_version(config),
    }
}

/// Returns true when a server reports the JSON-RPC method-not-found code.
pub fn is_method_not_found(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Error(error) if error.error.code == MCP_METHOD_NOT_FOUND
    )
}

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let value = parse_response_value(message)?;
    let result =
        serde_json::from_value::<InitializeResult>(value).map_err(|err| err.to_string())?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

pub(crate) fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, String> {
    let value = parse_response_value(message)?;
    serde_json::from_value::<ListToolsResult>(value).map_err(|err| err.to_string())
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value, String> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())
        }
        ServerMessage::Error(error) => Err(format_rpc_error(&error.error)),
        other => Err(format!("Unexpected MCP server message: {other:?}")),
    }
}

fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_message(value: Value) -> ServerMessage {
        serde_json::from_value(value).expect("message should parse")
    }

    #[test]
    fn parse_initialize_rejects_blank_protocol_version() {
        let message = server_message(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "capabilities": {},
                "protocolVersion": " ",
                "serverInfo": {"name": "x", "version": "1.0.0"}
            }
        }));

        assert!(parse_initialize_result(message).is_err());
    }

    #[test]
    fn effective_protocol_prefers_negotiated() {
        assert_eq!(
            effective_protocol_version("2025-01-01", Some("2025-11-25")),
            "2025-11-25"
        );
        assert_eq!(effective_protocol_version("2025-01-01", Some(" ")), "2025-01-01");
        assert_eq!(effective_protocol_version("2025-01-01", None), "2025-01-01");
    }

    #[test]
    fn blank_configured_version_falls_back_to_latest() {
        let mut config = ToolEndpointConfig::new("alpha", "Alpha", "http://localhost");
        config.protocol_version = Some("  ".to_string());
        assert_eq!(requested_protocol_version(&config), LATEST_PROTOCOL_VERSION);

        config.protocol_version = Some("2025-03-26".to_string());
        assert_eq!(requested_protocol_version(&config), "2025-03-26");
    }

    #[test]
    fn method_not_found_is_detected_and_formatted() {
        let message = server_message(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32601, "message": "Method not found", "data": "tools/list"}
        }));
        assert!(is_method_not_found(&message));

        let err = parse_list_tools(message).expect_err("error response");
        assert_eq!(err, "MCP error -32601: Method not found\ntools/list");
    }

    #[test]
    fn parse_list_tools_reads_cursor_and_names() {
        let message = server_message(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "tools": [
                    {"name": "search", "inputSchema": {"type": "object"}},
                    {"name": "fetch", "inputSchema": {"type": "object"}}
                ],
                "nextCursor": "page-2"
            }
        }));

        let list = parse_list_tools(message).expect("list should parse");
        let names: Vec<_> = list.tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, vec!["search", "fetch"]);
        assert_eq!(list.next_cursor.as_deref(), Some("page-2"));
    }
}
