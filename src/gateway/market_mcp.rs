//! Managed market MCP endpoint
//!
//! Server side of the JSON-RPC tool protocol for the managed market tools:
//! `initialize`, `notifications/initialized`, `tools/list` and `tools/call`.
//! Calls are validated against the fixed catalog and served with a single
//! GET against the market data source.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::rpc_codes;
use crate::market::{self, UpstreamClient};
use crate::protocol::{
    Content, Info, InitializeResult, JsonRpcResponse, RequestId, ServerCapabilities,
    ToolsCallResult, ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::{Error, Result};

/// Server name reported by `initialize`
pub const SERVER_NAME: &str = "jamaica-market";

/// Parsed inbound JSON-RPC message
#[derive(Debug)]
struct InboundRequest {
    id: Option<RequestId>,
    method: String,
    params: Option<Value>,
}

/// Managed market MCP handler
pub struct MarketMcp {
    upstream: Arc<UpstreamClient>,
}

impl MarketMcp {
    /// Create a handler backed by `upstream`
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self { upstream }
    }

    /// Handle one decoded JSON-RPC message.
    ///
    /// Returns `None` for notifications, which never receive a body.
    pub async fn handle(
        &self,
        message: &Value,
        cancel: Option<&CancellationToken>,
    ) -> Option<JsonRpcResponse> {
        let request = match parse_request(message) {
            Ok(request) => request,
            Err(response) => return Some(response),
        };

        let Some(id) = request.id else {
            if request.method.starts_with("notifications/") {
                debug!(method = %request.method, "Notification acknowledged");
            } else {
                debug!(method = %request.method, "Ignoring request without id");
            }
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => Self::handle_initialize(id, request.params.as_ref()),
            "tools/list" => Self::handle_tools_list(id),
            "tools/call" => {
                self.handle_tools_call(id, request.params.as_ref(), cancel)
                    .await
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            method => JsonRpcResponse::error(
                Some(id),
                rpc_codes::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ),
        };
        Some(response)
    }

    /// Handle `initialize` with version negotiation
    pub fn handle_initialize(id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
        let client_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let negotiated = negotiate_version(client_version);
        debug!(
            client = client_version,
            negotiated, "Protocol version negotiation"
        );

        let result = InitializeResult {
            protocol_version: negotiated.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: Info {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "Jamaica Stock Exchange market data: companies, financial statements and prices."
                    .to_string(),
            ),
        };
        to_success(id, &result)
    }

    /// Handle `tools/list`: the static catalog, verbatim
    pub fn handle_tools_list(id: RequestId) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: market::definitions()
                .iter()
                .map(market::ManagedToolDefinition::to_tool)
                .collect(),
            next_cursor: None,
        };
        to_success(id, &result)
    }

    /// Handle `tools/call`
    pub async fn handle_tools_call(
        &self,
        id: RequestId,
        params: Option<&Value>,
        cancel: Option<&CancellationToken>,
    ) -> JsonRpcResponse {
        let (name, arguments) = match extract_call_params(params) {
            Ok(parsed) => parsed,
            Err(message) => {
                return JsonRpcResponse::error(Some(id), rpc_codes::INVALID_PARAMS, message);
            }
        };

        let Some(definition) = market::find(name) else {
            return JsonRpcResponse::error(
                Some(id),
                rpc_codes::INVALID_PARAMS,
                format!("Tool not found: {name}"),
            );
        };

        match self.call(definition, &arguments, cancel).await {
            Ok(payload) => {
                let result = ToolsCallResult {
                    content: vec![Content::text(summarize_payload(name, &payload))],
                    structured_content: Some(payload),
                    is_error: false,
                };
                to_success(id, &result)
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Managed tool call failed");
                JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string())
            }
        }
    }

    async fn call(
        &self,
        definition: &market::ManagedToolDefinition,
        arguments: &Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value> {
        let call = definition.prepare(arguments)?;
        let path = call.upstream_path();
        info!(tool = definition.name, path = %path.path, "Calling market data source");
        self.upstream.get_json(&path, cancel).await
    }
}

/// Describe the shape of an upstream payload without restating it
#[must_use]
pub fn summarize_payload(tool: &str, payload: &Value) -> String {
    match payload {
        Value::Array(items) => {
            let noun = if items.len() == 1 { "record" } else { "records" };
            format!("Returned {} {noun} from {tool}.", items.len())
        }
        Value::Object(map) => {
            let noun = if map.len() == 1 { "field" } else { "fields" };
            format!("Returned an object with {} {noun} from {tool}.", map.len())
        }
        Value::Null => format!("Returned no data from {tool}."),
        Value::String(_) => format!("Returned a string value from {tool}."),
        Value::Number(_) => format!("Returned a number value from {tool}."),
        Value::Bool(_) => format!("Returned a boolean value from {tool}."),
    }
}

fn to_success<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(
            Some(id),
            rpc_codes::INTERNAL_ERROR,
            Error::from(e).to_string(),
        ),
    }
}

/// Extract a `RequestId` from a JSON value (string or integer)
fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

/// Validate the envelope of an inbound message
#[allow(clippy::result_large_err)]
fn parse_request(value: &Value) -> std::result::Result<InboundRequest, JsonRpcResponse> {
    if value.is_array() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Batch requests are not supported",
        ));
    }
    if !value.is_object() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Request must be a JSON object",
        ));
    }

    let id = value.get("id").and_then(extract_request_id);
    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcResponse::error(
            id,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    Ok(InboundRequest {
        id,
        method: method.to_string(),
        params: value.get("params").cloned(),
    })
}

/// Pull `name` and `arguments` out of `tools/call` params.
///
/// Absent `arguments` means an empty object; anything else that is not an
/// object is malformed.
fn extract_call_params(params: Option<&Value>) -> std::result::Result<(&str, Value), String> {
    let Some(params) = params.filter(|p| p.is_object()) else {
        return Err("tools/call requires params with 'name' and 'arguments'".to_string());
    };
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "tools/call params.name must be a non-empty string".to_string())?;
    let arguments = match params.get("arguments") {
        None | Some(Value::Null) => json!({}),
        Some(args @ Value::Object(_)) => args.clone(),
        Some(_) => return Err("tools/call params.arguments must be an object".to_string()),
    };
    Ok((name, arguments))
}
