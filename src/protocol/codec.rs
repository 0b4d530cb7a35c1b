//! JSON-RPC envelope encoding and decoding
//!
//! Pure functions, no I/O. The HTTP transport feeds status, content type and
//! body bytes in; callers get either a result payload or a typed error.

use axum::http::StatusCode;
use serde_json::Value;

use super::{JsonRpcError, JsonRpcRequest, RequestId, RpcEnvelope};
use crate::error::{rpc_codes, truncate_excerpt};
use crate::{Error, Result};

/// Encode a request. `id == None` encodes a notification, which omits `id`
/// and expects no response.
pub fn encode_request(
    method: &str,
    params: Option<Value>,
    id: Option<RequestId>,
) -> Result<Vec<u8>> {
    let request = match id {
        Some(id) => JsonRpcRequest::new(id, method, params),
        None => JsonRpcRequest::notification(method, params),
    };
    Ok(serde_json::to_vec(&request)?)
}

/// Decode a JSON value into an envelope by shape.
pub fn decode_envelope(value: Value) -> Result<RpcEnvelope> {
    let Value::Object(mut map) = value else {
        return Err(Error::Protocol(
            "JSON-RPC message must be a JSON object".to_string(),
        ));
    };

    if map.contains_key("method") {
        let request: JsonRpcRequest = serde_json::from_value(Value::Object(map))
            .map_err(|e| Error::Protocol(format!("Malformed JSON-RPC request: {e}")))?;
        return Ok(RpcEnvelope::Request(request));
    }

    let id = match map.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            serde_json::from_value::<RequestId>(raw)
                .map_err(|e| Error::Protocol(format!("Invalid response id: {e}")))?,
        ),
    };

    if let Some(raw_error) = map.remove("error") {
        let error: JsonRpcError = serde_json::from_value(raw_error)
            .map_err(|e| Error::Protocol(format!("Malformed JSON-RPC error object: {e}")))?;
        return Ok(RpcEnvelope::Error { id, error });
    }

    match map.remove("result") {
        Some(result) => Ok(RpcEnvelope::Success { id, result }),
        None => Err(Error::Protocol(
            "JSON-RPC response has neither result nor error".to_string(),
        )),
    }
}

/// Decode an HTTP response carrying a JSON-RPC reply.
///
/// Returns `Ok(None)` for an acknowledged notification. A JSON-RPC `error`
/// in a 2xx body and a non-2xx status both surface as [`Error::JsonRpc`].
pub fn decode_response(
    status: u16,
    content_type: Option<&str>,
    body: &[u8],
    expect_response: bool,
) -> Result<Option<Value>> {
    let text = String::from_utf8_lossy(body);
    let payload = if content_type.is_some_and(|ct| ct.contains("text/event-stream")) {
        first_event_data(&text).unwrap_or_default()
    } else {
        text.trim().to_string()
    };

    let success = (200..300).contains(&status);

    if payload.is_empty() {
        if !success {
            return Err(http_status_error(status, ""));
        }
        if expect_response {
            return Err(Error::Protocol(
                "Empty response body where a JSON-RPC response was expected".to_string(),
            ));
        }
        return Ok(None);
    }

    let value: Value = match serde_json::from_str(&payload) {
        Ok(v) => v,
        Err(_) if !success => return Err(http_status_error(status, &payload)),
        Err(e) => return Err(Error::Protocol(format!("Invalid JSON in response body: {e}"))),
    };

    match decode_envelope(value) {
        Ok(RpcEnvelope::Error { error, .. }) => Err(Error::JsonRpc {
            code: error.code,
            message: error.message,
        }),
        _ if !success => Err(http_status_error(status, &payload)),
        Ok(RpcEnvelope::Success { result, .. }) => Ok(Some(result)),
        Ok(RpcEnvelope::Request(_)) => Err(Error::Protocol(
            "Expected a JSON-RPC response but received a request".to_string(),
        )),
        Err(e) if expect_response => Err(e),
        Err(_) => Ok(None),
    }
}

/// Build the error for a non-2xx status without a JSON-RPC error body
fn http_status_error(status: u16, body: &str) -> Error {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status");
    let excerpt = truncate_excerpt(body);
    let message = if excerpt.is_empty() {
        format!("HTTP {status} {reason}")
    } else {
        format!("HTTP {status} {reason}: {excerpt}")
    };
    Error::JsonRpc {
        code: rpc_codes::SERVER_ERROR,
        message,
    }
}

/// Extract the first `data:` payload from an event-stream body
fn first_event_data(text: &str) -> Option<String> {
    let mut data = Vec::new();
    for line in text.lines() {
        if let Some(chunk) = line.strip_prefix("data:") {
            data.push(chunk.trim().to_string());
        } else if line.trim().is_empty() && !data.is_empty() {
            break;
        }
    }
    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}
