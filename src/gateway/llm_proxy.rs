//! LLM completions passthrough
//!
//! Clients never hold the real credential. They send nothing, or the shared
//! sentinel, and the edge injects its own key after checking the requested
//! model against a curated allow-list. Responses (including event streams)
//! are piped back unmodified.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use reqwest::Client;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::edge::edge_rejection;
use super::router::AppState;
use crate::config::{LlmConfig, require_http_url};
use crate::failsafe::with_deadline;
use crate::{Error, Result};

/// Placeholder credential clients send in place of a real key
pub const MANAGED_ACCESS_SENTINEL: &str = "managed-access";

/// Models the edge will forward, in display order
pub const CURATED_MODELS: &[&str] = &[
    "openai/gpt-4.1-mini",
    "openai/gpt-4o-mini",
    "anthropic/claude-3.5-haiku",
    "google/gemini-2.0-flash-001",
    "meta-llama/llama-3.3-70b-instruct",
    "mistralai/mistral-small-3.1-24b-instruct",
    "deepseek/deepseek-chat",
];

/// Whether `model` may be forwarded upstream
#[must_use]
pub fn is_curated_model(model: &str) -> bool {
    CURATED_MODELS.contains(&model)
}

/// Keep only curated models from an upstream `/models` payload, ordered as
/// [`CURATED_MODELS`] orders them.
#[must_use]
pub fn curate_models(payload: &Value) -> Value {
    let listed = payload
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let data: Vec<Value> = CURATED_MODELS
        .iter()
        .filter_map(|id| {
            listed
                .iter()
                .find(|m| m.get("id").and_then(Value::as_str) == Some(id))
                .cloned()
        })
        .collect();
    json!({ "data": data })
}

/// Accept an absent/empty credential or exactly the sentinel
/// (bare or as a bearer token).
fn credential_acceptable(raw: &str) -> bool {
    let value = raw.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => value,
    };
    if token.is_empty() || value.eq_ignore_ascii_case("bearer") {
        return true;
    }
    token
        .as_bytes()
        .ct_eq(MANAGED_ACCESS_SENTINEL.as_bytes())
        .into()
}

/// Reject any client-supplied credential other than the sentinel
fn check_client_credentials(headers: &HeaderMap) -> std::result::Result<(), &'static str> {
    for name in [header::AUTHORIZATION.as_str(), "x-api-key"] {
        for value in headers.get_all(name) {
            let acceptable = value.to_str().is_ok_and(credential_acceptable);
            if !acceptable {
                return Err("Client credentials are not accepted; omit them or send the managed-access sentinel");
            }
        }
    }
    Ok(())
}

/// Extract and check the `model` of a completion request body
fn check_model(body: &[u8]) -> std::result::Result<String, String> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| format!("Request body must be JSON: {e}"))?;
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| "Request body must name a model".to_string())?;
    if is_curated_model(model) {
        Ok(model.to_string())
    } else {
        Err(format!("Model '{model}' is not available through this gateway"))
    }
}

/// Outbound client for the LLM API
pub struct LlmProxy {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: std::time::Duration,
}

impl LlmProxy {
    /// Create the proxy from configuration, resolving the server key
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a non-http(s) base URL.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        require_http_url("llm.base_url", &config.base_url)?;
        Ok(Self {
            client: Client::builder().build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
            timeout: config.timeout,
        })
    }

    /// Whether a server credential is available
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn key(&self) -> std::result::Result<&str, Response> {
        self.api_key.as_deref().ok_or_else(|| {
            warn!("LLM passthrough requested but no server credential is configured");
            edge_rejection(
                StatusCode::SERVICE_UNAVAILABLE,
                "LLM access is not configured on this gateway",
            )
        })
    }

    /// Send `request` with the deadline applied to receiving headers only
    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        with_deadline(operation, self.timeout, None, async {
            request.send().await.map_err(Error::from)
        })
        .await
    }

    /// Forward a completion-style POST and stream the upstream response back
    async fn forward_post(&self, route: &str, headers: &HeaderMap, body: Bytes) -> Response {
        if let Err(message) = check_client_credentials(headers) {
            warn!(route, "Rejected client-supplied credential");
            return edge_rejection(StatusCode::BAD_REQUEST, message);
        }
        let model = match check_model(&body) {
            Ok(model) => model,
            Err(message) => {
                warn!(route, "Rejected LLM request: {message}");
                return edge_rejection(StatusCode::BAD_REQUEST, &message);
            }
        };
        let key = match self.key() {
            Ok(key) => key,
            Err(response) => return response,
        };

        info!(route, model = %model, "Forwarding LLM request");
        let mut request = self
            .client
            .post(format!("{}{route}", self.base_url))
            .bearer_auth(key)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(accept) = headers.get(header::ACCEPT) {
            request = request.header(header::ACCEPT, accept);
        }

        match self.send(&format!("POST {route}"), request).await {
            Ok(upstream) => stream_response(upstream),
            Err(e) => upstream_failure(route, &e),
        }
    }

    /// Fetch the upstream model list and return the curated subset
    async fn curated_models(&self, headers: &HeaderMap) -> Response {
        if let Err(message) = check_client_credentials(headers) {
            return edge_rejection(StatusCode::BAD_REQUEST, message);
        }
        let key = match self.key() {
            Ok(key) => key,
            Err(response) => return response,
        };

        let request = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(key);
        let upstream = match self.send("GET /models", request).await {
            Ok(upstream) => upstream,
            Err(e) => return upstream_failure("/models", &e),
        };

        let status = upstream.status();
        let text = match upstream.text().await {
            Ok(text) => text,
            Err(e) => return upstream_failure("/models", &Error::from(e)),
        };
        if !status.is_success() {
            let e = Error::upstream(status.as_u16(), &text);
            return edge_rejection(StatusCode::BAD_GATEWAY, &e.to_string());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(payload) => axum::Json(curate_models(&payload)).into_response(),
            Err(e) => {
                let e = Error::upstream(status.as_u16(), &format!("invalid JSON ({e}): {text}"));
                edge_rejection(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        }
    }
}

/// Pipe an upstream response through, keeping status and content type
fn stream_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    debug!(status = status.as_u16(), "Streaming LLM response");

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    response
}

fn upstream_failure(route: &str, error: &Error) -> Response {
    warn!(route, error = %error, "LLM upstream call failed");
    let status = match error {
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    edge_rejection(status, &error.to_string())
}

/// POST /api/openrouter/v1/chat/completions
pub async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state
        .llm
        .forward_post("/chat/completions", &headers, body)
        .await
}

/// POST /api/openrouter/v1/responses
pub async fn responses_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.llm.forward_post("/responses", &headers, body).await
}

/// GET /api/openrouter/v1/models
pub async fn models_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    state.llm.curated_models(&headers).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_credential_acceptance() {
        assert!(credential_acceptable(""));
        assert!(credential_acceptable("Bearer "));
        assert!(credential_acceptable(MANAGED_ACCESS_SENTINEL));
        assert!(credential_acceptable(&format!("Bearer {MANAGED_ACCESS_SENTINEL}")));
        assert!(credential_acceptable(&format!("bearer {MANAGED_ACCESS_SENTINEL}")));
        assert!(!credential_acceptable("Bearer sk-or-v1-real-key"));
        assert!(!credential_acceptable("sk-or-v1-real-key"));
        assert!(!credential_acceptable(&format!("{MANAGED_ACCESS_SENTINEL}x")));
    }

    #[test]
    fn test_any_non_sentinel_header_rejects() {
        let mut headers = HeaderMap::new();
        assert!(check_client_credentials(&headers).is_ok());
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer managed-access"),
        );
        assert!(check_client_credentials(&headers).is_ok());
        headers.insert("x-api-key", HeaderValue::from_static("sk-live"));
        assert!(check_client_credentials(&headers).is_err());
    }

    #[test]
    fn test_check_model() {
        let ok = check_model(br#"{"model":"openai/gpt-4o-mini","messages":[]}"#).unwrap();
        assert_eq!(ok, "openai/gpt-4o-mini");

        let err = check_model(br#"{"model":"openai/o1-pro"}"#).unwrap_err();
        assert!(err.contains("openai/o1-pro"));
        assert!(check_model(br#"{"messages":[]}"#).is_err());
        assert!(check_model(b"not json").is_err());
    }

    #[test]
    fn test_curate_models_filters_and_orders() {
        let upstream = json!({
            "data": [
                {"id": "deepseek/deepseek-chat", "name": "DeepSeek"},
                {"id": "some/unlisted-model"},
                {"id": "openai/gpt-4.1-mini", "name": "GPT-4.1 mini"}
            ]
        });
        let curated = curate_models(&upstream);
        let ids: Vec<&str> = curated["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["openai/gpt-4.1-mini", "deepseek/deepseek-chat"]);
    }

    #[test]
    fn test_curate_models_tolerates_unexpected_shape() {
        assert_eq!(curate_models(&json!([])), json!({"data": []}));
    }
}
