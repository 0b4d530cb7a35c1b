//! HTTP router and handlers

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::debug;

use super::edge::{EdgePolicy, edge_middleware};
use super::llm_proxy::{
    CURATED_MODELS, LlmProxy, chat_completions_handler, models_handler, responses_handler,
};
use super::market_mcp::MarketMcp;
use crate::error::rpc_codes;
use crate::protocol::JsonRpcResponse;

/// Path of the managed market endpoint, relative to the edge root
pub const MARKET_MCP_PATH: &str = "/api/mcp/jamaica-market";

/// Shared application state
pub struct AppState {
    /// Managed market MCP handler
    pub market: Arc<MarketMcp>,
    /// LLM passthrough
    pub llm: Arc<LlmProxy>,
    /// Edge policy (origin, rate, size)
    pub edge: Arc<EdgePolicy>,
    /// Static asset directory for non-API paths
    pub static_root: Option<PathBuf>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/mcp/jamaica-market", post(market_mcp_handler))
        .route(
            "/openrouter/v1/chat/completions",
            post(chat_completions_handler),
        )
        .route("/openrouter/v1/responses", post(responses_handler))
        .route("/openrouter/v1/models", get(models_handler))
        .fallback(not_found_handler)
        // Size is enforced by the edge guard while streaming
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.edge),
            edge_middleware,
        ));

    let router = Router::new()
        .route("/healthz", get(health_handler))
        .nest("/api", api);

    let router = match &state.static_root {
        Some(root) => {
            let index = ServeFile::new(root.join("index.html"));
            router.fallback_service(ServeDir::new(root).fallback(index))
        }
        None => router.fallback(not_found_handler),
    };

    router
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "openrouterConfigured": state.llm.is_configured(),
        "curatedModelCount": CURATED_MODELS.len()
    }))
}

/// Managed market MCP handler (POST /api/mcp/jamaica-market)
///
/// Notifications get 204 with no body; every other JSON-RPC reply is 200,
/// except an unparsable body which is 400.
async fn market_mcp_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Unparsable JSON-RPC body");
            let rpc = JsonRpcResponse::error(
                None,
                rpc_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            );
            return (StatusCode::BAD_REQUEST, Json(rpc)).into_response();
        }
    };

    match state.market.handle(&message, None).await {
        Some(rpc) => Json(rpc).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found" })),
    )
}
