//! Streamable HTTP transport
//!
//! Every JSON-RPC message is one POST to the server URL. Replies may come
//! back as plain JSON or as an event stream carrying one `data:` payload.
//! An `Mcp-Session-Id` returned by the server is replayed on later requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, header};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Transport;
use crate::config::resolve_secret;
use crate::failsafe::with_deadline;
use crate::protocol::{PROTOCOL_VERSION, RequestId, decode_response, encode_request};
use crate::registry::ServerConfig;
use crate::{Error, Result};

const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP transport for one server
pub struct HttpTransport {
    client: Client,
    url: String,
    server_name: String,
    token: Option<String>,
    session_id: RwLock<Option<String>>,
    request_id: AtomicI64,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `server` with a per-call `timeout`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(server: &ServerConfig, timeout: Duration) -> Result<Arc<Self>> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Arc::new(Self {
            client,
            url: server.url.clone(),
            server_name: server.name.clone(),
            token: resolve_secret(server.token.as_deref()),
            session_id: RwLock::new(None),
            request_id: AtomicI64::new(1),
            timeout,
        }))
    }

    /// Session id assigned by the server, if any
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// POST one encoded message and decode the reply
    async fn post(
        &self,
        method: &str,
        body: Vec<u8>,
        expect_response: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Value>> {
        let operation = format!("{method} on '{}'", self.server_name);

        with_deadline(&operation, self.timeout, cancel, async {
            let mut request = self
                .client
                .post(&self.url)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ACCEPT, "application/json, text/event-stream")
                .header("MCP-Protocol-Version", PROTOCOL_VERSION)
                .body(body);
            if let Some(session_id) = self.session_id() {
                request = request.header(SESSION_HEADER, session_id);
            }
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|e| {
                Error::Transport(format!(
                    "No response from server '{}': {e}",
                    self.server_name
                ))
            })?;

            if let Some(id) = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                debug!(server = %self.server_name, session_id = %id, "Stored session ID");
                *self.session_id.write() = Some(id.to_string());
            }

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            let bytes = response.bytes().await.map_err(|e| {
                Error::Transport(format!(
                    "No response body from server '{}': {e}",
                    self.server_name
                ))
            })?;

            decode_response(status, content_type.as_deref(), &bytes, expect_response)
        })
        .await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value> {
        let body = encode_request(method, params, Some(self.next_id()))?;
        debug!(server = %self.server_name, method, "Sending request");
        self.post(method, body, true, cancel).await?.ok_or_else(|| {
            Error::Protocol(format!(
                "Empty response from server '{}' to {method}",
                self.server_name
            ))
        })
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let body = encode_request(method, params, None)?;
        debug!(server = %self.server_name, method, "Sending notification");
        self.post(method, body, false, None).await.map(|_| ())
    }
}
