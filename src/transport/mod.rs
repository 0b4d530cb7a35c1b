//! Client transports for remote tool servers

mod http;

pub use self::http::HttpTransport;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Transport trait for JSON-RPC tool servers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its `result`; a JSON-RPC `error` or a
    /// non-2xx status comes back as an error
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value>;

    /// Send a notification (no response expected)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;
}
