//! REST client for the market data source

use std::time::{Duration, Instant};

use reqwest::{Client, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::UpstreamPath;
use crate::config::{MarketConfig, require_http_url};
use crate::failsafe::with_deadline;
use crate::{Error, Result};

/// Performs single GETs against the market data source
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl UpstreamClient {
    /// Create a client for the configured data source
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL is not http(s).
    pub fn new(config: &MarketConfig) -> Result<Self> {
        require_http_url("market.base_url", &config.base_url)?;
        let client = Client::builder()
            .user_agent(concat!("mcp-tool-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    /// Full URL (without query) for a path
    #[must_use]
    pub fn url_for(&self, path: &UpstreamPath) -> String {
        format!("{}{}", self.base_url, path.path)
    }

    /// GET `path` and parse the body as JSON
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] on non-2xx or unparsable bodies,
    /// [`Error::Timeout`] past the configured deadline, [`Error::Cancelled`]
    /// if `cancel` fires first.
    pub async fn get_json(
        &self,
        path: &UpstreamPath,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value> {
        let url = self.url_for(path);
        let operation = format!("GET {}", path.path);
        let start = Instant::now();

        let value = with_deadline(&operation, self.timeout, cancel, async {
            let response = self
                .client
                .get(&url)
                .query(&path.query)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| Error::upstream(0, &format!("no response from data source: {e}")))?;
            Self::handle_response(response).await
        })
        .await?;

        debug!(
            path = %path.path,
            latency_ms = start.elapsed().as_millis() as u64,
            "Upstream GET completed"
        );
        Ok(value)
    }

    async fn handle_response(response: Response) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::upstream(status.as_u16(), &format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(Error::upstream(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            Error::upstream(
                status.as_u16(),
                &format!("invalid JSON ({e}): {body}"),
            )
        })
    }
}
