//! Gateway client
//!
//! Discovers and calls tools across the servers in the registry. Catalogs
//! are cached per server for the life of the process and refreshed only on
//! request or after a stale-looking call failure, which earns exactly one
//! refresh and one retried call.

mod catalog;
mod resolve;
mod retry;

pub use catalog::{CachedServer, CatalogCache, CatalogEntry, ToolDescriptor, fetch_catalog};
pub use resolve::{pick_tool, resolve_server};
pub use retry::{STALE_SIGNALS, is_recoverable_catalog_error};

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::protocol::{ToolsCallParams, ToolsCallResult};
use crate::registry::{ServerConfig, ServerRegistry, ServerSource};
use crate::transport::Transport;
use crate::{Error, Result};

/// Status line for one configured server
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Server id
    pub id: String,
    /// Display name
    pub name: String,
    /// Endpoint
    pub url: String,
    /// Managed or custom
    pub source: ServerSource,
    /// Enabled flag
    pub enabled: bool,
    /// Tool count, only when the catalog is already cached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tools: Option<usize>,
}

/// A server whose catalog could not be fetched during a search
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFailure {
    /// Server display name
    pub server: String,
    /// Failure message
    pub message: String,
}

/// Result of a cross-server search
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    /// Matching tools, grouped by server in registry order
    pub matches: Vec<ToolDescriptor>,
    /// Servers that could not be searched
    pub failures: Vec<ServerFailure>,
}

/// Outcome of a successful tool call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedCall {
    /// Server that ran the tool
    pub server_id: String,
    /// Its display name
    pub server_name: String,
    /// Tool name
    pub tool: String,
    /// Raw tool result
    pub result: ToolsCallResult,
    /// Whether the call succeeded only after a catalog refresh
    pub retried: bool,
}

/// Render a failed operation for display: prefixed message plus a hint
#[must_use]
pub fn render_failure(operation: &str, error: &Error) -> String {
    format!(
        "{operation} failed: {error}\nHint: {}",
        error.remediation_hint()
    )
}

/// Client over every server in a [`ServerRegistry`]
pub struct GatewayClient {
    registry: Arc<ServerRegistry>,
    cache: CatalogCache,
    timeout: Duration,
    edge_base_url: String,
}

impl GatewayClient {
    /// Create a client with an empty catalog cache
    #[must_use]
    pub fn new(registry: Arc<ServerRegistry>, config: &ClientConfig) -> Self {
        Self {
            registry,
            cache: CatalogCache::new(),
            timeout: config.request_timeout,
            edge_base_url: config.edge_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The catalog cache
    #[must_use]
    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    /// Configured servers with enabled state and cached tool counts.
    /// Never touches the network.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub fn status(&self) -> Result<Vec<ServerStatus>> {
        Ok(self
            .registry
            .list()?
            .into_iter()
            .map(|s| ServerStatus {
                cached_tools: self.cache.tool_count(&s.id),
                id: s.id,
                name: s.name,
                url: s.url,
                source: s.source,
                enabled: s.enabled,
            })
            .collect())
    }

    /// Refresh one server's catalog, replacing any cached entry
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotFound`] / [`Error::ServerDisabled`] for bad
    /// tokens, or the fetch failure.
    pub async fn connect(&self, server_token: &str) -> Result<Arc<CatalogEntry>> {
        let server = self.enabled_server(server_token)?;
        Ok(self.refresh(&server, None).await?.entry)
    }

    /// One server's catalog, from the cache when present
    ///
    /// # Errors
    ///
    /// Same as [`GatewayClient::connect`].
    pub async fn server(&self, server_token: &str) -> Result<Arc<CatalogEntry>> {
        let server = self.enabled_server(server_token)?;
        Ok(self.load(&server, None).await?.entry)
    }

    /// Search every enabled server's catalog, fetching uncached ones first.
    /// An empty query matches everything.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry cannot be read; per-server
    /// fetch failures are reported in [`SearchResults::failures`].
    pub async fn search(&self, query: &str) -> Result<SearchResults> {
        let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let mut results = SearchResults::default();

        for (server, loaded) in self.load_enabled(None).await? {
            match loaded {
                Ok(cached) => results.matches.extend(
                    cached
                        .entry
                        .tools
                        .iter()
                        .filter(|t| t.matches_query(&tokens))
                        .cloned(),
                ),
                Err(e) => results.failures.push(ServerFailure {
                    server: server.name,
                    message: e.to_string(),
                }),
            }
        }
        debug!(query, matches = results.matches.len(), "Search complete");
        Ok(results)
    }

    /// Describe one tool, optionally scoped to one server
    ///
    /// # Errors
    ///
    /// Returns resolution errors ([`Error::ToolNotFound`],
    /// [`Error::AmbiguousTool`], ...) or fetch failures.
    pub async fn describe(&self, tool: &str, server_token: Option<&str>) -> Result<ToolDescriptor> {
        let (_, descriptor) = self.resolve_tool(tool, server_token, None).await?;
        Ok(descriptor)
    }

    /// Call a tool. Without a server token the tool name must be unique
    /// across enabled servers.
    ///
    /// # Errors
    ///
    /// Returns resolution errors, [`Error::ToolFailed`] for results flagged
    /// `isError`, or the call failure (after at most one refresh and retry).
    pub async fn tool(
        &self,
        tool: &str,
        arguments: Value,
        server_token: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ExecutedCall> {
        let (cached, descriptor) = self.resolve_tool(tool, server_token, cancel).await?;
        let server = cached.entry.server.clone();

        match self
            .call_once(&server, &cached.transport, &descriptor.name, &arguments, cancel)
            .await
        {
            Ok(result) => Ok(executed(&server, tool, result, false)),
            Err(e) if is_recoverable_catalog_error(&e) => {
                warn!(
                    server = %server.name,
                    tool,
                    error = %e,
                    "Call failed with a stale-catalog signal; refreshing and retrying once"
                );
                let refreshed = self.refresh(&server, cancel).await?;
                let result = self
                    .call_once(&server, &refreshed.transport, tool, &arguments, cancel)
                    .await?;
                Ok(executed(&server, tool, result, true))
            }
            Err(e) => Err(e),
        }
    }

    async fn call_once(
        &self,
        server: &ServerConfig,
        transport: &Arc<dyn Transport>,
        tool: &str,
        arguments: &Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<ToolsCallResult> {
        let params = serde_json::to_value(ToolsCallParams {
            name: tool.to_string(),
            arguments: arguments.clone(),
        })?;
        let raw = transport.request("tools/call", Some(params), cancel).await?;
        let result: ToolsCallResult = serde_json::from_value(raw).map_err(|e| {
            Error::Protocol(format!(
                "Malformed tools/call result from '{}': {e}",
                server.name
            ))
        })?;
        if result.is_error {
            return Err(Error::ToolFailed {
                server: server.name.clone(),
                tool: tool.to_string(),
                message: result.text(),
            });
        }
        Ok(result)
    }

    /// Resolve `tool` to one server's cached catalog and descriptor
    async fn resolve_tool(
        &self,
        tool: &str,
        server_token: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(CachedServer, ToolDescriptor)> {
        if let Some(token) = server_token {
            let server = self.enabled_server(token)?;
            let was_cached = self.cache.get(&server.id).is_some();
            let cached = self.load(&server, cancel).await?;
            if let Some(found) = cached.entry.tool(tool).cloned() {
                return Ok((cached, found));
            }
            if was_cached {
                debug!(server = %server.name, tool, "Tool missing from cached catalog; refreshing");
                let refreshed = self.refresh(&server, cancel).await?;
                if let Some(found) = refreshed.entry.tool(tool).cloned() {
                    return Ok((refreshed, found));
                }
            }
            return Err(Error::ToolNotFound(tool.to_string()));
        }

        let mut candidates = Vec::new();
        let mut catalogs = Vec::new();
        for (server, loaded) in self.load_enabled(cancel).await? {
            match loaded {
                Ok(cached) => {
                    candidates.extend(
                        cached
                            .entry
                            .tools
                            .iter()
                            .filter(|t| t.name == tool)
                            .cloned(),
                    );
                    catalogs.push(cached);
                }
                Err(e) => warn!(server = %server.name, error = %e, "Skipping unreachable server"),
            }
        }

        let descriptor = pick_tool(tool, candidates)?;
        let cached = catalogs
            .into_iter()
            .find(|c| c.entry.server.id == descriptor.server_id)
            .ok_or_else(|| Error::ToolNotFound(tool.to_string()))?;
        Ok((cached, descriptor))
    }

    fn enabled_server(&self, token: &str) -> Result<ServerConfig> {
        let servers = self.registry.list()?;
        let server = resolve_server(&servers, token)?;
        if !server.enabled {
            if self.cache.remove(&server.id) {
                debug!(server = %server.name, "Dropped catalog of disabled server");
            }
            return Err(Error::ServerDisabled(server.name.clone()));
        }
        Ok(server.clone())
    }

    /// Cached catalog or a fresh fetch
    async fn load(
        &self,
        server: &ServerConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<CachedServer> {
        match self.cache.get(&server.id) {
            Some(cached) => Ok(cached),
            None => self.refresh(server, cancel).await,
        }
    }

    /// Fetch and cache a fresh catalog
    async fn refresh(
        &self,
        server: &ServerConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<CachedServer> {
        let cached = fetch_catalog(server, &self.edge_base_url, self.timeout, cancel).await?;
        self.cache.insert(cached.clone());
        Ok(cached)
    }

    /// Load every enabled server's catalog, overlapping the fetches
    async fn load_enabled(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<(ServerConfig, Result<CachedServer>)>> {
        let servers = self.registry.enabled()?;
        let loads = servers.iter().map(|s| self.load(s, cancel));
        let results = join_all(loads).await;
        Ok(servers.into_iter().zip(results).collect())
    }
}

fn executed(server: &ServerConfig, tool: &str, result: ToolsCallResult, retried: bool) -> ExecutedCall {
    info!(server = %server.name, tool, retried, "Tool call succeeded");
    ExecutedCall {
        server_id: server.id.clone(),
        server_name: server.name.clone(),
        tool: tool.to_string(),
        result,
        retried,
    }
}
