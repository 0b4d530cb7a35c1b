//! Per-server tool catalogs and their process-lifetime cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::protocol::{PROTOCOL_VERSION, Tool, ToolsListResult};
use crate::registry::ServerConfig;
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};

/// Upper bound on `tools/list` pages followed for one server
const MAX_LIST_PAGES: usize = 20;

/// One tool as discovered on one server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Owning server id
    pub server_id: String,
    /// Owning server display name
    pub server_name: String,
    /// Owning server URL
    pub server_url: String,
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw input JSON Schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl ToolDescriptor {
    fn from_tool(server: &ServerConfig, tool: Tool) -> Self {
        Self {
            server_id: server.id.clone(),
            server_name: server.name.clone(),
            server_url: server.url.clone(),
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        }
    }

    /// Case-insensitive: every query token appears in the name or description
    #[must_use]
    pub fn matches_query(&self, tokens: &[String]) -> bool {
        let haystack = format!(
            "{} {}",
            self.name.to_lowercase(),
            self.description.as_deref().unwrap_or_default().to_lowercase()
        );
        tokens.iter().all(|t| haystack.contains(t.as_str()))
    }
}

/// The discovered catalog of one server
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Server the catalog belongs to
    pub server: ServerConfig,
    /// Tools in advertised order
    pub tools: Vec<ToolDescriptor>,
    /// Whether calls go through the edge gateway (managed servers)
    pub proxied: bool,
    /// Edge base URL for proxied servers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_base_url: Option<String>,
}

impl CatalogEntry {
    /// Find a tool by exact name
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// A cached catalog together with the transport (and session) that built it
#[derive(Clone)]
pub struct CachedServer {
    /// Catalog snapshot
    pub entry: Arc<CatalogEntry>,
    /// Transport to reuse for calls
    pub transport: Arc<dyn Transport>,
}

/// Catalogs keyed by server id. No TTL: entries are replaced only by an
/// explicit refresh. Guards are never held across an `.await`.
#[derive(Default)]
pub struct CatalogCache {
    entries: RwLock<HashMap<String, CachedServer>>,
}

impl CatalogCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached catalog for `server_id`
    #[must_use]
    pub fn get(&self, server_id: &str) -> Option<CachedServer> {
        self.entries.read().get(server_id).cloned()
    }

    /// Store (or replace) a catalog; last write wins
    pub fn insert(&self, cached: CachedServer) {
        let id = cached.entry.server.id.clone();
        self.entries.write().insert(id, cached);
    }

    /// Forget one server's catalog. Returns whether one was cached.
    pub fn remove(&self, server_id: &str) -> bool {
        self.entries.write().remove(server_id).is_some()
    }

    /// Tool count of a cached catalog, without any network access
    #[must_use]
    pub fn tool_count(&self, server_id: &str) -> Option<usize> {
        self.entries
            .read()
            .get(server_id)
            .map(|c| c.entry.tools.len())
    }
}

/// Open a fresh session with `server` and list its tools:
/// `initialize` → `notifications/initialized` → `tools/list`
///
/// # Errors
///
/// Propagates transport, protocol and timeout failures.
pub async fn fetch_catalog(
    server: &ServerConfig,
    edge_base_url: &str,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<CachedServer> {
    let transport: Arc<dyn Transport> = HttpTransport::new(server, timeout)?;

    let init = transport
        .request(
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
            cancel,
        )
        .await?;
    let protocol = init
        .get("protocolVersion")
        .and_then(|v| v.as_str())
        .unwrap_or("?");
    debug!(server = %server.name, protocol, "Initialized");

    transport.notify("notifications/initialized", None).await?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_LIST_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let result = transport.request("tools/list", params, cancel).await?;
        let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
            Error::Protocol(format!(
                "Malformed tools/list result from '{}': {e}",
                server.name
            ))
        })?;
        tools.extend(
            page.tools
                .into_iter()
                .map(|t| ToolDescriptor::from_tool(server, t)),
        );
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    info!(server = %server.name, tools = tools.len(), "Catalog fetched");

    let proxied = server.is_managed();
    Ok(CachedServer {
        entry: Arc::new(CatalogEntry {
            server: server.clone(),
            tools,
            proxied,
            proxy_base_url: proxied.then(|| edge_base_url.to_string()),
        }),
        transport,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServerSource;

    fn descriptor(name: &str, description: Option<&str>) -> ToolDescriptor {
        ToolDescriptor {
            server_id: "s".into(),
            server_name: "S".into(),
            server_url: "http://s.local".into(),
            name: name.into(),
            description: description.map(ToString::to_string),
            input_schema: None,
        }
    }

    fn tokens(query: &str) -> Vec<String> {
        query.split_whitespace().map(str::to_lowercase).collect()
    }

    #[test]
    fn test_query_matching() {
        let tool = descriptor("get_price_data", Some("Daily closing PRICES for a company"));
        assert!(tool.matches_query(&tokens("")));
        assert!(tool.matches_query(&tokens("PRICE")));
        assert!(tool.matches_query(&tokens("closing company")));
        assert!(!tool.matches_query(&tokens("closing dividend")));
        assert!(descriptor("x", None).matches_query(&tokens("x")));
    }

    struct NoopTransport;

    #[async_trait::async_trait]
    impl Transport for NoopTransport {
        async fn request(
            &self,
            _method: &str,
            _params: Option<Value>,
            _cancel: Option<&CancellationToken>,
        ) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn notify(&self, _method: &str, _params: Option<Value>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_cache_last_write_wins() {
        let server = ServerConfig {
            id: "custom-a".into(),
            name: "A".into(),
            url: "http://a.local".into(),
            enabled: true,
            token: None,
            source: ServerSource::Custom,
            managed_id: None,
        };
        let cache = CatalogCache::new();
        let make = |n: usize| CachedServer {
            entry: Arc::new(CatalogEntry {
                server: server.clone(),
                tools: (0..n).map(|i| descriptor(&format!("t{i}"), None)).collect(),
                proxied: false,
                proxy_base_url: None,
            }),
            transport: Arc::new(NoopTransport),
        };

        assert_eq!(cache.tool_count("custom-a"), None);
        cache.insert(make(1));
        cache.insert(make(3));
        assert_eq!(cache.tool_count("custom-a"), Some(3));
        assert!(cache.remove("custom-a"));
        assert!(!cache.remove("custom-a"));
        assert_eq!(cache.tool_count("custom-a"), None);
    }
}
