//! Server registry
//!
//! Managed servers are synthesized at read time from a fixed definition list
//! plus a persisted enabled-flag map. Custom servers are persisted as a
//! versioned document. The two documents live under separate keys and are
//! always read and written independently.

mod store;

pub use store::{JsonFileStore, MemoryStore, SettingsStore};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::{Error, Result};

/// Store key of the custom server document
pub const CUSTOM_SERVERS_KEY: &str = "mcp.customServers";
/// Store key of the managed enabled-flag document
pub const MANAGED_SERVERS_KEY: &str = "mcp.managedServers";

const DOCUMENT_VERSION: u32 = 1;

/// Where a server entry comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerSource {
    /// Application-controlled definition
    Managed,
    /// User-edited entry
    Custom,
}

/// A tool server the client may talk to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Unique id within a registry snapshot
    pub id: String,
    /// Display name
    pub name: String,
    /// http(s) endpoint, no trailing slash
    pub url: String,
    /// Whether the server takes part in search and resolution
    pub enabled: bool,
    /// Bearer token sent to this server only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Managed or custom
    pub source: ServerSource,
    /// Managed definition id, for managed entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_id: Option<String>,
}

impl ServerConfig {
    /// Whether the entry is application-managed
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.source == ServerSource::Managed
    }

    /// Whether `token` names this server (id or display name, case-insensitive)
    #[must_use]
    pub fn matches_token(&self, token: &str) -> bool {
        let token = token.trim();
        self.id.eq_ignore_ascii_case(token) || self.name.eq_ignore_ascii_case(token)
    }
}

/// Static definition of a managed server hosted by the edge gateway
#[derive(Debug, Clone, Copy)]
pub struct ManagedServerDefinition {
    /// Stable id
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Path on the edge gateway
    pub path: &'static str,
    /// Enabled unless overridden
    pub enabled_by_default: bool,
}

/// Managed servers, in listing order
pub const MANAGED_SERVERS: &[ManagedServerDefinition] = &[ManagedServerDefinition {
    id: "jamaica-market",
    name: "Jamaica Market",
    path: "/api/mcp/jamaica-market",
    enabled_by_default: true,
}];

#[derive(Debug, Default, Serialize, Deserialize)]
struct CustomServersDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    servers: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCustomServer {
    id: String,
    name: String,
    url: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedServersDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    enabled_by_id: HashMap<String, bool>,
}

fn default_true() -> bool {
    true
}

/// Input for a new custom server
#[derive(Debug, Clone)]
pub struct NewCustomServer {
    /// Display name
    pub name: String,
    /// Endpoint URL
    pub url: String,
    /// Optional bearer token
    pub token: Option<String>,
    /// Initial enabled state
    pub enabled: bool,
}

/// Partial update of a custom server; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct CustomServerUpdate {
    /// New display name
    pub name: Option<String>,
    /// New endpoint URL
    pub url: Option<String>,
    /// New token; `Some(None)` clears it
    pub token: Option<Option<String>>,
    /// New enabled state
    pub enabled: Option<bool>,
}

/// Normalize a server URL: http(s) only, no trailing slash
///
/// # Errors
///
/// Returns [`Error::Validation`] for unparsable or non-http(s) URLs.
pub fn normalize_server_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Validation(format!("Invalid server URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Validation(format!(
            "Server URL must be http or https (got '{raw}')"
        )));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Lowercase, dash-separated slug of a display name
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "server".to_string()
    } else {
        slug.to_string()
    }
}

fn clean_token(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Registry of managed and custom servers over a [`SettingsStore`]
pub struct ServerRegistry {
    store: Arc<dyn SettingsStore>,
    edge_base_url: String,
}

impl ServerRegistry {
    /// Create a registry; managed server URLs are built on `edge_base_url`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `edge_base_url` is not http(s).
    pub fn new(store: Arc<dyn SettingsStore>, edge_base_url: &str) -> Result<Self> {
        let edge_base_url = normalize_server_url(edge_base_url)
            .map_err(|e| Error::Config(format!("client.edge_base_url: {e}")))?;
        Ok(Self {
            store,
            edge_base_url,
        })
    }

    /// Managed servers with their current enabled state
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn managed(&self) -> Result<Vec<ServerConfig>> {
        let overrides = self.load_managed_document()?.enabled_by_id;
        Ok(MANAGED_SERVERS
            .iter()
            .map(|def| ServerConfig {
                id: def.id.to_string(),
                name: def.name.to_string(),
                url: format!("{}{}", self.edge_base_url, def.path),
                enabled: overrides
                    .get(def.id)
                    .copied()
                    .unwrap_or(def.enabled_by_default),
                token: None,
                source: ServerSource::Managed,
                managed_id: Some(def.id.to_string()),
            })
            .collect())
    }

    /// Custom servers after normalization and de-duplication
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn custom(&self) -> Result<Vec<ServerConfig>> {
        let document = self.load_custom_document()?;
        let mut seen: HashSet<String> = MANAGED_SERVERS.iter().map(|d| d.id.to_string()).collect();
        let mut servers = Vec::with_capacity(document.servers.len());

        for raw in document.servers {
            let stored: StoredCustomServer = match serde_json::from_value(raw) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed custom server entry");
                    continue;
                }
            };
            let name = stored.name.trim().to_string();
            if name.is_empty() {
                warn!(id = %stored.id, "Dropping custom server with blank name");
                continue;
            }
            let url = match normalize_server_url(&stored.url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(id = %stored.id, error = %e, "Dropping custom server with invalid URL");
                    continue;
                }
            };
            let id = stored.id.trim().to_string();
            if id.is_empty() || !seen.insert(id.clone()) {
                warn!(id = %id, "Dropping custom server with blank, duplicate or managed id");
                continue;
            }
            servers.push(ServerConfig {
                id,
                name,
                url,
                enabled: stored.enabled,
                token: clean_token(stored.token),
                source: ServerSource::Custom,
                managed_id: None,
            });
        }
        Ok(servers)
    }

    /// Managed servers, then custom servers
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn list(&self) -> Result<Vec<ServerConfig>> {
        let mut all = self.managed()?;
        all.extend(self.custom()?);
        Ok(all)
    }

    /// Enabled servers only
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn enabled(&self) -> Result<Vec<ServerConfig>> {
        Ok(self.list()?.into_iter().filter(|s| s.enabled).collect())
    }

    /// Resolve a server by exact, case-insensitive id or display name
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotFound`] when nothing matches.
    pub fn find(&self, token: &str) -> Result<ServerConfig> {
        self.list()?
            .into_iter()
            .find(|s| s.matches_token(token))
            .ok_or_else(|| Error::ServerNotFound(token.to_string()))
    }

    /// Add a custom server; its id is derived from the name
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank name or invalid URL.
    pub fn add_custom(&self, input: NewCustomServer) -> Result<ServerConfig> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("Server name must not be blank".to_string()));
        }
        let url = normalize_server_url(&input.url)?;

        let mut servers = self.custom()?;
        let taken: HashSet<String> = self.list()?.into_iter().map(|s| s.id).collect();
        let base = format!("custom-{}", slugify(&name));
        let mut id = base.clone();
        let mut suffix = 2;
        while taken.contains(&id) {
            id = format!("{base}-{suffix}");
            suffix += 1;
        }

        let server = ServerConfig {
            id,
            name,
            url,
            enabled: input.enabled,
            token: clean_token(input.token),
            source: ServerSource::Custom,
            managed_id: None,
        };
        servers.push(server.clone());
        self.save_custom(&servers)?;
        info!(id = %server.id, url = %server.url, "Added custom server");
        Ok(server)
    }

    /// Update a custom server in place; its id never changes
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotFound`] for unknown tokens and
    /// [`Error::Validation`] for managed servers or invalid values.
    pub fn update_custom(&self, token: &str, update: CustomServerUpdate) -> Result<ServerConfig> {
        let target = self.find(token)?;
        if target.is_managed() {
            return Err(Error::Validation(format!(
                "Managed server '{}' cannot be edited; only enable or disable it",
                target.name
            )));
        }

        let mut servers = self.custom()?;
        let Some(server) = servers.iter_mut().find(|s| s.id == target.id) else {
            return Err(Error::ServerNotFound(token.to_string()));
        };
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(Error::Validation("Server name must not be blank".to_string()));
            }
            server.name = name;
        }
        if let Some(url) = update.url {
            server.url = normalize_server_url(&url)?;
        }
        if let Some(token) = update.token {
            server.token = clean_token(token);
        }
        if let Some(enabled) = update.enabled {
            server.enabled = enabled;
        }
        let updated = server.clone();
        self.save_custom(&servers)?;
        Ok(updated)
    }

    /// Remove a custom server
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for managed servers.
    pub fn remove_custom(&self, token: &str) -> Result<ServerConfig> {
        let target = self.find(token)?;
        if target.is_managed() {
            return Err(Error::Validation(format!(
                "Managed server '{}' cannot be removed; disable it instead",
                target.name
            )));
        }
        let servers: Vec<ServerConfig> = self
            .custom()?
            .into_iter()
            .filter(|s| s.id != target.id)
            .collect();
        self.save_custom(&servers)?;
        info!(id = %target.id, "Removed custom server");
        Ok(target)
    }

    /// Enable or disable any server. Managed flags and custom entries are
    /// written to their own documents only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotFound`] for unknown tokens.
    pub fn set_enabled(&self, token: &str, enabled: bool) -> Result<ServerConfig> {
        let mut target = self.find(token)?;
        if target.is_managed() {
            let mut document = self.load_managed_document()?;
            document.version = DOCUMENT_VERSION;
            document.enabled_by_id.insert(target.id.clone(), enabled);
            self.store
                .set(MANAGED_SERVERS_KEY, serde_json::to_value(&document)?)?;
        } else {
            let mut servers = self.custom()?;
            for server in servers.iter_mut().filter(|s| s.id == target.id) {
                server.enabled = enabled;
            }
            self.save_custom(&servers)?;
        }
        target.enabled = enabled;
        info!(id = %target.id, enabled, "Updated server enabled state");
        Ok(target)
    }

    fn load_custom_document(&self) -> Result<CustomServersDocument> {
        match self.store.get(CUSTOM_SERVERS_KEY)? {
            None => Ok(CustomServersDocument::default()),
            Some(value) => serde_json::from_value(value).or_else(|e| {
                warn!(error = %e, "Ignoring malformed custom server document");
                Ok(CustomServersDocument::default())
            }),
        }
    }

    fn load_managed_document(&self) -> Result<ManagedServersDocument> {
        match self.store.get(MANAGED_SERVERS_KEY)? {
            None => Ok(ManagedServersDocument::default()),
            Some(value) => serde_json::from_value(value).or_else(|e| {
                warn!(error = %e, "Ignoring malformed managed server document");
                Ok(ManagedServersDocument::default())
            }),
        }
    }

    fn save_custom(&self, servers: &[ServerConfig]) -> Result<()> {
        let stored = servers
            .iter()
            .map(|s| {
                serde_json::to_value(StoredCustomServer {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    url: s.url.clone(),
                    enabled: s.enabled,
                    token: s.token.clone(),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let document = CustomServersDocument {
            version: DOCUMENT_VERSION,
            servers: stored,
        };
        self.store
            .set(CUSTOM_SERVERS_KEY, serde_json::to_value(&document)?)
    }
}
