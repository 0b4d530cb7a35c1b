//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before credentials are resolved.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Edge server configuration
    pub server: ServerConfig,
    /// Upstream LLM completions API
    pub llm: LlmConfig,
    /// Upstream REST data source behind the managed market tools
    pub market: MarketConfig,
    /// Gateway client settings
    pub client: ClientConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (TOOL_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("TOOL_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Check construction-time invariants
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be non-zero".to_string()));
        }
        if self.server.max_body_bytes == 0 {
            return Err(Error::Config(
                "server.max_body_bytes must be non-zero".to_string(),
            ));
        }
        if self.server.rate_limit.window.is_zero() || self.server.rate_limit.max_requests == 0 {
            return Err(Error::Config(
                "server.rate_limit window and max_requests must be non-zero".to_string(),
            ));
        }
        require_http_url("llm.base_url", &self.llm.base_url)?;
        require_http_url("market.base_url", &self.market.base_url)?;
        require_http_url("client.edge_base_url", &self.client.edge_base_url)?;
        Ok(())
    }
}

/// Ensure a configured URL is absolute http/https
///
/// # Errors
///
/// Returns [`Error::Config`] for empty values, unparsable URLs or other schemes.
pub fn require_http_url(field: &str, value: &str) -> Result<Url> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{field} must not be empty")));
    }
    let url = Url::parse(value.trim())
        .map_err(|e| Error::Config(format!("{field} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "{field} must use http or https (got {other})"
        ))),
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Resolve an `env:VAR_NAME` reference; literal values pass through.
/// Empty results resolve to `None`.
#[must_use]
pub fn resolve_secret(value: Option<&str>) -> Option<String> {
    let raw = value?;
    let resolved = match raw.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).ok()?,
        None => raw.to_string(),
    };
    let trimmed = resolved.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Edge server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Directory of static assets served for non-API paths
    pub static_root: Option<PathBuf>,
    /// Allowed browser origins. Empty means "same host as the request".
    pub allowed_origins: Vec<String>,
    /// Maximum request body size (bytes)
    pub max_body_bytes: usize,
    /// Per-client rate limit
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            static_root: None,
            allowed_origins: Vec::new(),
            max_body_bytes: 1024 * 1024,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Fixed-window rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Requests allowed per client within one window
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 120,
        }
    }
}

/// Upstream LLM completions API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API base URL (routes are appended: `/chat/completions`, `/responses`, `/models`)
    pub base_url: String,
    /// Server-side credential. Supports `env:VAR_NAME`.
    pub api_key: Option<String>,
    /// Timeout for receiving upstream response headers
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: Some("env:OPENROUTER_API_KEY".to_string()),
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmConfig {
    /// Resolve the server credential
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret(self.api_key.as_deref())
    }
}

/// Upstream REST data source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// API base URL
    pub base_url: String,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Gateway client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for each outbound JSON-RPC call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Public base URL of the edge gateway hosting managed servers
    pub edge_base_url: String,
    /// Settings store file (defaults to the user config directory)
    pub store_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            edge_base_url: "http://127.0.0.1:8787".to_string(),
            store_path: None,
        }
    }
}

impl ClientConfig {
    /// Settings store path, falling back to `<config dir>/mcp-tool-gateway/settings.json`
    #[must_use]
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mcp-tool-gateway")
                .join("settings.json")
        })
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a duration string (e.g., "30s", "5m", "100ms") or bare seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();

        // "ms" must be checked before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.server.rate_limit.window, Duration::from_secs(60));
    }

    #[test]
    fn test_yaml_durations() {
        let yaml = r#"
server:
  port: 9100
  allowed_origins: ["https://app.example"]
  rate_limit:
    window: 250ms
    max_requests: 3
llm:
  timeout: 2m
market:
  timeout: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.rate_limit.window, Duration::from_millis(250));
        assert_eq!(config.llm.timeout, Duration::from_secs(120));
        assert_eq!(config.market.timeout, Duration::from_secs(5));
        assert_eq!(config.server.allowed_origins, vec!["https://app.example"]);
    }

    #[test]
    fn test_validate_rejects_non_http_upstream() {
        let mut config = Config::default();
        config.market.base_url = "ftp://data.example".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("market.base_url"));
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let mut config = Config::default();
        config.server.rate_limit.max_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/gateway.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resolve_secret() {
        assert_eq!(resolve_secret(Some("literal")), Some("literal".to_string()));
        assert_eq!(resolve_secret(Some("   ")), None);
        assert_eq!(resolve_secret(None), None);
        assert_eq!(
            resolve_secret(Some("env:TOOL_GATEWAY_TEST_SURELY_UNSET_VAR")),
            None
        );
    }
}
