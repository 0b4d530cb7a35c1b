//! Error types for the tool gateway

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for the tool gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Longest upstream body excerpt embedded in an error message
pub const MAX_BODY_EXCERPT: usize = 300;

/// Tool gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (bad URL scheme, empty required field)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Argument validation error (bad symbol, date, enum or range)
    #[error("{0}")]
    Validation(String),

    /// Malformed JSON-RPC envelope or unexpected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Non-2xx or malformed JSON from an upstream REST source or LLM API
    #[error("Upstream request failed with HTTP {status}: {body}")]
    Upstream {
        /// Upstream HTTP status (0 when no status was received)
        status: u16,
        /// Truncated upstream body excerpt
        body: String,
    },

    /// No usable response from a remote server (connection refused, reset, DNS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Outbound call exceeded its deadline
    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured timeout
        timeout: Duration,
    },

    /// Outbound call aborted by the caller
    #[error("{0} was cancelled")]
    Cancelled(String),

    /// JSON-RPC error returned by a remote server
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Request rejected by the edge gateway (origin, rate, size, credential, model)
    #[error("{message}")]
    Edge {
        /// HTTP status returned to the caller
        status: u16,
        /// Rejection reason
        message: String,
    },

    /// No configured server matches the token
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Server exists but is disabled
    #[error("Server '{0}' is disabled")]
    ServerDisabled(String),

    /// No enabled server exposes the tool
    #[error("Tool '{0}' was not found on any enabled server")]
    ToolNotFound(String),

    /// Tool name exists on several servers
    #[error("Tool '{tool}' is available on multiple servers ({}); pass a server to disambiguate", candidates.join(", "))]
    AmbiguousTool {
        /// Tool name
        tool: String,
        /// Candidate server names
        candidates: Vec<String>,
    },

    /// Tool call completed but the server flagged the result as an error
    #[error("Tool '{tool}' on '{server}' reported an error: {message}")]
    ToolFailed {
        /// Server display name
        server: String,
        /// Tool name
        tool: String,
        /// Joined text content of the error result
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
        }
    }

    /// Create an upstream error with a truncated body excerpt
    pub fn upstream(status: u16, body: &str) -> Self {
        Self::Upstream {
            status,
            body: truncate_excerpt(body),
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::Validation(_)
            | Self::Upstream { .. }
            | Self::Timeout { .. }
            | Self::Cancelled(_)
            | Self::Transport(_)
            | Self::Http(_) => rpc_codes::SERVER_ERROR,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Remediation hint shown next to a failed tool operation
    #[must_use]
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            Self::ToolNotFound(_) | Self::Validation(_) | Self::ToolFailed { .. } => {
                "run `search` to find the tool, then `describe` to check its arguments"
            }
            Self::AmbiguousTool { .. } => "pass a server id or name to pick one of the candidates",
            Self::ServerNotFound(_) => "run `status` to list configured servers",
            Self::ServerDisabled(_) => "enable the server before calling its tools",
            Self::Timeout { .. } | Self::Cancelled(_) | Self::Transport(_) | Self::Http(_) => {
                "check that the server is reachable, then `connect` to it again"
            }
            Self::JsonRpc { .. } | Self::Protocol(_) | Self::Upstream { .. } => {
                "run `connect` to refresh the server's catalog, then retry"
            }
            _ => "check the gateway logs for details",
        }
    }
}

/// Truncate an upstream body to [`MAX_BODY_EXCERPT`] characters
#[must_use]
pub fn truncate_excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error (tool execution, upstream and validation failures)
    pub const SERVER_ERROR: i32 = -32000;
}
