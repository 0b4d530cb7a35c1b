//! Managed tool-call gateway
//!
//! Discovery, dispatch and edge defense around one JSON-RPC tool protocol.
//!
//! # Components
//!
//! - **Gateway client** ([`client`]): per-server tool catalogs, cross-server
//!   name resolution and a one-shot retry after stale-catalog failures
//! - **Managed market endpoint** ([`gateway::market_mcp`]): a fixed catalog of
//!   market-data tools validated and translated into REST calls ([`market`])
//! - **Edge gateway** ([`gateway`]): origin allow-listing, per-client rate
//!   limiting, capped request bodies and a credential-substituting LLM proxy
//! - **Server registry** ([`registry`]): managed and custom servers over a
//!   key-value settings store
//!
//! # Protocol Version
//!
//! Speaks MCP protocol versions 2024-11-05 and 2025-03-26 (Streamable HTTP).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod gateway;
pub mod market;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging. `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
