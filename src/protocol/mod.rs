//! MCP JSON-RPC protocol types and codec

mod codec;
mod messages;
mod types;

pub use codec::*;
pub use messages::*;
pub use types::*;

/// Latest MCP protocol version
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions this gateway speaks, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Pick the version to answer `initialize` with: the client's if supported,
/// otherwise the latest.
#[must_use]
pub fn negotiate_version(client_version: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .find(|v| **v == client_version)
        .copied()
        .unwrap_or(PROTOCOL_VERSION)
}
