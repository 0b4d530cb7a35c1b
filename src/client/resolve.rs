//! Server and tool resolution

use crate::registry::ServerConfig;
use crate::{Error, Result};

use super::ToolDescriptor;

/// Resolve a server token against `servers` by exact, case-insensitive id or
/// display name. No fuzzy matching.
///
/// # Errors
///
/// Returns [`Error::ServerNotFound`] when nothing matches.
pub fn resolve_server<'a>(servers: &'a [ServerConfig], token: &str) -> Result<&'a ServerConfig> {
    servers
        .iter()
        .find(|s| s.matches_token(token))
        .ok_or_else(|| Error::ServerNotFound(token.to_string()))
}

/// Pick the single tool named `tool` among `candidates`.
///
/// # Errors
///
/// Returns [`Error::ToolNotFound`] for no candidates and
/// [`Error::AmbiguousTool`] when candidates span several servers.
pub fn pick_tool(tool: &str, candidates: Vec<ToolDescriptor>) -> Result<ToolDescriptor> {
    let mut servers: Vec<String> = Vec::new();
    for candidate in &candidates {
        if !servers.contains(&candidate.server_id) {
            servers.push(candidate.server_id.clone());
        }
    }

    match servers.len() {
        0 => Err(Error::ToolNotFound(tool.to_string())),
        1 => candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::ToolNotFound(tool.to_string())),
        _ => {
            let mut names: Vec<String> = Vec::new();
            for candidate in candidates {
                if !names.contains(&candidate.server_name) {
                    names.push(candidate.server_name);
                }
            }
            Err(Error::AmbiguousTool {
                tool: tool.to_string(),
                candidates: names,
            })
        }
    }
}
