//! Stale-catalog detection
//!
//! Servers do not share a closed vocabulary for "your catalog is out of
//! date", so this is a lexical heuristic over the error message. The phrase
//! list is policy, not protocol.

use crate::Error;

/// Lowercase phrases that mark a failed call as worth one refresh and retry
///
/// Phrases name the tool, the method or the server connection. Data-level
/// misses ("Company not found", "no response from data source") do not
/// qualify.
pub const STALE_SIGNALS: &[&str] = &[
    "tool not found",
    "method not found",
    "unknown tool",
    "no such tool",
    "stale",
    "no response from server",
    "no response body from server",
    "empty response from server",
];

/// Whether a failed `tools/call` should trigger one catalog refresh and one
/// retried call. Timeouts and cancellations never qualify.
#[must_use]
pub fn is_recoverable_catalog_error(error: &Error) -> bool {
    if matches!(error, Error::Timeout { .. } | Error::Cancelled(_)) {
        return false;
    }
    let message = error.to_string().to_lowercase();
    STALE_SIGNALS.iter().any(|signal| message.contains(signal))
}
