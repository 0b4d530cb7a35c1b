//! Failsafe mechanisms: per-client rate limiting and deadline-bounded calls

mod deadline;
mod rate_limiter;

pub use deadline::with_deadline;
pub use rate_limiter::{RateDecision, RateLimiter};
