//! Managed market tools
//!
//! A fixed catalog of Jamaica Stock Exchange data tools, their argument
//! validation, and the REST client that serves them.

pub mod args;
mod catalog;
mod upstream;

pub use args::{Frequency, StatementType, normalize_symbol};
pub use catalog::{
    DEFAULT_COMPANY_LIMIT, DEFAULT_STATEMENT_YEARS, ManagedToolDefinition, MarketCall,
    UpstreamPath, definitions, find,
};
pub use upstream::UpstreamClient;
