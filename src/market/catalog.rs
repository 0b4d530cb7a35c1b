//! Fixed table of managed market tools
//!
//! Each definition pairs a JSON Schema (advertised by `tools/list`) with a
//! parser that turns validated arguments into a [`MarketCall`], which in
//! turn knows its upstream REST path.

use chrono::NaiveDate;
use serde_json::{Value, json};

use super::args::{Frequency, StatementType, ToolArgs};
use crate::protocol::Tool;
use crate::{Error, Result};

/// Default page size for `list_companies`
pub const DEFAULT_COMPANY_LIMIT: i64 = 200;
/// Default lookback for `get_all_statements`
pub const DEFAULT_STATEMENT_YEARS: i64 = 5;

/// A validated call against the market data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketCall {
    /// List listed companies
    ListCompanies {
        /// Page size
        limit: i64,
    },
    /// One company profile
    GetCompany {
        /// Normalized symbol
        symbol: String,
    },
    /// One financial statement
    GetStatement {
        /// Normalized symbol
        symbol: String,
        /// Reporting frequency
        frequency: Frequency,
        /// Statement kind
        statement_type: StatementType,
        /// Fiscal year (latest when absent)
        year: Option<i64>,
    },
    /// All statements over a lookback
    GetAllStatements {
        /// Normalized symbol
        symbol: String,
        /// Reporting frequency
        frequency: Frequency,
        /// Number of years
        years: i64,
    },
    /// Daily prices in an inclusive date range
    GetPriceData {
        /// Normalized symbol
        symbol: String,
        /// First day
        start_date: NaiveDate,
        /// Last day
        end_date: NaiveDate,
    },
}

/// Concrete upstream GET target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamPath {
    /// Path relative to the data source base URL
    pub path: String,
    /// Query parameters in a stable order
    pub query: Vec<(&'static str, String)>,
}

impl MarketCall {
    /// Build the upstream path and query for this call
    #[must_use]
    pub fn upstream_path(&self) -> UpstreamPath {
        match self {
            Self::ListCompanies { limit } => UpstreamPath {
                path: "/companies".to_string(),
                query: vec![("limit", limit.to_string())],
            },
            Self::GetCompany { symbol } => UpstreamPath {
                path: format!("/companies/{symbol}"),
                query: Vec::new(),
            },
            Self::GetStatement {
                symbol,
                frequency,
                statement_type,
                year,
            } => {
                let mut query = vec![
                    ("frequency", frequency.as_str().to_string()),
                    ("statement_type", statement_type.as_str().to_string()),
                ];
                if let Some(year) = year {
                    query.push(("year", year.to_string()));
                }
                UpstreamPath {
                    path: format!("/companies/{symbol}/statements"),
                    query,
                }
            }
            Self::GetAllStatements {
                symbol,
                frequency,
                years,
            } => UpstreamPath {
                path: format!("/companies/{symbol}/statements/all"),
                query: vec![
                    ("frequency", frequency.as_str().to_string()),
                    ("years", years.to_string()),
                ],
            },
            Self::GetPriceData {
                symbol,
                start_date,
                end_date,
            } => UpstreamPath {
                path: format!("/companies/{symbol}/prices"),
                query: vec![
                    ("start_date", start_date.format("%Y-%m-%d").to_string()),
                    ("end_date", end_date.format("%Y-%m-%d").to_string()),
                ],
            },
        }
    }
}

/// Static definition of one managed tool
pub struct ManagedToolDefinition {
    /// Tool name
    pub name: &'static str,
    /// Human readable description
    pub description: &'static str,
    schema: fn() -> Value,
    parse: fn(&Value) -> Result<MarketCall>,
}

impl ManagedToolDefinition {
    /// JSON Schema for the tool's arguments
    #[must_use]
    pub fn input_schema(&self) -> Value {
        (self.schema)()
    }

    /// Protocol descriptor advertised by `tools/list`
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.to_string(),
            description: Some(self.description.to_string()),
            input_schema: Some(self.input_schema()),
        }
    }

    /// Validate `arguments` and build the call
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] prefixed with the tool name.
    pub fn prepare(&self, arguments: &Value) -> Result<MarketCall> {
        (self.parse)(arguments).map_err(|e| match e {
            Error::Validation(msg) => {
                Error::Validation(format!("Invalid arguments for {}: {msg}", self.name))
            }
            other => other,
        })
    }
}

static TOOLS: [ManagedToolDefinition; 5] = [
    ManagedToolDefinition {
        name: "list_companies",
        description: "List companies listed on the Jamaica Stock Exchange with their symbols, names and sectors.",
        schema: list_companies_schema,
        parse: parse_list_companies,
    },
    ManagedToolDefinition {
        name: "get_company",
        description: "Get the profile of one listed company by ticker symbol.",
        schema: symbol_only_schema,
        parse: parse_get_company,
    },
    ManagedToolDefinition {
        name: "get_statement",
        description: "Get one financial statement (IS income, BS balance sheet, CF cash flow) for a company, optionally for a specific fiscal year.",
        schema: get_statement_schema,
        parse: parse_get_statement,
    },
    ManagedToolDefinition {
        name: "get_all_statements",
        description: "Get income, balance sheet and cash flow statements for a company over the last N years.",
        schema: get_all_statements_schema,
        parse: parse_get_all_statements,
    },
    ManagedToolDefinition {
        name: "get_price_data",
        description: "Get daily closing prices for a company between two dates (inclusive).",
        schema: get_price_data_schema,
        parse: parse_get_price_data,
    },
];

/// All managed tool definitions, in advertised order
#[must_use]
pub fn definitions() -> &'static [ManagedToolDefinition] {
    &TOOLS
}

/// Look up a definition by exact name
#[must_use]
pub fn find(name: &str) -> Option<&'static ManagedToolDefinition> {
    TOOLS.iter().find(|t| t.name == name)
}

fn symbol_property() -> Value {
    json!({
        "type": "string",
        "description": "Ticker symbol, e.g. NCBFG. Surrounding whitespace is trimmed and letters are uppercased; a symbol of only dots is rejected.",
        "pattern": "^\\s*[A-Za-z0-9.\\-]{1,20}\\s*$"
    })
}

fn frequency_property() -> Value {
    json!({ "type": "string", "enum": Frequency::ALLOWED })
}

fn list_companies_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "limit": {
                "type": "integer",
                "minimum": 1,
                "maximum": 500,
                "default": DEFAULT_COMPANY_LIMIT
            }
        },
        "additionalProperties": false
    })
}

fn symbol_only_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "symbol": symbol_property() },
        "required": ["symbol"],
        "additionalProperties": false
    })
}

fn get_statement_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "symbol": symbol_property(),
            "frequency": frequency_property(),
            "statement_type": { "type": "string", "enum": StatementType::ALLOWED },
            "year": { "type": "integer", "minimum": super::args::MIN_STATEMENT_YEAR }
        },
        "required": ["symbol", "frequency", "statement_type"],
        "additionalProperties": false
    })
}

fn get_all_statements_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "symbol": symbol_property(),
            "frequency": frequency_property(),
            "years": {
                "type": "integer",
                "minimum": 1,
                "maximum": 10,
                "default": DEFAULT_STATEMENT_YEARS
            }
        },
        "required": ["symbol", "frequency"],
        "additionalProperties": false
    })
}

fn get_price_data_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "symbol": symbol_property(),
            "start_date": { "type": "string", "format": "date" },
            "end_date": { "type": "string", "format": "date" }
        },
        "required": ["symbol", "start_date", "end_date"],
        "additionalProperties": false
    })
}

fn parse_list_companies(arguments: &Value) -> Result<MarketCall> {
    let args = ToolArgs::new(arguments, &["limit"])?;
    let limit = args
        .int_in_range("limit", 1, 500)?
        .unwrap_or(DEFAULT_COMPANY_LIMIT);
    Ok(MarketCall::ListCompanies { limit })
}

fn parse_get_company(arguments: &Value) -> Result<MarketCall> {
    let args = ToolArgs::new(arguments, &["symbol"])?;
    Ok(MarketCall::GetCompany {
        symbol: args.symbol()?,
    })
}

fn parse_get_statement(arguments: &Value) -> Result<MarketCall> {
    let args = ToolArgs::new(
        arguments,
        &["symbol", "frequency", "statement_type", "year"],
    )?;
    Ok(MarketCall::GetStatement {
        symbol: args.symbol()?,
        frequency: args.frequency()?,
        statement_type: args.statement_type()?,
        year: args.year()?,
    })
}

fn parse_get_all_statements(arguments: &Value) -> Result<MarketCall> {
    let args = ToolArgs::new(arguments, &["symbol", "frequency", "years"])?;
    Ok(MarketCall::GetAllStatements {
        symbol: args.symbol()?,
        frequency: args.frequency()?,
        years: args
            .int_in_range("years", 1, 10)?
            .unwrap_or(DEFAULT_STATEMENT_YEARS),
    })
}

fn parse_get_price_data(arguments: &Value) -> Result<MarketCall> {
    let args = ToolArgs::new(arguments, &["symbol", "start_date", "end_date"])?;
    let symbol = args.symbol()?;
    let start_date = args.date("start_date")?;
    let end_date = args.date("end_date")?;
    if start_date > end_date {
        return Err(Error::Validation(format!(
            "start_date ({start_date}) must be on or before end_date ({end_date})"
        )));
    }
    Ok(MarketCall::GetPriceData {
        symbol,
        start_date,
        end_date,
    })
}
