//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Managed tool-call gateway: edge server, managed market tools and a
/// multi-server tool client
#[derive(Parser, Debug)]
#[command(name = "mcp-tool-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TOOL_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TOOL_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TOOL_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TOOL_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TOOL_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the edge gateway server (default)
    Serve,

    /// Discover and call tools across configured servers
    #[command(subcommand)]
    Client(ClientCommand),

    /// Manage the server registry
    #[command(subcommand)]
    Servers(ServersCommand),
}

/// Gateway client subcommands
#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// List servers with enabled state and cached tool counts
    Status,

    /// Refresh one server's tool catalog
    Connect {
        /// Server id or display name
        server: String,
    },

    /// Show one server's tools
    Server {
        /// Server id or display name
        server: String,
    },

    /// Search tools on every enabled server
    Search {
        /// Query words; all must appear in a tool's name or description
        #[arg(num_args = 0..)]
        query: Vec<String>,
    },

    /// Show one tool's description and input schema
    Describe {
        /// Tool name
        tool: String,

        /// Server id or display name
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Call a tool
    Call {
        /// Tool name
        tool: String,

        /// JSON object of arguments
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Server id or display name
        #[arg(short, long)]
        server: Option<String>,
    },
}

/// Registry subcommands
#[derive(Subcommand, Debug)]
pub enum ServersCommand {
    /// List managed and custom servers
    List,

    /// Add a custom server
    Add {
        /// Display name
        name: String,

        /// Endpoint URL (http or https)
        url: String,

        /// Bearer token sent to this server only. Supports `env:VAR_NAME`.
        #[arg(long)]
        token: Option<String>,

        /// Add the server disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a custom server
    Remove {
        /// Server id or display name
        server: String,
    },

    /// Enable a server
    Enable {
        /// Server id or display name
        server: String,
    },

    /// Disable a server
    Disable {
        /// Server id or display name
        server: String,
    },
}
