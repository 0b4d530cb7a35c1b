//! Managed tool-call gateway
//!
//! `serve` runs the edge server; `client` and `servers` drive the tool client
//! and the persisted server registry.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mcp_tool_gateway::{
    cli::{ClientCommand, Cli, Command, ServersCommand},
    client::{GatewayClient, render_failure},
    config::Config,
    gateway::Gateway,
    registry::{JsonFileStore, NewCustomServer, ServerConfig, ServerRegistry},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Client(cmd)) => run_client_command(&config, cmd).await,
        Some(Command::Servers(cmd)) => run_servers_command(&config, cmd),
        Some(Command::Serve) | None => match run_server(config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Run the edge gateway server
async fn run_server(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting tool gateway"
    );

    let gateway = Gateway::new(config).context("Failed to create gateway")?;
    gateway.run().await.context("Gateway error")?;

    info!("Gateway shutdown complete");
    Ok(())
}

fn open_registry(config: &Config) -> mcp_tool_gateway::Result<Arc<ServerRegistry>> {
    let store = JsonFileStore::new(config.client.resolved_store_path());
    Ok(Arc::new(ServerRegistry::new(
        Arc::new(store),
        &config.client.edge_base_url,
    )?))
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn server_line(server: &ServerConfig) -> String {
    format!(
        "{} {} ({}) [{}] {}",
        if server.enabled { "●" } else { "○" },
        server.name,
        server.id,
        if server.is_managed() { "managed" } else { "custom" },
        server.url
    )
}

/// Run a gateway client command
async fn run_client_command(config: &Config, cmd: ClientCommand) -> ExitCode {
    let operation = match &cmd {
        ClientCommand::Status => "status".to_string(),
        ClientCommand::Connect { server } => format!("connect {server}"),
        ClientCommand::Server { server } => format!("server {server}"),
        ClientCommand::Search { .. } => "search".to_string(),
        ClientCommand::Describe { tool, .. } => format!("describe {tool}"),
        ClientCommand::Call { tool, .. } => format!("tool {tool}"),
    };

    let result = match open_registry(config) {
        Ok(registry) => {
            let client = GatewayClient::new(registry, &config.client);
            client_command(&client, cmd).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render_failure(&operation, &e));
            ExitCode::FAILURE
        }
    }
}

async fn client_command(client: &GatewayClient, cmd: ClientCommand) -> mcp_tool_gateway::Result<()> {
    match cmd {
        ClientCommand::Status => {
            for status in client.status()? {
                let tools = status
                    .cached_tools
                    .map_or_else(|| "not loaded".to_string(), |n| format!("{n} tool(s)"));
                println!(
                    "{} {} ({}) - {}",
                    if status.enabled { "●" } else { "○" },
                    status.name,
                    status.id,
                    if status.enabled { tools } else { "disabled".to_string() }
                );
            }
        }
        ClientCommand::Connect { server } => {
            let entry = client.connect(&server).await?;
            println!(
                "Connected to {} - {} tool(s)",
                entry.server.name,
                entry.tools.len()
            );
        }
        ClientCommand::Server { server } => {
            let entry = client.server(&server).await?;
            println!("{} ({})", entry.server.name, entry.server.url);
            if let Some(proxy) = &entry.proxy_base_url {
                println!("  via edge gateway {proxy}");
            }
            for tool in &entry.tools {
                println!(
                    "  {} - {}",
                    tool.name,
                    tool.description.as_deref().unwrap_or_default()
                );
            }
        }
        ClientCommand::Search { query } => {
            let results = client.search(&query.join(" ")).await?;
            if results.matches.is_empty() {
                println!("No matching tools.");
            }
            for tool in &results.matches {
                println!(
                    "{} [{}] - {}",
                    tool.name,
                    tool.server_name,
                    tool.description.as_deref().unwrap_or_default()
                );
            }
            for failure in &results.failures {
                eprintln!("⚠ {}: {}", failure.server, failure.message);
            }
        }
        ClientCommand::Describe { tool, server } => {
            print_json(&client.describe(&tool, server.as_deref()).await?);
        }
        ClientCommand::Call { tool, args, server } => {
            let arguments: Value = serde_json::from_str(&args).map_err(|e| {
                mcp_tool_gateway::Error::Validation(format!("--args is not valid JSON: {e}"))
            })?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let executed = client
                .tool(&tool, arguments, server.as_deref(), Some(&cancel))
                .await?;
            if executed.retried {
                eprintln!("(catalog for {} was refreshed once)", executed.server_name);
            }
            match &executed.result.structured_content {
                Some(payload) => print_json(payload),
                None => println!("{}", executed.result.text()),
            }
        }
    }
    Ok(())
}

/// Run a registry command
fn run_servers_command(config: &Config, cmd: ServersCommand) -> ExitCode {
    match servers_command(config, cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn servers_command(config: &Config, cmd: ServersCommand) -> mcp_tool_gateway::Result<()> {
    let registry = open_registry(config)?;
    match cmd {
        ServersCommand::List => {
            for server in registry.list()? {
                println!("{}", server_line(&server));
            }
        }
        ServersCommand::Add {
            name,
            url,
            token,
            disabled,
        } => {
            let server = registry.add_custom(NewCustomServer {
                name,
                url,
                token,
                enabled: !disabled,
            })?;
            println!("Added {}", server_line(&server));
        }
        ServersCommand::Remove { server } => {
            let removed = registry.remove_custom(&server)?;
            println!("Removed {} ({})", removed.name, removed.id);
        }
        ServersCommand::Enable { server } => {
            println!("{}", server_line(&registry.set_enabled(&server, true)?));
        }
        ServersCommand::Disable { server } => {
            println!("{}", server_line(&registry.set_enabled(&server, false)?));
        }
    }
    Ok(())
}
