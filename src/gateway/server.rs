//! Edge gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use super::edge::EdgePolicy;
use super::llm_proxy::LlmProxy;
use super::market_mcp::MarketMcp;
use super::router::{AppState, MARKET_MCP_PATH, create_router};
use crate::config::Config;
use crate::market::UpstreamClient;
use crate::{Error, Result};

/// Edge gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared handler state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway, failing fast on configuration errors
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid upstream URLs.
    pub fn new(config: Config) -> Result<Self> {
        let upstream = Arc::new(UpstreamClient::new(&config.market)?);
        let llm = Arc::new(LlmProxy::new(&config.llm)?);
        let state = Arc::new(AppState {
            market: Arc::new(MarketMcp::new(upstream)),
            llm,
            edge: Arc::new(EdgePolicy::from_config(&config.server)),
            static_root: config.server.static_root.clone(),
        });
        Ok(Self { config, state })
    }

    /// Shared state, for embedding the router elsewhere
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run the gateway until Ctrl-C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("Tool gateway listening on http://{addr}");
        info!("  Managed market endpoint: POST {MARKET_MCP_PATH}");
        info!("  LLM passthrough: /api/openrouter/v1/{{chat/completions,responses,models}}");
        info!("  Health: GET /healthz");
        if let Some(root) = &self.config.server.static_root {
            info!("  Static assets: {}", root.display());
        }
        if !self.state.llm.is_configured() {
            warn!("No LLM credential configured; passthrough requests will return 503");
        }
        if self.config.server.allowed_origins.is_empty() {
            info!("  Origin policy: same host only");
        } else {
            info!(origins = ?self.config.server.allowed_origins, "  Origin policy: allow-list");
        }

        // Purge stale rate windows between requests
        let edge = Arc::clone(&self.state.edge);
        let sweep_every = self.config.server.rate_limit.window;
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        edge.sweep_rate_windows();
                        debug!(clients = edge.tracked_clients(), "Swept rate windows");
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Tool gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
