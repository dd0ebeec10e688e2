//! Server lifecycle management
//!
//! Runs the HTTP server next to the region node's background tasks and
//! tears both down on SIGTERM or Ctrl+C.

use tokio::sync::watch;
use tracing::{error, info};

use chatrelay_cluster::RegionNode;
use chatrelay_core::Config;

use crate::http::{create_router, AppState};

pub struct ChatRelayServer {
    config: Config,
    node: RegionNode,
}

impl ChatRelayServer {
    pub const fn new(config: Config, node: RegionNode) -> Self {
        Self { config, node }
    }

    /// Serve until a shutdown signal arrives, then stop the region node
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState::new(
            self.node.lifecycle().clone(),
            self.config.default_chat_id(),
        );
        let router = create_router(state);

        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let mut rx = shutdown_rx;
        let graceful = async move {
            let _ = rx.changed().await;
        };
        let mut http_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        let http_stopped = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                true
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                false
            }
        };

        let _ = shutdown_tx.send(true);
        if !http_stopped {
            if let Err(e) = http_handle.await {
                error!("HTTP server task failed: {}", e);
            }
        }

        self.node.shutdown().await;
        info!("chatrelay stopped");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
