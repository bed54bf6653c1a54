use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::connection::Connection;
use crate::server::AppContext;

/// Pause after a failed `accept` before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    ctx: Arc<AppContext>,
    shutdown_grace: Duration,
}

impl Server {
    /// Validate `cfg` and bind the listening socket.
    pub async fn bind(cfg: &Config) -> anyhow::Result<Self> {
        cfg.validate()?;
        let addr = cfg.listen_addr()?;
        let ctx = AppContext::from_config(cfg)?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
            shutdown_grace: cfg.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves, then drain.
    ///
    /// In-flight requests get `shutdown_grace` to finish; whatever is still
    /// running after that, WebSocket sessions included, is aborted.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        info!(addr = %self.listener.local_addr()?, "Listening");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (socket, peer) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            // Errors such as EMFILE persist until a socket is
                            // released; pause instead of spinning on them.
                            error!(error = %e, "Failed to accept connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Accepted connection");

                    let ctx = Arc::clone(&self.ctx);
                    let shutdown_rx = shutdown_rx.clone();
                    connections.spawn(async move {
                        let conn = Connection::new(socket, peer, ctx, shutdown_rx);
                        if let Err(e) = conn.run().await {
                            error!(peer = %peer, error = %e, "Connection error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => break,
            }
        }

        drop(self.listener);
        info!(
            open_connections = connections.len(),
            "Shutdown signal received, no longer accepting connections"
        );
        let _ = shutdown_tx.send(true);

        let drained = timeout(self.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "Shutdown grace period elapsed, closing remaining connections"
            );
            connections.shutdown().await;
        }

        info!("Server stopped");
        Ok(())
    }
}
