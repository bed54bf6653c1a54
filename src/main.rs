use tracing::{info, warn};
use wsgate::config::Config;
use wsgate::logging;
use wsgate::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    logging::init(&cfg.logging);

    let server = Server::bind(&cfg).await?;
    info!(
        listen = %server.local_addr()?,
        backend = %cfg.backend.url,
        prefix = %cfg.proxy.prefix,
        "WebSocket proxy server running"
    );

    server.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("SIGINT received"),
                    _ = sigterm.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Ctrl+C received");
    }
}
