use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use msgsim::adapter::HttpQueueDiscovery;
use msgsim::api::routes::{create_router, AppState};
use msgsim::config::{Config, TransportKind};
use msgsim::observability::{init_tracing, MetricsRegistry};
use msgsim::simulator::Simulator;
use msgsim::transport::{AmqpTransport, MemoryBroker, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting msgsim traffic simulator"
    );

    // Load endpoint configuration
    let endpoints = config
        .load_endpoints()
        .context("failed to load endpoint configuration")?;
    info!(
        endpoints = endpoints.endpoints.len(),
        "Endpoint configuration loaded"
    );

    let discovery = HttpQueueDiscovery::new(config.discovery_timeout())
        .context("failed to build discovery client")?;

    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Amqp => {
            info!(settings = ?config.transport_settings(), "Using AMQP broker transport");
            Arc::new(AmqpTransport::new())
        }
        TransportKind::Memory => {
            warn!("Using in-process queues; nothing outside this process can reach them");
            Arc::new(MemoryBroker::new())
        }
    };

    let metrics = Arc::new(MetricsRegistry::new());
    let simulator = Arc::new(Simulator::with_transport(
        endpoints,
        transport,
        config.transport_settings(),
        Arc::new(discovery),
        metrics,
    ));

    // The owning endpoint must be reachable before we accept any traffic
    if let Some(connectivity_id) = config.owned_endpoint() {
        if let Err(e) = simulator.ensure_adapter(&connectivity_id).await {
            error!(connectivity_id = %connectivity_id, error = %e, "Cannot start owning endpoint");
            return Err(e).context(format!("cannot start adapter for {connectivity_id}"));
        }
    }

    // Create router
    let app = create_router(Arc::new(AppState::new(simulator.clone())));

    // Parse listen address
    let addr: SocketAddr = config.listen_addr.parse()?;

    info!(addr = %addr, "Starting HTTP server");

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run server with graceful shutdown
    if config.graceful_shutdown {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        axum::serve(listener, app).await?;
    }

    // Cleanup
    info!("Shutting down...");
    simulator.close().await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
