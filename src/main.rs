//! edge-relay: routes TLS connections to upstreams by server name.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use edge_relay::config::{load_config, ConfigWatcher, ProxyConfig};
use edge_relay::lifecycle::{signals, Shutdown};
use edge_relay::net::{Listener, RelayConfig, SniRelay};
use edge_relay::observability::{logging, metrics, AccessLog, LocalRegistry, MetricsRegistry};
use edge_relay::{HttpServer, RouteTable};

#[derive(Debug, Parser)]
#[command(name = "edge-relay", version, about = "SNI-routing TCP relay")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edge-relay.toml")]
    config: PathBuf,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }
    logging::init(&config.observability)?;

    tracing::info!("edge-relay v{} starting", env!("CARGO_PKG_VERSION"));

    let registry: Arc<dyn MetricsRegistry> = if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
        Arc::new(LocalRegistry::new())
    } else {
        metrics::noop()
    };

    let routes = Arc::new(RouteTable::new(registry));
    let table = routes.load(&config.route_defs())?;
    tracing::info!(routes = table.routes().len(), "Route table loaded");
    tracing::debug!("Routing table\n{table}");

    let shutdown = Shutdown::new();

    let _watcher = spawn_reloader(&args.config, Arc::clone(&routes))?;

    if config.http.enabled {
        spawn_http(&config, Arc::clone(&routes), shutdown.clone()).await?;
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match signals::wait_for_signal().await {
                Ok(signal) => tracing::info!(signal, "Signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to install signal handler"),
            }
            shutdown.trigger();
        });
    }

    let listener = Listener::bind(&config.listener).await?;
    let relay = Arc::new(SniRelay::new(
        routes,
        shutdown.clone(),
        RelayConfig::from(&config.timeouts),
    ));
    listener
        .serve(relay, shutdown, config.timeouts.shutdown_grace())
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Watch the config file and load route changes into the live table.
fn spawn_reloader(
    path: &std::path::Path,
    routes: Arc<RouteTable>,
) -> Result<notify::RecommendedWatcher, notify::Error> {
    let (watcher, mut updates) = ConfigWatcher::new(path);
    let handle = watcher.run()?;

    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            match routes.load(&config.route_defs()) {
                Ok(table) => {
                    tracing::info!(routes = table.routes().len(), "Routes reloaded");
                    tracing::debug!("Routing table\n{table}");
                }
                Err(e) => tracing::error!(error = %e, "Route reload rejected, keeping current table"),
            }
        }
    });

    Ok(handle)
}

async fn spawn_http(
    config: &ProxyConfig,
    routes: Arc<RouteTable>,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let access_log = if config.access_log.enabled {
        Some(Arc::new(AccessLog::new(std::io::stdout(), &config.access_log.format)?))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.http.bind_address).await?;
    let server = HttpServer::new(routes, access_log, config.timeouts.request());
    tokio::spawn(async move {
        if let Err(e) = server.run(listener, shutdown).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });
    Ok(())
}
