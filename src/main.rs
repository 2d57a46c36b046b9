use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mimir::aggregate::AggregateExecutor;
use mimir::cache::{MemoryCache, SqlCacheStore, TieredCache};
use mimir::config::{LogLevel, ServerConfig, parse_resolver_addr};
use mimir::custom::CustomRblStore;
use mimir::db::Database;
use mimir::forwarder::Forwarder;
use mimir::maintenance::run_maintenance;
use mimir::rbl::{load_aggregate_zones, load_rbl_servers};
use mimir::resolver::{RblResolver, UpstreamClient};
use mimir::server::DnsServer;
use mimir::zone::ZoneRegistry;

/// DNSBL front-end: single-RBL, aggregate and custom block-list queries on
/// one DNS port.
#[derive(Parser, Debug)]
#[command(name = "mimir", version, about)]
struct Cli {
    /// Address to bind the UDP and TCP listeners to
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Upstream recursive resolver (ip or ip:port)
    #[arg(long)]
    upstream: Option<String>,

    /// JSON file with the RBL server list
    #[arg(long)]
    rbl_servers: Option<PathBuf>,

    /// JSON file with aggregate zone definitions
    #[arg(long)]
    aggregate_zones: Option<PathBuf>,

    /// Aggregate fan-out deadline in milliseconds
    #[arg(long)]
    aggregate_timeout_ms: Option<u64>,

    /// Durable store location (path or ":memory:")
    #[arg(long)]
    database: Option<String>,

    /// Log level: none, error, info or verbose
    #[arg(long)]
    log_level: Option<String>,
}

fn apply_cli(config: &mut ServerConfig, cli: &Cli) -> mimir::Result<()> {
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(upstream) = &cli.upstream {
        config.upstream_resolver = parse_resolver_addr(upstream)?;
    }
    if let Some(path) = &cli.rbl_servers {
        config.rbl_servers_file = path.clone();
    }
    if let Some(path) = &cli.aggregate_zones {
        config.aggregate_zones_file = Some(path.clone());
    }
    if let Some(millis) = cli.aggregate_timeout_ms {
        config.aggregate_timeout = Duration::from_millis(millis.max(1));
    }
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = LogLevel::parse(level)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> mimir::Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::from_env()?;
    apply_cli(&mut config, &cli)?;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting mimir DNSBL server on {} (upstream {})",
        config.bind_addr, config.upstream_resolver
    );

    // Static zone data.
    let rbls = load_rbl_servers(&config.rbl_servers_file)?;
    let aggregates = match &config.aggregate_zones_file {
        Some(path) => load_aggregate_zones(path, &rbls)?,
        None => Vec::new(),
    };

    // Durable store shared by the cache's L2 tier and the custom tables.
    let db = Database::connect(&config.database_path, config.database_pool_max).await?;
    let custom = CustomRblStore::new(db.pool().clone());

    let custom_zone = match custom.config().await {
        Ok(Some(custom_config)) => {
            info!("Custom RBL zone enabled: {}", custom_config.zone_name);
            Some(custom_config.zone_name)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Could not read custom RBL config, disabling custom zone: {}", e);
            None
        }
    };

    let registry = Arc::new(ZoneRegistry::new(rbls, aggregates, custom_zone));

    let l1 = if config.memory_cache_enabled {
        Some(Arc::new(MemoryCache::new(config.memory_cache_size)) as Arc<dyn mimir::cache::CacheTier>)
    } else {
        info!("Memory cache tier disabled; lookups go straight to the durable store");
        None
    };
    let cache = Arc::new(TieredCache::new(l1, SqlCacheStore::new(db.pool().clone())));

    let client = Arc::new(UpstreamClient::new(
        config.upstream_resolver,
        config.upstream_timeout,
    ));
    let resolver = Arc::new(RblResolver::new(client.clone(), cache.clone()));
    let aggregate = AggregateExecutor::new(resolver.clone(), config.aggregate_timeout);
    let forwarder = Forwarder::new(client);

    let server = Arc::new(DnsServer::new(
        config,
        registry,
        resolver,
        aggregate,
        custom,
        forwarder,
    ));

    // Lifecycle: init done, serve until a signal, then drain.
    let (shutdown_tx, _) = broadcast::channel(1);

    let maintenance = tokio::spawn(run_maintenance(cache.clone(), shutdown_tx.subscribe()));
    let server_task = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move { server.run(&shutdown_tx).await })
    };

    wait_for_signal().await;
    info!("Shutdown signal received, stopping listeners");

    if shutdown_tx.send(()).is_err() {
        warn!("No tasks were listening for shutdown");
    }

    if let Err(e) = maintenance.await {
        error!("Maintenance task panicked: {}", e);
    }
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server exited with error: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
