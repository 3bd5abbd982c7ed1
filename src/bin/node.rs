//! Fleet node binary: registry, failover manager and admin API

use clap::{Parser, Subcommand};
use fleetcoord::admin::{create_router, AdminState};
use fleetcoord::{
    Config, CoordinationStore, FailoverManager, HttpStore, MemoryStore, NodeIdentity, NodeRole,
    ServiceInstance, ServiceRegistry,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fleetcoord-node")]
#[command(about = "fleetcoord node: service registry and failover manager")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the fleet and serve the admin API
    Serve {
        /// Node ID (random when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for the admin API
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Host other nodes reach this node on (detected when omitted)
        #[arg(long)]
        advertise_host: Option<String>,

        /// Shared store URL
        #[arg(long)]
        store: Option<String>,

        /// Requested role (primary, secondary, witness)
        #[arg(long)]
        role: Option<NodeRole>,

        /// Election priority (higher wins)
        #[arg(long)]
        priority: Option<i32>,

        /// Cluster name
        #[arg(long)]
        cluster: Option<String>,

        /// Service name this node registers under
        #[arg(long)]
        service: Option<String>,

        /// Config file (defaults to ./fleetcoord.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            advertise_host,
            store,
            role,
            priority,
            cluster,
            service,
            config,
        } => {
            // Load config from file and environment, then apply CLI overrides
            let mut config = Config::load(config.as_deref())?;
            let bind_addr: SocketAddr = bind.parse()?;
            config.node.port = bind_addr.port();
            if id.is_some() {
                config.node.id = id;
            }
            if advertise_host.is_some() {
                config.node.host = advertise_host;
            }
            if store.is_some() {
                config.store.url = store;
            }
            if let Some(role) = role {
                config.node.role = role;
            }
            if let Some(priority) = priority {
                config.node.priority = priority;
            }
            if let Some(cluster) = cluster {
                config.node.cluster_name = cluster;
            }
            if let Some(service) = service {
                config.node.service_name = service;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            run(config, bind_addr).await?;
        }
    }

    Ok(())
}

async fn run(config: Config, bind_addr: SocketAddr) -> anyhow::Result<()> {
    let store: Arc<dyn CoordinationStore> = match &config.store.url {
        Some(url) => Arc::new(HttpStore::new(url, config.store.request_timeout())?),
        None => {
            warn!("No store URL configured, using an in-process store (single node only)");
            Arc::new(MemoryStore::new())
        }
    };

    let identity = NodeIdentity::from_config(&config.node);
    let registry = ServiceRegistry::new(store.clone(), config.registry.clone())?;
    let failover = FailoverManager::new(store.clone(), config.failover.clone(), identity.clone());

    failover
        .register_failover_callback(|signal| async move {
            info!("Role change: {}", signal);
            Ok(())
        })
        .await;

    registry.start().await;
    failover
        .start(config.node.role, config.node.priority)
        .await?;

    let service = config.node.service_name.clone();
    let instance = ServiceInstance::new(&service, &identity.host, identity.port)
        .with_id(identity.id.clone())
        .with_version(&config.node.version)
        .with_metadata("cluster", &identity.cluster_name)
        .with_health_check(
            "/health",
            Duration::from_secs(config.registry.default_check_interval_secs),
            Duration::from_secs(config.registry.default_check_timeout_secs),
        );
    if !registry.register(instance.clone()).await {
        warn!("Self-registration was not persisted, will retry on heartbeat");
    }

    let heartbeat = {
        let registry = registry.clone();
        let every = config.failover.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if !registry.heartbeat(&instance.name, &instance.id).await {
                    warn!("Instance record of {} is gone, registering again", instance.id);
                    registry.register(instance.clone()).await;
                }
            }
        })
    };

    let router = create_router(AdminState::new(registry.clone(), failover.clone()));
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(
        "✓ Node {} ({}) listening on {}",
        identity.id, config.node.role, bind_addr
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    heartbeat.abort();
    registry.deregister(&service, &identity.id).await;
    failover.stop().await;
    registry.stop().await;
    Ok(())
}
