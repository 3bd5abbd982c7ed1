//! CLI for fleet inspection

use clap::{Parser, Subcommand};
use fleetcoord::balancer::{select_from, RequestContext, Strategy};
use fleetcoord::common::{FailoverConfig, RegistryConfig};
use fleetcoord::failover::{load_cluster_view, ClusterStatus};
use fleetcoord::{CoordinationStore, HttpStore, ServiceRegistry};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "fleetcoord")]
#[command(about = "fleetcoord fleet inspection CLI")]
#[command(version)]
struct Cli {
    /// Shared store URL
    #[arg(long, default_value = "http://localhost:7000")]
    store: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List healthy instances of a service
    Discover {
        /// Service name
        service: String,
    },

    /// Pick instances the way a load balancer would
    Select {
        /// Service name
        service: String,

        /// round_robin, weighted_round_robin, least_connections, random, consistent_hash
        #[arg(long, default_value = "round_robin")]
        strategy: String,

        /// Routing key for consistent_hash
        #[arg(long)]
        key: Option<String>,

        /// Number of picks
        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// Failover cluster status
    Status {
        /// Cluster name
        #[arg(long, default_value = "fleet")]
        cluster: String,
    },

    /// List cluster nodes
    Nodes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let http = HttpStore::new(&cli.store, Duration::from_millis(cli.timeout_ms))?;
    http.ping().await?;
    let store: Arc<dyn CoordinationStore> = Arc::new(http);

    match cli.command {
        Commands::Discover { service } => {
            let registry = ServiceRegistry::new(store, RegistryConfig::default())?;
            let instances = registry.discover(&service).await;
            if instances.is_empty() {
                println!("No healthy instances of {}", service);
            }
            for instance in instances {
                println!(
                    "{}  {}  v{}  weight={}  conns={}  avg={:.1}ms",
                    instance.id,
                    instance.address(),
                    instance.version,
                    instance.weight,
                    instance.active_connections,
                    instance.response_time_avg * 1000.0
                );
            }
        }

        Commands::Select {
            service,
            strategy,
            key,
            count,
        } => {
            let strategy: Strategy = strategy.parse()?;
            let registry = ServiceRegistry::new(store, RegistryConfig::default())?;
            let instances = registry.discover(&service).await;
            let counter = AtomicUsize::new(0);
            let ctx = RequestContext { hash_key: key };

            for _ in 0..count {
                match select_from(&instances, strategy, &counter, Some(&ctx)) {
                    Some(instance) => println!("{}  {}", instance.id, instance.address()),
                    None => {
                        println!("No healthy instances of {}", service);
                        break;
                    }
                }
            }
        }

        Commands::Status { cluster } => {
            let view = load_cluster_view(store.as_ref()).await?;
            let status =
                ClusterStatus::build(&cluster, &FailoverConfig::default(), None, &view, &[]);
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Nodes => {
            let config = FailoverConfig::default();
            let mut view = load_cluster_view(store.as_ref()).await?;
            view.sort_by(|a, b| a.id.cmp(&b.id));
            println!(
                "{:<38} {:<22} {:<10} {:<8} {:>8} {:>6}  HEALTHY",
                "ID", "ADDRESS", "ROLE", "STATE", "PRIORITY", "SCORE"
            );
            for node in view {
                let healthy = node.is_healthy_at(
                    chrono::Utc::now(),
                    config.node_liveness(),
                    config.healthy_score_threshold,
                );
                println!(
                    "{:<38} {:<22} {:<10} {:<8} {:>8} {:>6.1}  {}",
                    node.id,
                    node.address(),
                    node.role.to_string(),
                    node.state.to_string(),
                    node.priority,
                    node.health_score,
                    if healthy { "yes" } else { "no" }
                );
            }
        }
    }

    Ok(())
}
