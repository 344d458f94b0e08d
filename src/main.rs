//! Lighthouse entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};

mod command;
mod config;
mod dispatcher;
mod error;
mod inspector;
mod parse;
mod prober;
mod report;
mod transport;
mod types;

use config::{load_service_specs, ClusterConfigProvider, Config};
use dispatcher::DeploymentDispatcher;
use inspector::{ClusterInspector, InspectLimits};
use report::{emit, ReportSink, StdoutSink};
use transport::{CommandChannel, SessionTarget, SshChannel};

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(name = "lighthouse")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect clusters and print a per-node report.
    Inspect {
        /// Cluster to inspect; repeatable.  All clusters when omitted.
        #[arg(short, long = "cluster")]
        clusters: Vec<String>,
    },
    /// Start service instances on a cluster.
    Deploy {
        #[arg(short, long)]
        cluster: String,
        /// TOML or JSON file with a `services` array.
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List configured clusters.
    Clusters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Loaded {} cluster(s); max {} concurrent sessions",
        cfg.clusters.len(),
        cfg.max_sessions
    );

    let channel: Arc<dyn CommandChannel> =
        Arc::new(SshChannel::new(cfg.command_timeout(), cfg.verify_host_keys));
    let mut sink = StdoutSink;

    match cli.command {
        Commands::Inspect { clusters } => {
            let limits = InspectLimits {
                max_sessions: cfg.max_sessions,
                deadline: cfg.inspect_timeout(),
            };
            let inspector = ClusterInspector::new(channel, cfg.layout(), limits);
            let outcomes = inspector.inspect_all(&cfg, &clusters).await;
            emit(&mut sink, &outcomes)?;
        }
        Commands::Deploy { cluster, file } => {
            let connection = cfg
                .cluster(&cluster)
                .with_context(|| format!("Cluster {} is not configured", cluster))?;
            let specs = load_service_specs(&file)?;
            let target = SessionTarget::for_cluster(connection)
                .with_context(|| format!("Cannot connect to cluster {}", cluster))?;
            let dispatcher = DeploymentDispatcher::new(channel, cfg.fleet_binary.clone());
            let outcomes = dispatcher.deploy(&target, &specs).await;
            let failed = outcomes.iter().filter(|o| !o.is_started()).count();
            if failed > 0 {
                error!("Cluster {}: {} of {} dispatches failed", cluster, failed, outcomes.len());
            }
            emit(&mut sink, &outcomes)?;
        }
        Commands::Clusters => {
            let listing: Vec<_> = cfg
                .clusters()
                .iter()
                .map(|c| serde_json::json!({ "name": c.name, "host": c.host, "port": c.port }))
                .collect();
            sink.publish(&serde_json::to_string_pretty(&listing)?)?;
        }
    }

    Ok(())
}
