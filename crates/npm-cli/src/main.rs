use anyhow::Context;
use clap::{Parser, Subcommand};
use npm_core::IptmConfig;
use npm_iptm::{IptablesManager, ReconcileAction, SystemRunner};
use npm_metrics::{IptmMetrics, MetricsServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "azure-npm-iptm")]
#[command(version, about = "Network policy iptables chain manager", long_about = None)]
struct Cli {
    /// YAML configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create chains, hook them into the forward chain, install default rules
    Init,
    /// Remove the forward hook and delete every managed chain
    Uninit,
    /// Repair the position of the forward-chain hook once
    Reconcile,
    /// Show chain presence and forward-chain ordering
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Initialize, then keep the hook in place and serve metrics until interrupted
    Run {
        /// Overrides `metrics_port` from the config file
        #[arg(long)]
        metrics_port: Option<u16>,
        /// Tear everything down on shutdown
        #[arg(long)]
        cleanup: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = IptmConfig::load(cli.config.as_deref())?;
    let metrics = Arc::new(IptmMetrics::new()?);
    let manager = IptablesManager::new(SystemRunner::new(), &config, metrics.clone());

    tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::Init => {
                manager.init().await.context("Failed to initialize chains")?;
                println!("✅ Chains initialized");
            }
            Commands::Uninit => {
                manager.uninit().await.context("Failed to remove chains")?;
                println!("✅ Chains removed");
            }
            Commands::Reconcile => {
                let action = manager
                    .reconcile_forward_link()
                    .await
                    .context("Failed to reconcile forward chain")?;
                print_action(&config, action);
            }
            Commands::Status { json } => show_status(&manager, json).await?,
            Commands::Run {
                metrics_port,
                cleanup,
            } => {
                let port = metrics_port.unwrap_or(config.metrics_port);
                run_agent(&manager, &config, metrics, port, cleanup).await?;
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn print_action(config: &IptmConfig, action: ReconcileAction) {
    match action {
        ReconcileAction::Inserted { position } => {
            println!("Inserted hook into {} at line {}", config.forward_chain, position)
        }
        ReconcileAction::AlreadyOrdered => {
            println!("{} hook already after {}", config.forward_chain, config.peer_chain)
        }
        ReconcileAction::Repaired { from, to } => println!(
            "Moved {} hook from line {} to line {}",
            config.forward_chain, from, to
        ),
    }
}

async fn show_status(manager: &IptablesManager<SystemRunner>, json: bool) -> anyhow::Result<()> {
    let status = manager.status().await.context("Failed to read iptables state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        status.display();
    }

    let missing = status.missing_chains();
    if !missing.is_empty() {
        tracing::warn!(?missing, "Managed chains missing; run init");
    }

    Ok(())
}

async fn run_agent(
    manager: &IptablesManager<SystemRunner>,
    config: &IptmConfig,
    metrics: Arc<IptmMetrics>,
    port: u16,
    cleanup: bool,
) -> anyhow::Result<()> {
    manager.init().await.context("Failed to initialize chains")?;

    let mut server = tokio::spawn(MetricsServer::new(metrics, port).serve());
    let period = Duration::from_secs(config.reconcile_interval_secs);

    tracing::info!(
        interval_secs = config.reconcile_interval_secs,
        "Reconciling {} hook periodically",
        config.forward_chain
    );

    tokio::select! {
        _ = manager.run_reconcile_loop(period) => {}
        joined = &mut server => {
            joined.context("Metrics server task failed")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Received shutdown signal");
        }
    }

    server.abort();

    if cleanup {
        manager.uninit().await.context("Failed to remove chains")?;
    }

    Ok(())
}
