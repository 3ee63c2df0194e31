//! Liquid daemon: entry point for running a liquid voting node.

mod import;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use liquid_node::{init_logging, LiquidNode, LogFormat, NodeConfig, ProcessOutcome};
use liquid_store::ProposalStore;
use liquid_types::{ProposalId, SnapshotId, SnapshotKind};

#[derive(Parser)]
#[command(name = "liquid-daemon", about = "Liquid democracy vote resolution daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "LIQUID_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the LMDB audit / snapshot store.
    #[arg(long, env = "LIQUID_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Redis URL of the ephemeral voting store.
    #[arg(long, env = "LIQUID_REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "LIQUID_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    #[arg(long, env = "LIQUID_SNAPSHOT_INTERVAL_SECS")]
    snapshot_interval_secs: Option<u64>,

    /// Process proposals without taking the per-proposal lock key.
    #[arg(long, env = "LIQUID_DISABLE_LOCK")]
    disable_lock: bool,

    /// Enable Prometheus metrics endpoint.
    #[arg(long, env = "LIQUID_ENABLE_METRICS")]
    metrics: bool,

    #[arg(long, env = "LIQUID_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Log format: "human" or "json".
    #[arg(long, env = "LIQUID_LOG_FORMAT")]
    log_format: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "LIQUID_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the node until SIGINT / SIGTERM.
    Run,
    /// Resolve and tally one proposal now.
    Process { proposal: String },
    /// Load proposal definitions from a TOML file.
    ImportProposals { file: PathBuf },
    /// Snapshot maintenance.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(clap::Subcommand)]
enum SnapshotAction {
    /// Snapshot one or more proposals.
    Create {
        #[arg(required = true)]
        proposals: Vec<String>,
        /// "hourly", "pre_calculation" or "manual".
        #[arg(long, default_value = "manual")]
        kind: SnapshotKind,
    },
    /// Overwrite a proposal's live state from a snapshot (latest by default).
    Restore {
        proposal: String,
        #[arg(long)]
        id: Option<u64>,
    },
    /// Check a proposal's live state for structural problems.
    Verify { proposal: String },
    /// Prune old hourly snapshots of one proposal, or of all.
    Cleanup { proposal: Option<String> },
}

/// Merge the optional config file with CLI flags and env vars.
fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let file_cfg = match &cli.config {
        Some(path) => {
            let cfg = NodeConfig::from_toml_file(&path.to_string_lossy())
                .with_context(|| format!("failed to load config {}", path.display()))?;
            tracing::info!("Loaded config from {}", path.display());
            cfg
        }
        None => NodeConfig::default(),
    };

    Ok(NodeConfig {
        data_dir: cli.data_dir.clone().unwrap_or(file_cfg.data_dir.clone()),
        redis_url: cli.redis_url.clone().unwrap_or(file_cfg.redis_url.clone()),
        sweep_interval_secs: cli
            .sweep_interval_secs
            .unwrap_or(file_cfg.sweep_interval_secs),
        snapshot_interval_secs: cli
            .snapshot_interval_secs
            .unwrap_or(file_cfg.snapshot_interval_secs),
        enforce_resolution_lock: !cli.disable_lock && file_cfg.enforce_resolution_lock,
        enable_metrics: cli.metrics || file_cfg.enable_metrics,
        metrics_port: cli.metrics_port.unwrap_or(file_cfg.metrics_port),
        log_format: cli.log_format.clone().unwrap_or(file_cfg.log_format.clone()),
        log_level: cli.log_level.clone().unwrap_or(file_cfg.log_level.clone()),
        ..file_cfg
    })
}

fn run_command(node: &LiquidNode, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run => anyhow::bail!("`run` is not a one-shot command"),
        Command::Process { proposal } => {
            let id = ProposalId::parse(&proposal)?;
            match node.scheduler().process_proposal(&id) {
                ProcessOutcome::Completed {
                    winning_option,
                    total_voting_power,
                    total_cast_power,
                } => println!(
                    "{id}: completed, winner {}, cast {total_cast_power} of {total_voting_power}",
                    winning_option.map_or("none (tie or no votes)".to_string(), |o| o.to_string())
                ),
                ProcessOutcome::AlreadyCompleted => println!("{id}: already completed"),
                ProcessOutcome::InFlight | ProcessOutcome::Locked => {
                    anyhow::bail!("{id}: being processed elsewhere, try again later")
                }
                ProcessOutcome::ResolutionFailed(e) => anyhow::bail!("{id}: resolution failed: {e}"),
                ProcessOutcome::TallyFailed(e) => anyhow::bail!("{id}: tally failed: {e}"),
            }
        }
        Command::ImportProposals { file } => {
            let proposals = import::load_proposals(&file)?;
            let store = &node.stores().proposals;
            for proposal in &proposals {
                store.put_proposal(proposal)?;
                tracing::info!(
                    proposal = %proposal.id,
                    options = proposal.options.len(),
                    deadline = %proposal.deadline.to_iso8601(),
                    "proposal imported"
                );
            }
            println!("imported {} proposals", proposals.len());
        }
        Command::Snapshot { action } => run_snapshot(node, action)?,
    }
    Ok(())
}

fn run_snapshot(node: &LiquidNode, action: SnapshotAction) -> anyhow::Result<()> {
    let manager = node.snapshot_manager();
    match action {
        SnapshotAction::Create { proposals, kind } => {
            let ids = proposals
                .iter()
                .map(|p| ProposalId::parse(p))
                .collect::<Result<Vec<_>, _>>()?;
            let report = manager.create_snapshots(&ids, kind);
            for (proposal, id) in &report.created {
                println!("{proposal}: snapshot {id}");
            }
            for (proposal, err) in &report.failed {
                eprintln!("{proposal}: {err}");
            }
            if !report.is_clean() {
                anyhow::bail!("{} snapshot(s) failed", report.failed.len());
            }
        }
        SnapshotAction::Restore { proposal, id } => {
            let proposal = ProposalId::parse(&proposal)?;
            let snapshot = manager.restore_from_snapshot(&proposal, id.map(SnapshotId))?;
            println!(
                "{proposal}: restored snapshot {} taken {}",
                snapshot.id,
                snapshot.taken_at.to_iso8601()
            );
        }
        SnapshotAction::Verify { proposal } => {
            let proposal = ProposalId::parse(&proposal)?;
            let findings = manager.verify_proposal_data(&proposal)?;
            if findings.is_clean() {
                println!("{proposal}: ok");
            } else {
                println!("{findings:#?}");
                anyhow::bail!("{proposal}: integrity problems found");
            }
        }
        SnapshotAction::Cleanup { proposal } => {
            let deleted = match proposal {
                Some(p) => manager.cleanup_old_snapshots(&ProposalId::parse(&p)?)?,
                None => manager.cleanup_all()?,
            };
            println!("deleted {deleted} snapshots");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Run => {
            let format: LogFormat = config.log_format.parse()?;
            init_logging(format, &config.log_level)?;
            tracing::info!(
                data_dir = %config.data_dir.display(),
                redis = %config.redis_url,
                metrics = if config.enable_metrics { config.metrics_port.to_string() } else { "off".into() },
                "Starting liquid node"
            );

            let mut node = LiquidNode::new(config)?;
            node.start().await?;

            tracing::info!("Shutdown signal received, stopping node");
            node.stop().await?;

            tracing::info!("liquid daemon exited cleanly");
        }
        command => {
            liquid_utils::init_tracing(&config.log_level);
            let node = LiquidNode::new(config)?;
            tokio::task::spawn_blocking(move || run_command(&node, command)).await??;
        }
    }

    Ok(())
}
