//! Verification orchestrator binary
//!
//! `run` is the long-running service. The other subcommands are operator
//! tools; `update-status` is also what job containers call to report.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solana_sdk::{pubkey::Pubkey, signature::Signer};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{error, info};

use sol_verify_orchestrator::{
    chain::{Clusters, LedgerRpc, SolanaLedger},
    config::{self, Config},
    environment::ReporterInstall,
    metrics::MetricsServer,
    ChainPoller, DockerRuntime, GitSourceProbe, JobDispatcher, ScriptConfig, ScriptGenerator,
    StatusReporter, StatusTracker, SubmissionValidator,
};
use sol_verify_sdk::{codes, Network, PdaDeriver, StatusRecord, VerificationRecord};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable metrics server
    #[arg(long)]
    enable_metrics: bool,

    /// Metrics server port
    #[arg(long, default_value = "3001")]
    metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the verifier program and run verification jobs
    Run,

    /// Send one status update for a submitter
    UpdateStatus {
        #[arg(long)]
        rpc_url: String,
        #[arg(long)]
        program_id: String,
        #[arg(long)]
        keypair: String,
        #[arg(long)]
        submitter: String,
        #[arg(long)]
        code: u8,
        #[arg(long, default_value = "")]
        message: String,
    },

    /// Print a submitter's current status
    CheckStatus {
        #[arg(long)]
        rpc_url: String,
        #[arg(long)]
        program_id: String,
        #[arg(long)]
        submitter: String,
    },

    /// Print a program's verification record as JSON
    CheckMetadata {
        #[arg(long)]
        rpc_url: String,
        #[arg(long)]
        program_id: String,
        #[arg(long)]
        target: String,
        /// test_net, dev_net or main_net
        #[arg(long, default_value = "dev_net")]
        network: String,
    },
}

fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("Invalid {} address: {}", what, value))
}

fn parse_network(value: &str) -> Result<Network> {
    match value {
        "test_net" | "testnet" => Ok(Network::TestNet),
        "dev_net" | "devnet" => Ok(Network::DevNet),
        "main_net" | "mainnet" => Ok(Network::MainNet),
        other => anyhow::bail!("Unknown network: {}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run => run(args.config.as_deref(), args.enable_metrics, args.metrics_port).await,
        Command::UpdateStatus {
            rpc_url,
            program_id,
            keypair,
            submitter,
            code,
            message,
        } => {
            let program_id = parse_pubkey(&program_id, "program")?;
            let submitter = parse_pubkey(&submitter, "submitter")?;
            let authority = Arc::new(config::load_keypair(&keypair)?);
            let rpc: Arc<dyn LedgerRpc> = Arc::new(SolanaLedger::new(&rpc_url));

            let reporter = StatusReporter::new(rpc, program_id, authority);
            let signature = reporter.send(&submitter, code, &message).await?;
            println!("{}", signature);
            Ok(())
        }
        Command::CheckStatus {
            rpc_url,
            program_id,
            submitter,
        } => {
            let program_id = parse_pubkey(&program_id, "program")?;
            let submitter = parse_pubkey(&submitter, "submitter")?;
            let (address, _) = PdaDeriver::derive_status(&submitter, &program_id);

            let rpc = SolanaLedger::new(&rpc_url);
            let account = rpc
                .get_account(&address)
                .await?
                .with_context(|| format!("No status account for {}", submitter))?;
            let record = StatusRecord::from_account_data(&account.data)
                .context("Status account is empty")?;

            println!(
                "{} ({}) {}",
                record.code,
                codes::describe(record.code),
                record.message
            );
            Ok(())
        }
        Command::CheckMetadata {
            rpc_url,
            program_id,
            target,
            network,
        } => {
            let program_id = parse_pubkey(&program_id, "program")?;
            let target = parse_pubkey(&target, "target")?;
            let network = parse_network(&network)?;
            let (address, _) = PdaDeriver::derive_verification(&target, network, &program_id);

            let rpc = SolanaLedger::new(&rpc_url);
            let account = rpc
                .get_account(&address)
                .await?
                .with_context(|| format!("No verification record for {} on {}", target, network))?;
            let record = VerificationRecord::from_account_data(&account.data)
                .context("Failed to decode verification record")?;

            let fields = record.code_meta.fields();
            let output = serde_json::json!({
                "program": target.to_string(),
                "network": network.to_string(),
                "code": record.verified_code,
                "verified": record.code().is_some_and(|code| code.is_verified()),
                "test_address": record.test_address().to_string(),
                "last_verified_slot": record.last_verified_slot,
                "data_hash": bs58::encode(record.data_hash).into_string(),
                "git_repo": fields.as_ref().map(|f| f.git_repo.clone()),
                "git_commit": fields.as_ref().map(|f| f.git_commit.clone()),
                "directory": fields.as_ref().map(|f| f.directory.clone()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}

async fn run(config_path: Option<&str>, enable_metrics: bool, metrics_port: u16) -> Result<()> {
    info!("Starting verification orchestrator");

    let config = Config::load(config_path)?;
    let program_id = config.program_id()?;
    let authority = Arc::new(config.load_keypair()?);
    info!("Status authority: {}", authority.pubkey());

    if enable_metrics {
        MetricsServer::new(metrics_port).start().await?;
    }

    let rpc: Arc<dyn LedgerRpc> = Arc::new(SolanaLedger::new(&config.rpc_url));
    let slot = rpc
        .get_slot()
        .await
        .with_context(|| format!("Cannot reach RPC endpoint {}", config.rpc_url))?;
    info!("Connected to {} at slot {}", config.rpc_url, slot);

    let clusters = Clusters {
        test_net: Arc::new(SolanaLedger::new(&config.clusters.test_net_url)),
        dev_net: Arc::new(SolanaLedger::new(&config.clusters.dev_net_url)),
        main_net: Arc::new(SolanaLedger::new(&config.clusters.main_net_url)),
    };

    let runtime = Arc::new(DockerRuntime::new(
        &config.container.runtime,
        &config.container.image_prefix,
    ));
    runtime.check_available().await?;

    let probe = Arc::new(GitSourceProbe::new(Duration::from_secs(config.probe.timeout_secs))?);
    let reporter = Arc::new(StatusReporter::new(rpc.clone(), program_id, authority));

    let generator = ScriptGenerator::new(ScriptConfig {
        cluster_url: config.toolkit.deploy_cluster_url.clone(),
        status_rpc_url: config.rpc_url.clone(),
        program_id,
        verifier_repo: config.toolkit.verifier_repo.clone(),
        verifier_revision: config.toolkit.verifier_revision.clone(),
        verifier_command: config.toolkit.verifier_command.clone(),
        airdrop_sol: config.toolkit.airdrop_sol.clone(),
        transfer_sol: config.toolkit.transfer_sol.clone(),
    });
    let reporter_install = ReporterInstall {
        repo: config.toolkit.reporter_repo.clone(),
        revision: config.toolkit.reporter_revision.clone(),
    };

    let work_dir = config.work_dir();
    tokio::fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", work_dir.display()))?;

    let validator = SubmissionValidator::new(clusters, probe, reporter.clone());
    let dispatcher = JobDispatcher::new(
        runtime.clone(),
        reporter,
        generator,
        reporter_install,
        work_dir,
        config.keypair_path(),
    );
    let tracker = StatusTracker::new(
        rpc.clone(),
        runtime,
        program_id,
        Duration::from_millis(config.status_pacing_ms),
    );

    let mut poller = ChainPoller::new(
        rpc,
        program_id,
        validator,
        dispatcher,
        tracker,
        config.signature_page_limit,
        Duration::from_secs(config.poll_interval_secs),
    );
    poller
        .initialise_cursor()
        .await
        .context("Failed to read the newest signature at startup")?;

    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    tokio::select! {
        result = poller.run() => {
            if let Err(e) = result {
                error!("Orchestrator error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal => {
            info!("Shutting down; running job containers are left in place");
        }
    }

    info!("Verification orchestrator stopped");
    Ok(())
}
