//! Reshare CLI
//!
//! Command-line interface for resharing ceremonies:
//! - Initiating a resharing session across old and new operator sets
//! - Operator node registration with the messenger
//! - Inspecting locally stored operator records

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use messenger_client::{HttpTransport, MessengerClient};
use reshare_core::delivery::{DeliveryReport, DeliveryStatus, DEFAULT_MAX_CONCURRENCY};
use reshare_core::directory::{OperatorDirectory, StoreDirectory};
use reshare_core::messenger::DEFAULT_TOPIC;
use reshare_core::registration::{register_operator, RetryPolicy};
use reshare_core::signer::Ed25519Signer;
use reshare_core::storage::FileStore;
use reshare_core::{CancelHandle, OperatorId, Orchestrator, ResharingRequest, ResharingSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

/// Reshare - DKG resharing initiator
#[derive(Parser)]
#[command(name = "reshare")]
#[command(about = "Initiates DKG resharing ceremonies")]
#[command(version)]
struct Cli {
    /// Messenger service URL
    #[arg(short, long, env = "MESSENGER_ADDR", default_value = "http://127.0.0.1:3000")]
    messenger: String,

    /// Data directory for operator records
    #[arg(short, long, env = "DEST", default_value = "./data")]
    data_dir: PathBuf,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Accept invalid TLS certificates from the messenger
    #[arg(long)]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a resharing ceremony
    Resharing {
        /// New operator, as ID=address (repeatable)
        #[arg(long = "operator", required = true)]
        operators: Vec<String>,

        /// Old operator, as ID=address (repeatable)
        #[arg(long = "old-operator")]
        old_operators: Vec<String>,

        /// Threshold for the new operator set
        #[arg(short, long)]
        threshold: usize,

        /// Hex-encoded validator public key
        #[arg(long)]
        validator_pk: String,

        /// Operator ID the initiation message is signed as
        #[arg(long)]
        signer_id: OperatorId,

        /// Hex-encoded Ed25519 seed of the initiation signer
        #[arg(long, env = "RESHARE_SIGNER_KEY", hide_env_values = true)]
        signer_key: String,

        /// Maximum deliveries in flight
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
        concurrency: usize,
    },

    /// Register an operator node with the messenger
    Register {
        /// Operator ID
        #[arg(long)]
        id: OperatorId,

        /// Base URL the node is reachable at
        #[arg(long)]
        address: String,

        /// Topic to subscribe to
        #[arg(long, default_value = DEFAULT_TOPIC)]
        topic: String,

        /// Registration attempts
        #[arg(long, default_value = "3")]
        attempts: usize,
    },

    /// Show a stored operator record
    Operator {
        /// Operator ID
        id: OperatorId,
    },

    /// Generate an initiation signer key
    SignerKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resharing {
            ref operators,
            ref old_operators,
            threshold,
            ref validator_pk,
            signer_id,
            ref signer_key,
            concurrency,
        } => {
            let request = ResharingRequest {
                operators: operators.clone(),
                old_operators: old_operators.clone(),
                threshold,
                validator_pk: validator_pk.clone(),
            };
            let signer = Ed25519Signer::from_hex_seed(signer_id, signer_key)?;
            run_resharing(&cli, &request, signer, concurrency).await?;
        }
        Commands::Register {
            id,
            ref address,
            ref topic,
            attempts,
        } => {
            run_register(&cli, id, address, topic, attempts).await?;
        }
        Commands::Operator { id } => {
            show_operator(&cli, id)?;
        }
        Commands::SignerKey => {
            generate_signer_key();
        }
    }

    Ok(())
}

fn messenger_client(cli: &Cli) -> Result<MessengerClient> {
    let client = MessengerClient::new(&cli.messenger).with_timeout(Duration::from_secs(cli.timeout_secs));
    if cli.insecure {
        return Ok(client.with_insecure_tls()?);
    }
    Ok(client)
}

fn open_directory(cli: &Cli) -> Result<StoreDirectory<FileStore>> {
    let store = FileStore::open(&cli.data_dir)
        .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?;
    Ok(StoreDirectory::new(store))
}

async fn run_resharing(
    cli: &Cli,
    request: &ResharingRequest,
    signer: Ed25519Signer,
    concurrency: usize,
) -> Result<()> {
    let session = ResharingSession::from_request(request)?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    // Record the operators of this session, keeping stored keys for unchanged addresses
    let directory = open_directory(cli)?.with_fallback(Box::new(session.clone()));
    for operator_id in session.all_operator_ids() {
        let record = session.lookup(operator_id)?;
        match directory.get_operator(operator_id)? {
            Some(existing) if existing.address == record.address => {}
            _ => directory.put_operator(&record)?,
        }
    }

    let orchestrator = Orchestrator::new(
        messenger_client(cli)?,
        Arc::new(HttpTransport::new().with_timeout(timeout)),
        signer,
    )
    .with_max_concurrency(concurrency)
    .with_request_timeout(timeout);

    let (handle, cancel) = CancelHandle::new();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling session");
            handle.cancel();
        }
    });

    let result = orchestrator.run_session(&session, &directory, cancel).await;
    interrupt.abort();
    let report = result?;

    print_report(&report);
    if report.cancelled().next().is_some() {
        anyhow::bail!("Resharing session {} cancelled before delivery finished", report.session_id);
    }
    info!(session_id = %report.session_id, "Resharing session initiated");

    Ok(())
}

fn print_report(report: &DeliveryReport) {
    println!("Session ID: {}", report.session_id);
    for outcome in &report.outcomes {
        let status = match &outcome.status {
            DeliveryStatus::Delivered => "delivered".to_string(),
            DeliveryStatus::Failed(e) => format!("failed: {}", e),
            DeliveryStatus::Cancelled => "cancelled".to_string(),
        };
        println!("  operator {} ({}): {}", outcome.operator_id, outcome.address, status);
    }
    println!(
        "Delivered: {}/{}",
        report.delivered().count(),
        report.outcomes.len()
    );
}

async fn run_register(
    cli: &Cli,
    id: OperatorId,
    address: &str,
    topic: &str,
    attempts: usize,
) -> Result<()> {
    let messenger = messenger_client(cli)?;
    let policy = RetryPolicy {
        max_attempts: attempts.max(1),
        ..RetryPolicy::default()
    };

    register_operator(&messenger, id, address, topic, &policy).await?;
    println!("Operator {} registered on {}", id, topic);

    Ok(())
}

fn show_operator(cli: &Cli, id: OperatorId) -> Result<()> {
    let directory = open_directory(cli)?;
    let record = directory
        .get_operator(id)?
        .ok_or_else(|| anyhow::anyhow!("Operator {} not found in {}", id, cli.data_dir.display()))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn generate_signer_key() {
    let signer = Ed25519Signer::generate(0);
    println!("Signer key: {}", signer.seed_hex().as_str());
    println!("Public key: {}", hex::encode(signer.verifying_key().as_bytes()));
}
