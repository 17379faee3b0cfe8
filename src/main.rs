//! Zentinel WS-Security preprocessor binary.
//!
//! Run with: `zentinel-wss-preprocessor --config config.yaml --input request.xml`
//!
//! Secures the input payload once per iteration for each simulated user and
//! writes the last secured payload to `--output` (or stdout).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_wss_preprocessor::{
    PipelineMetrics, PreProcessorConfig, SecureDocumentPipeline, SecurityOperation,
};

/// WS-Security request preprocessor for Zentinel load tests.
///
/// Signs or encrypts parts of a SOAP payload with keystore credentials.
/// A payload that cannot be secured is passed through unmodified.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// SOAP payload to secure
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the secured payload (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Iterations per simulated user
    #[arg(long, default_value_t = 1)]
    iterations: u64,

    /// Number of simulated users, each with its own pipeline
    #[arg(long, default_value_t = 1)]
    users: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout may carry the secured payload
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!(
        "Starting Zentinel WS-Security preprocessor v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Config file: {}", args.config.display());

    // Load configuration
    let config = if args.config.exists() {
        PreProcessorConfig::load(&args.config).context("Failed to load config file")?
    } else {
        info!("Config file not found, using defaults");
        PreProcessorConfig::default()
    };

    let pipeline = config
        .build_pipeline()
        .context("Invalid preprocessor configuration")?;

    info!(
        operation = %pipeline.operation().kind(),
        key_identifier = ?pipeline.operation().key_identifier_label(),
        parts = pipeline.parts_to_secure().len(),
        keystore = ?pipeline.crypto().keystore_file(),
        "Configuration loaded"
    );

    let payload = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read payload {}", args.input.display()))?;

    let mut users = Vec::with_capacity(args.users.max(1));
    for user in 0..args.users.max(1) {
        let pipeline = pipeline.clone();
        let payload = payload.clone();
        let iterations = args.iterations;
        users.push(tokio::task::spawn_blocking(move || {
            run_user(user, &pipeline, &payload, iterations)
        }));
    }

    let mut totals = PipelineMetrics::default();
    let mut secured = None;
    for handle in users {
        let (metrics, last) = handle.await.context("Simulated user panicked")?;
        totals.processed += metrics.processed;
        totals.secured += metrics.secured;
        totals.failed += metrics.failed;
        if last.is_some() {
            secured = last;
        }
    }

    info!(
        processed = totals.processed,
        secured = totals.secured,
        failed = totals.failed,
        "Run complete"
    );

    let Some(secured) = secured else {
        anyhow::bail!("No iteration produced a secured payload");
    };

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, secured)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Secured payload written to {}", path.display());
        }
        None => println!("{}", secured),
    }

    Ok(())
}

/// One simulated user: a private pipeline driven for `iterations` requests.
fn run_user(
    user: usize,
    pipeline: &SecureDocumentPipeline,
    payload: &str,
    iterations: u64,
) -> (PipelineMetrics, Option<String>) {
    let mut last = None;
    for iteration in 0..iterations {
        let mut slot = Some(payload.to_string());
        match pipeline.process(&mut slot) {
            Ok(_) => last = slot,
            Err(e) => warn!(user, iteration, code = e.code(), "Iteration sent unsecured payload"),
        }
    }
    debug!(user, metrics = ?pipeline.metrics(), "Simulated user finished");
    (pipeline.metrics(), last)
}
