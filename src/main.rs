use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use nmap_task_rs::executor::{DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT};
use nmap_task_rs::server::{self, AppState};
use nmap_task_rs::{EngineConfig, ExecLimits, ProcessRunner, RegistryConfig, TaskRegistry};

/// nmap-task-rs: run sanitized nmap scans as pollable background tasks.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nmap-task-rs",
    version,
    about = "Run sanitized nmap scans as pollable background tasks over HTTP.",
    long_about = None
)]
struct Cli {
    /// Address to bind the HTTP API on.
    #[arg(long, env = "BIND_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port for the HTTP API.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Path to the nmap binary. Defaults to $NMAP_PATH, then a PATH search.
    #[arg(long)]
    nmap_path: Option<PathBuf>,

    /// nmap data directory passed via --datadir. Defaults to $NMAP_DATADIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Wall-clock limit for one scan, in seconds.
    #[arg(long = "timeout-secs", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Maximum combined stdout+stderr bytes captured from one scan.
    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    max_output_bytes: usize,

    /// Cap on simultaneously running scans (unbounded if omitted).
    #[arg(long)]
    max_concurrent_scans: Option<usize>,

    /// Forget finished tasks after this many seconds (kept forever if omitted).
    #[arg(long = "task-ttl-secs")]
    task_ttl_secs: Option<u64>,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // detect() reads NMAP_PATH and NMAP_DATADIR; explicit options win over it.
    let mut engine = EngineConfig::detect();
    if let Some(path) = cli.nmap_path.clone() {
        engine.binary = path;
    }
    if let Some(dir) = cli.data_dir.clone() {
        engine.data_dir = dir;
    }
    if !engine.binary.is_file() {
        warn!("nmap binary not found at {}; scans will fail until it is installed", engine.binary.display());
    }

    let limits = ExecLimits {
        timeout: Duration::from_secs(cli.timeout_secs),
        max_output_bytes: cli.max_output_bytes,
    };
    let config = RegistryConfig {
        max_concurrent_scans: cli.max_concurrent_scans,
        task_ttl: cli.task_ttl_secs.map(Duration::from_secs),
    };

    info!("nmap-task-rs configuration:");
    info!("  nmap         : {}", engine.binary.display());
    info!("  data dir     : {}", engine.data_dir.display());
    info!("  timeout      : {}s", cli.timeout_secs);
    info!("  max output   : {} bytes", cli.max_output_bytes);
    info!(
        "  concurrency  : {}",
        cli.max_concurrent_scans
            .map(|n| n.to_string())
            .unwrap_or_else(|| "<unbounded>".to_string())
    );

    let registry = TaskRegistry::new(engine, Arc::new(ProcessRunner::new(limits)), config);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutting down");
                on_signal.cancel();
            }
            Err(e) => warn!("cannot listen for Ctrl-C: {e}"),
        }
    });

    let bind = format!("{}:{}", cli.host, cli.port);
    server::spawn_server(&bind, AppState::new(registry), shutdown).await
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }
}
