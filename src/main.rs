/*!
 * Shardline CLI
 *
 * `shardline download <ROOT>` pulls every object listed in the `.bin`
 * manifests under `<ROOT>/meta/` into `<ROOT>/data/`. `shardline push <ROOT>`
 * uploads the manifests themselves as one sentinel-framed batch.
 */

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::HumanBytes;
use shardline::{
    cli_progress::ProgressMonitor,
    config::{EngineConfig, LogLevel, Network, SkipPolicy},
    engine::{Engine, END_SENTINEL, START_SENTINEL},
    error::{ShardlineError, EXIT_FATAL, EXIT_PARTIAL},
    layout::DatasetLayout,
    logging,
    manifest::manifest_push_names,
    stats::BatchReport,
};
use std::path::{Path, PathBuf};

const BYTES_PER_MIB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "shardline")]
#[command(version, about = "Parallel, bandwidth-governed dataset transfer over presigned URLs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); flags override its values
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Log file (default: <ROOT>/logs/shardline.log)
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Hide the progress bar
    #[arg(long = "no-progress", global = true)]
    no_progress: bool,

    /// Attempts per object, including the first
    #[arg(long = "retries", value_name = "N", global = true)]
    retries: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every object listed in <ROOT>/meta/*.bin
    Download(TransferArgs),

    /// Upload <ROOT>/meta/*.bin as one batch
    Push(TransferArgs),
}

#[derive(Args)]
struct TransferArgs {
    /// Dataset root
    #[arg(value_name = "ROOT")]
    root: PathBuf,

    /// Presign service URL
    #[arg(short = 'e', long = "endpoint", value_name = "URL")]
    endpoint: Option<String>,

    /// Network tier requested from the presign service
    #[arg(short = 'n', long = "network", value_enum)]
    network: Option<NetworkArg>,

    /// Bandwidth cap in MiB/s (0 = unlimited)
    #[arg(short = 'b', long = "bandwidth", value_name = "MIB_S")]
    bandwidth: Option<u64>,

    /// Concurrent transfers
    #[arg(short = 'p', long = "parallel", value_name = "N")]
    parallel: Option<usize>,

    /// When an existing local file satisfies a pull
    #[arg(long = "skip", value_enum)]
    skip: Option<SkipArg>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum NetworkArg {
    Public,
    Private,
}

impl From<NetworkArg> for Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Public => Network::Public,
            NetworkArg::Private => Network::Private,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum SkipArg {
    Size,
    Exists,
    Never,
}

impl From<SkipArg> for SkipPolicy {
    fn from(arg: SkipArg) -> Self {
        match arg {
            SkipArg::Size => SkipPolicy::Size,
            SkipArg::Exists => SkipPolicy::Exists,
            SkipArg::Never => SkipPolicy::Never,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<ShardlineError>()
                .map(|e| e.exit_code())
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let base_config = match cli.config {
        Some(ref path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let (args, pushing) = match cli.command {
        Commands::Download(ref args) => (args, false),
        Commands::Push(ref args) => (args, true),
    };
    let config = apply_overrides(base_config, &cli, args);

    match logging::init_logging(&config) {
        Ok(Some(path)) => println!("logging to {}", path.display()),
        Ok(None) => {}
        Err(e) => eprintln!("Warning: Failed to initialize logging: {}", e),
    }
    install_signal_handler(&config.root);

    println!(
        "shardline {}: {} {} ({} workers, {})",
        shardline::VERSION,
        if pushing { "push" } else { "download" },
        config.root.display(),
        config.parallel,
        if config.bandwidth_bps == 0 {
            "unlimited".to_string()
        } else {
            format!("{}/s", HumanBytes(config.bandwidth_bps))
        }
    );

    let root = config.root.clone();
    let show_progress = config.show_progress;
    let engine = Engine::new(config).context("starting transfer engine")?;
    let monitor = ProgressMonitor::spawn(engine.counters(), show_progress);

    let report = if pushing {
        push_manifests(&engine, &root)?
    } else {
        engine.multi_download(&root)?
    };

    monitor.finish();
    report.print();
    Ok(report.exit_code())
}

fn apply_overrides(mut config: EngineConfig, cli: &Cli, args: &TransferArgs) -> EngineConfig {
    config.root = args.root.clone();
    if let Some(ref endpoint) = args.endpoint {
        config.presign_endpoint = endpoint.clone();
    }
    if let Some(network) = args.network {
        config.network = network.into();
    }
    if let Some(mib) = args.bandwidth {
        config.bandwidth_bps = mib.saturating_mul(BYTES_PER_MIB);
    }
    if let Some(parallel) = args.parallel {
        config.parallel = parallel;
    }
    if let Some(skip) = args.skip {
        config.skip_policy = skip.into();
    }
    if let Some(retries) = cli.retries {
        config.max_attempts = retries;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    config.verbose |= cli.verbose;
    config.show_progress &= !cli.no_progress;
    let default_log = logging::default_log_path(&DatasetLayout::new(&config.root));
    config.log_file = cli.log.clone().or(config.log_file.take()).or(Some(default_log));
    config
}

fn push_manifests(engine: &Engine, root: &Path) -> anyhow::Result<BatchReport> {
    let names = manifest_push_names(&DatasetLayout::new(root))?;
    tracing::info!("pushing {} manifests", names.len());

    engine.push(START_SENTINEL)?;
    for name in &names {
        engine.push(name)?;
    }
    engine.push(END_SENTINEL)?;

    let report = engine
        .wait()?
        .ok_or_else(|| ShardlineError::ProtocolViolation("push batch vanished".to_string()))?;
    Ok(report)
}

/// Ctrl-C / SIGTERM: leave part files in temp/ for the next run and exit
fn install_signal_handler(root: &Path) {
    let temp = DatasetLayout::new(root).temp_dir();
    let spawned = std::thread::Builder::new()
        .name("shardline-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!("signal handler unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(wait_for_signal());
            eprintln!("\nInterrupted; partial files kept under {}", temp.display());
            std::process::exit(EXIT_PARTIAL);
        });
    if let Err(e) = spawned {
        tracing::warn!("signal handler unavailable: {}", e);
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
