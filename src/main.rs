//! Market signal scanner - main entry point
//!
//! This binary provides three subcommands:
//! - scan: Run the periodic scan loop (or a single cycle with --once)
//! - symbols: Print the resolved symbol universe
//! - notify-test: Send a test message through the configured sink

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "signal-scanner")]
#[command(about = "Exchange market scanner with indicator rules and deduplicated alerts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the symbol universe periodically and send alerts
    Scan {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Primary candle interval (overrides config), e.g. "15m"
        #[arg(short, long)]
        interval: Option<String>,

        /// Seconds between cycles (overrides config)
        #[arg(long)]
        poll: Option<u64>,
    },

    /// Print the symbols a scan would cover
    Symbols {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,
    },

    /// Send a test message through the configured notification sink
    NotifyTest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Message text
        #[arg(short, long)]
        message: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // Log file naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // Same format without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Scan { .. } => "scan",
        Commands::Symbols { .. } => "symbols",
        Commands::NotifyTest { .. } => "notify_test",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Scan {
            config,
            once,
            interval,
            poll,
        } => commands::scan::run(config, once, interval, poll),

        Commands::Symbols { config } => commands::symbols::run(config),

        Commands::NotifyTest { config, message } => commands::notify::run(config, message),
    }
}
