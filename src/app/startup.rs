//! Application startup
//!
//! Stage 1 reads the command line and the configuration file, stage 2
//! starts logging with the merged settings, stage 3 opens the log store and
//! runs the subcommand until it finishes or a signal arrives.

use super::cli::args::{Args, Command};
use super::cli::config::FileConfig;
use super::commands::{self, CommandError};
use crate::core::error_handling::log_error_with_context;
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::version::long_version;
use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;

pub fn startup() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    // Stage 1: configuration
    let mut config = match FileConfig::load(args.config_file.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.apply_args(&args);

    // Stage 2: logging
    let use_color = config
        .log
        .color
        .unwrap_or_else(|| std::io::stderr().is_terminal());
    colored::control::set_override(use_color);
    let log_file = config.log.file.as_deref().and_then(|p| p.to_str());
    if let Err(e) = init_logging(
        config.log.level.as_deref(),
        config.log.format.as_deref(),
        log_file,
        use_color,
    ) {
        eprintln!("Error: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }
    log::info!("disruptor {} starting", long_version());
    log::debug!("Effective configuration: {:#?}", config);

    // Stage 3: run the command
    let shutdown = ShutdownCoordinator::new();
    shutdown.install_signal_handlers();

    let (context, result) = match &args.command {
        Command::Produce { count, interval_ms } => (
            "Producer",
            run_produce(&config, *count, Duration::from_millis(*interval_ms), &shutdown).await,
        ),
        Command::Consume { limit, .. } => {
            ("Consumer", run_consume(&config, *limit, &shutdown).await)
        }
        Command::Demo { count } => ("Demo", run_demo(&config, *count, &shutdown).await),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error_with_context(&e, &format!("{} failed: {}", context, e));
            ExitCode::FAILURE
        }
    }
}

async fn run_produce(
    config: &FileConfig,
    count: u64,
    interval: Duration,
    shutdown: &ShutdownCoordinator,
) -> Result<(), CommandError> {
    let store = commands::open_store(&config.store.url).await?;
    commands::produce(config, store, count, interval, shutdown).await?;
    Ok(())
}

async fn run_consume(
    config: &FileConfig,
    limit: Option<u64>,
    shutdown: &ShutdownCoordinator,
) -> Result<(), CommandError> {
    let store = commands::open_store(&config.store.url).await?;
    commands::consume(config, store, limit, shutdown).await?;
    Ok(())
}

async fn run_demo(
    config: &FileConfig,
    count: u64,
    shutdown: &ShutdownCoordinator,
) -> Result<(), CommandError> {
    let store = commands::open_store(&config.store.url).await?;
    let report = commands::demo(config, store, count, shutdown).await?;
    println!("{}", report);
    Ok(())
}
