//! Tessera entrypoint.
//!
//! `tessera <command>[;<command>;…]` queues the given commands on the script
//! queue and runs the frame loop until the queues drain (or forever once a
//! display-activating command ran). With no arguments the engine enters a
//! `set-fps 60` idle state.
//!
//! Exit codes: 0 normal, 1 a critical error stopped the loop, 2 the error
//! log failed to close, 3 a panic occurred while closing it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use core_document::capture;
use core_engine::{Engine, EngineConfig};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about = "Tessera scene engine")]
struct Args {
    /// Commands to execute, `;`-separated. Empty enters the idle state.
    #[arg(trailing_var_arg = true)]
    pub commands: Vec<String>,
    /// Configuration file path (overrides discovery of `tessera.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Keep draining task queues past critical errors.
    #[arg(long)]
    pub recover: bool,
    /// Run frames as fast as possible, without the fps sleep.
    #[arg(long)]
    pub headless: bool,
}

mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const CRITICAL_ERROR: u8 = 1;
    pub const LOG_CLOSE_ERROR: u8 = 2;
    pub const LOG_CLOSE_PANIC: u8 = 3;
}

fn configure_logging() -> Result<WorkerGuard> {
    let log_path = Path::new("tessera.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(log_path);
    }
    let file_appender = tracing_appender::rolling::never(".", "tessera.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!(target: "runtime", %panic_info, "panic");
        default_hook(panic_info);
    }));
}

fn run(args: &Args) -> Result<bool> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("tessera.toml"));
    let config: EngineConfig = core_engine::load_from(&config_path)?;
    let engine = Engine::with_recover(config, args.recover);

    if args.commands.is_empty() {
        engine.queue_command_line("set-fps 60");
    } else {
        engine.queue_command_line(&args.commands.join(" "));
    }
    info!(target: "runtime", commands = args.commands.len(), "startup");

    let mut critical = false;
    loop {
        let frame_start = Instant::now();
        if let Err(err) = engine.update() {
            capture::err(format!("Critical Error: {err}"));
            critical = true;
            break;
        }
        if !engine.should_continue() {
            break;
        }
        if !args.headless && engine.is_display_active() {
            let budget = engine.frame_budget();
            if let Some(remaining) = budget.checked_sub(frame_start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    }
    Ok(critical)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = match configure_logging() {
        Ok(guard) => Some(guard),
        Err(_) => None,
    };
    install_panic_hook();

    let critical = match run(&args) {
        Ok(critical) => critical,
        Err(err) => {
            capture::err(format!("Fatal: {err:#}"));
            true
        }
    };

    // The error log must close cleanly even on failure paths.
    match std::panic::catch_unwind(capture::disable_error_log) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            eprintln!("Error closing error log: {err}");
            return ExitCode::from(exit_codes::LOG_CLOSE_ERROR);
        }
        Err(_) => {
            eprintln!("Panic while closing error log");
            return ExitCode::from(exit_codes::LOG_CLOSE_PANIC);
        }
    }

    if critical {
        ExitCode::from(exit_codes::CRITICAL_ERROR)
    } else {
        ExitCode::from(exit_codes::SUCCESS)
    }
}
