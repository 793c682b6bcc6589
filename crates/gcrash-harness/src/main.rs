//! gcrash-harness: run gcrash inside a simulated game server.

mod cli;
mod host;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use gcrash::{Diagnostics, ExecutionContext, GcrashConfig, load_config, load_config_from_path};
use host::{HostLoop, LoopTimers, Phase, SimulatedInterpreter, WatchdogPlan, register_handler};
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(cli: &Cli) -> GcrashConfig {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };
    if let Some(dir) = &cli.dump_dir {
        config.dump.dir = dir.clone();
    }
    if let Some(ms) = cli.time_unit_ms {
        config.watchdog.time_unit_ms = ms;
    }
    if cli.no_escalation_hook {
        config.watchdog.escalation_hook = false;
    }
    config
}

fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = resolve_config(&cli);
    log::debug!("Loaded config: {:?}", config);

    fs::create_dir_all(&config.dump.dir).with_context(|| {
        format!("Failed to create dump directory {}", config.dump.dir.display())
    })?;
    let unit = config.watchdog.time_unit();

    let interpreter = Arc::new(SimulatedInterpreter::new());
    let context: Arc<dyn ExecutionContext> = interpreter.clone();
    let timers = LoopTimers::default();
    let diagnostics = Diagnostics::new(config, Some(context), Box::new(timers.clone()));
    diagnostics
        .install_fault_interceptor()
        .context("Failed to install the fault handler")?;

    match cli.command {
        Commands::Watchdog {
            period,
            run_for,
            stall_after,
            stall,
            pause_after,
            restart_after,
            handler,
        } => {
            register_handler(&diagnostics, handler);
            let host = HostLoop {
                diagnostics: &diagnostics,
                interpreter: &interpreter,
                timers: &timers,
                unit,
            };
            host.run(&WatchdogPlan {
                period,
                run_for,
                stall_after,
                stall,
                pause_after,
                restart_after,
            });
            println!("Host loop finished without incident");
        }
        Commands::Crash {
            with_watchdog,
            handler,
        } => {
            register_handler(&diagnostics, handler);
            if with_watchdog {
                diagnostics.start_watchdog(diagnostics.config().watchdog.default_period as i64);
            }
            interpreter.set_phase(Phase::Crashing);
            diagnostics.trigger_fault();
        }
        Commands::Dump { handler } => {
            register_handler(&diagnostics, handler);
            let path = diagnostics
                .dump_now()
                .context("Failed to write the dump")?;
            println!("{}", path.display());
        }
    }

    Ok(())
}
