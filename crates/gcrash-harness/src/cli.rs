//! Command-line interface definition using clap.

use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

/// Drive gcrash with a simulated interpreter and host loop.
#[derive(Parser, Debug)]
#[command(name = "gcrash-harness")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Directory receiving dump files
    ///
    /// Config: dump.dir
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    pub dump_dir: Option<PathBuf>,

    /// Length of one time-unit in milliseconds
    ///
    /// Config: watchdog.time_unit_ms
    #[arg(long, global = true)]
    pub time_unit_ms: Option<u64>,

    /// Confirm a freeze on the first missed deadline
    ///
    /// Config: watchdog.escalation_hook
    #[arg(long, global = true)]
    pub no_escalation_hook: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the host loop with the watchdog armed
    ///
    /// All times are in time-units.
    Watchdog {
        /// Watchdog period requested by the script
        #[arg(long, default_value_t = 30, allow_negative_numbers = true)]
        period: i64,

        /// Total run time
        #[arg(long)]
        run_for: u64,

        /// Stop delivering heartbeats after this long
        #[arg(long)]
        stall_after: Option<u64>,

        /// What the interpreter does while stalled
        #[arg(long, value_enum, default_value_t = StallMode::Spin)]
        stall: StallMode,

        /// Pause the watchdog after this long
        #[arg(long)]
        pause_after: Option<u64>,

        /// Start the watchdog again after this long
        #[arg(long)]
        restart_after: Option<u64>,

        #[arg(long, value_enum, default_value_t = HandlerKind::None)]
        handler: HandlerKind,
    },

    /// Fault deliberately
    Crash {
        /// Arm the watchdog first
        #[arg(long)]
        with_watchdog: bool,

        #[arg(long, value_enum, default_value_t = HandlerKind::None)]
        handler: HandlerKind,
    },

    /// Write a dump and print its path
    Dump {
        #[arg(long, value_enum, default_value_t = HandlerKind::None)]
        handler: HandlerKind,
    },
}

/// How the simulated interpreter behaves once heartbeats stop.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StallMode {
    /// Keep executing script code in an endless loop
    Spin,
    /// Block inside a native call
    Block,
}

/// Crash handler registered by the simulated script.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    None,
    /// Emits a few status lines
    Ok,
    /// Emits one line, then fails
    Fail,
    /// Registers a handler, then replaces it
    Replaced,
}
