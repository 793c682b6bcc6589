//! Crash dumps and freeze watchdog for embedded Lua hosts.
//!
//! A host module creates one [`Diagnostics`] per interpreter. It writes a
//! dump file when the process faults, when the supervised loop stops
//! producing heartbeats, or when the script asks for one.

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod dump;
pub mod error;
pub mod handler;
pub mod interceptor;
pub mod reporter;
pub mod watchdog;

pub use config::{GcrashConfig, load_config, load_config_from_path};
pub use context::{ExecutionContext, FrameKind, StackFrame};
pub use diagnostics::Diagnostics;
pub use dump::{Cause, DumpWriter};
pub use error::{DumpError, GcrashError, GcrashResult};
pub use handler::{CrashHandler, CrashHandlerSlot};
pub use reporter::Reporter;
pub use watchdog::{Heartbeat, ProcessAbort, PulseScheduler, Terminate, Watchdog, WatchdogStatus};
