//! Dump artifact writer.
//!
//! One incident produces one text file: a headline naming the cause, the
//! interpreter's stack, and whatever the registered crash handler emits.

use crate::context::ExecutionContext;
use crate::error::DumpError;
use crate::handler::{CrashHandlerSlot, run_handler};
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Why a dump is being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    /// A fatal signal was delivered.
    Fault {
        /// Signal name, e.g. `SIGSEGV`.
        signal: Option<&'static str>,
        /// Faulting address, when the kernel reported one.
        address: Option<usize>,
    },
    /// The watchdog confirmed a freeze.
    Freeze { period: Duration },
    /// The script asked for a dump.
    Requested,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Fault { signal, address } => {
                write!(f, "**Segmentation fault occurred")?;
                match (signal, address) {
                    (Some(signal), Some(address)) => write!(f, " ({signal} at {address:#x})")?,
                    (Some(signal), None) => write!(f, " ({signal})")?,
                    (None, Some(address)) => write!(f, " (at {address:#x})")?,
                    (None, None) => {}
                }
                write!(f, "**")
            }
            Cause::Freeze { period } => write!(
                f,
                "**Freeze detected: no heartbeat for {}**",
                format_period(*period)
            ),
            Cause::Requested => write!(f, "**Lua state dump requested**"),
        }
    }
}

fn format_period(period: Duration) -> String {
    if period.subsec_millis() == 0 {
        format!("{}s", period.as_secs())
    } else {
        format!("{}ms", period.as_millis())
    }
}

/// File name for a dump written at `time`.
pub fn dump_file_name(prefix: &str, time: &DateTime<Local>) -> String {
    format!("{}-{}.txt", prefix, time.format("%Y%m%d_%H%M%S"))
}

/// Writes dump artifacts into one directory.
#[derive(Debug, Clone)]
pub struct DumpWriter {
    dir: PathBuf,
    prefix: String,
}

impl DumpWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        DumpWriter {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Write one dump. Returns the artifact path, or `None` when the file
    /// could not be created; a failed dump must never stop the caller from
    /// terminating the process.
    pub fn write(
        &self,
        cause: &Cause,
        context: Option<&dyn ExecutionContext>,
        handlers: &CrashHandlerSlot,
    ) -> Option<PathBuf> {
        match self.write_unlogged(cause, context, handlers) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("{}", e);
                e.path().cloned()
            }
        }
    }

    /// Write one dump without logging, for the signal handler.
    pub fn write_unlogged(
        &self,
        cause: &Cause,
        context: Option<&dyn ExecutionContext>,
        handlers: &CrashHandlerSlot,
    ) -> Result<PathBuf, DumpError> {
        let (path, file) = self.create(&Local::now()).map_err(|source| DumpError::Create {
            dir: self.dir.clone(),
            source,
        })?;

        let mut out = BufWriter::new(file);
        match write_report(&mut out, cause, context, handlers).and_then(|_| out.flush()) {
            Ok(()) => Ok(path),
            Err(source) => Err(DumpError::Incomplete { path, source }),
        }
    }

    /// Open a fresh file for `time`. An artifact already written in the same
    /// second is never reopened; the new one gets a counter suffix instead.
    fn create(&self, time: &DateTime<Local>) -> io::Result<(PathBuf, File)> {
        let name = dump_file_name(&self.prefix, time);
        let mut path = self.dir.join(&name);
        let mut attempt = 0u32;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                    let stem = name.trim_end_matches(".txt");
                    path = self.dir.join(format!("{stem}-{attempt}.txt"));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn write_report(
    out: &mut impl Write,
    cause: &Cause,
    context: Option<&dyn ExecutionContext>,
    handlers: &CrashHandlerSlot,
) -> io::Result<()> {
    writeln!(out, "{cause}")?;

    if let Some(context) = context {
        write!(out, "\nMain Lua stack:\n")?;
        for frame in context.stack_frames() {
            writeln!(out, "{}", frame.traceback_line())?;
        }
        out.flush()?;
    }

    let handler = match handlers.snapshot() {
        Ok(handler) => handler,
        Err(()) => {
            write!(out, "\n[[CRASH HANDLER UNAVAILABLE: registration in progress]]\n")?;
            return Ok(());
        }
    };

    if let Some(handler) = handler {
        write!(out, "\nLua Crash Handler:\n\n")?;
        let mut emit_error = None;
        let result = run_handler(handler.as_ref(), &mut |line| {
            if emit_error.is_none() {
                if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                    emit_error = Some(e);
                }
            }
        });
        if let Some(e) = emit_error {
            return Err(e);
        }
        if let Err(message) = result {
            write!(out, "[[ERROR IN CRASH HANDLER: {message}]]")?;
        }
        writeln!(out)?;
    }

    Ok(())
}
