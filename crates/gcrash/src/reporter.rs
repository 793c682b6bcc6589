//! Incident reporting shared by the fault interceptor and the watchdog.

use crate::context::ExecutionContext;
use crate::dump::{Cause, DumpWriter};
use crate::error::DumpError;
use crate::handler::{CrashHandler, CrashHandlerSlot};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Writes dumps for every trigger path and tracks whether a freeze has
/// already been confirmed.
pub struct Reporter {
    writer: DumpWriter,
    handlers: CrashHandlerSlot,
    context: Option<Arc<dyn ExecutionContext>>,
    frozen: AtomicBool,
}

impl Reporter {
    pub fn new(writer: DumpWriter, context: Option<Arc<dyn ExecutionContext>>) -> Self {
        Reporter {
            writer,
            handlers: CrashHandlerSlot::new(),
            context,
            frozen: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> Option<&dyn ExecutionContext> {
        self.context.as_deref()
    }

    /// Replace the crash handler; `None` clears it.
    pub fn set_crash_handler(&self, handler: Option<Box<dyn CrashHandler>>) {
        if self.handlers.register(handler) {
            log::debug!("Released previous crash handler");
        }
    }

    pub fn crash_handlers(&self) -> &CrashHandlerSlot {
        &self.handlers
    }

    /// Write a dump for `cause`.
    pub fn dump(&self, cause: &Cause) -> Option<PathBuf> {
        let path = self.writer.write(cause, self.context(), &self.handlers);
        if let Some(path) = &path {
            log::info!("Wrote dump {}", path.display());
        }
        path
    }

    /// Dump for a fatal signal, unless a confirmed freeze is already being
    /// reported. The freeze path ends in `abort()`, and the abort must not
    /// produce a second artifact. Returns `None` when skipped.
    ///
    /// Runs in signal context, so it never logs; the caller reports the
    /// outcome.
    pub fn report_fault(
        &self,
        signal: Option<&'static str>,
        address: Option<usize>,
    ) -> Option<Result<PathBuf, DumpError>> {
        if self.is_frozen() {
            return None;
        }
        Some(self.writer.write_unlogged(
            &Cause::Fault { signal, address },
            self.context(),
            &self.handlers,
        ))
    }

    /// Confirm a freeze and dump it. Only the first confirmation writes a
    /// dump; the monitor thread and the interpreter hook may race here.
    pub fn report_freeze(&self, period: Duration) -> Option<PathBuf> {
        if self.frozen.swap(true, Ordering::SeqCst) {
            return None;
        }
        log::error!("Freeze detected: no heartbeat within {:?}", period);
        self.dump(&Cause::Freeze { period })
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}
