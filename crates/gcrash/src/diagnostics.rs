//! The diagnostics context owned by a host module.

use crate::config::GcrashConfig;
use crate::context::ExecutionContext;
use crate::dump::{Cause, DumpWriter};
use crate::error::GcrashResult;
use crate::handler::CrashHandler;
use crate::interceptor;
use crate::reporter::Reporter;
use crate::watchdog::{ProcessAbort, PulseScheduler, Terminate, Watchdog, WatchdogStatus};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything one loaded module needs: the reporter shared by all trigger
/// paths and the watchdog.
///
/// Dropping it destroys the watchdog and releases the crash handler.
pub struct Diagnostics {
    config: GcrashConfig,
    reporter: Arc<Reporter>,
    watchdog: Watchdog,
}

impl Diagnostics {
    pub fn new(
        config: GcrashConfig,
        context: Option<Arc<dyn ExecutionContext>>,
        scheduler: Box<dyn PulseScheduler>,
    ) -> Self {
        Self::with_terminator(config, context, scheduler, Arc::new(ProcessAbort))
    }

    pub fn with_terminator(
        config: GcrashConfig,
        context: Option<Arc<dyn ExecutionContext>>,
        scheduler: Box<dyn PulseScheduler>,
        terminator: Arc<dyn Terminate>,
    ) -> Self {
        let writer = DumpWriter::new(&config.dump.dir, config.dump.prefix.clone());
        let reporter = Arc::new(Reporter::new(writer, context));
        let watchdog = Watchdog::new(
            config.watchdog.clone(),
            reporter.clone(),
            scheduler,
            terminator,
        );
        Diagnostics {
            config,
            reporter,
            watchdog,
        }
    }

    pub fn config(&self) -> &GcrashConfig {
        &self.config
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Write a dump of the current state without terminating.
    pub fn dump_now(&self) -> Option<PathBuf> {
        self.reporter.dump(&Cause::Requested)
    }

    pub fn set_crash_handler(&self, handler: Option<Box<dyn CrashHandler>>) {
        self.reporter.set_crash_handler(handler);
    }

    /// Arm the watchdog, or resume it when paused.
    pub fn start_watchdog(&self, requested: i64) -> bool {
        self.watchdog.start(requested)
    }

    /// Pause the watchdog. The monitor keeps running.
    pub fn stop_watchdog(&self) {
        self.watchdog.pause();
    }

    pub fn destroy_watchdog(&self) -> bool {
        self.watchdog.destroy()
    }

    pub fn heartbeat(&self) {
        self.watchdog.heartbeat();
    }

    pub fn watchdog_status(&self) -> WatchdogStatus {
        self.watchdog.status()
    }

    pub fn escalation_triggered(&self) {
        self.watchdog.escalation_triggered();
    }

    /// Route fatal signals to this context's reporter.
    pub fn install_fault_interceptor(&self) -> GcrashResult<()> {
        interceptor::install(self.reporter.clone(), &self.config.fault)
    }

    /// Stop routing fatal signals to this context. A later fault aborts
    /// without a dump instead of reading an interpreter that is gone.
    pub fn detach_fault_interceptor(&self) -> bool {
        interceptor::detach(&self.reporter)
    }

    pub fn trigger_fault(&self) -> ! {
        log::warn!("Deliberate fault requested");
        interceptor::trigger_fault()
    }
}

impl Drop for Diagnostics {
    fn drop(&mut self) {
        self.watchdog.destroy();
        self.detach_fault_interceptor();
        // A replaced reporter stays alive in the interceptor; the handler
        // must not outlive the interpreter it calls into.
        self.reporter.set_crash_handler(None);
    }
}
