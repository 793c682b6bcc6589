//! Fatal-signal interception.
//!
//! The handler has no user data, so the reporter it dumps through is kept in
//! a process-wide slot. Signals are registered once; installing again only
//! swaps the reporter, and detaching empties the slot so a later fault
//! aborts without touching a torn-down interpreter.
//!
//! Nothing on the handler path logs: logger backends may lock. The handler
//! reports with a single `eprintln!` before aborting.

use crate::config::FaultConfig;
use crate::error::GcrashResult;
use crate::reporter::Reporter;
use std::sync::Arc;

#[cfg(unix)]
mod imp {
    use super::*;
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
    use std::time::Duration;

    static REPORTER: AtomicPtr<Reporter> = AtomicPtr::new(ptr::null_mut());
    static REGISTERED: AtomicBool = AtomicBool::new(false);
    static HANDLING: AtomicBool = AtomicBool::new(false);
    /// `pthread_self()` of the thread writing the fault dump.
    static HANDLING_THREAD: AtomicUsize = AtomicUsize::new(0);

    /// How long a thread faulting during another thread's dump waits for
    /// that dump to abort the process.
    const CONCURRENT_FAULT_WAIT: Duration = Duration::from_secs(30);

    pub fn install(reporter: Arc<Reporter>, config: &FaultConfig) -> GcrashResult<()> {
        let signals = config.parse_signals()?;

        // The previous reporter is leaked: a handler on another thread may
        // still be reading it.
        let _previous = REPORTER.swap(Arc::into_raw(reporter).cast_mut(), Ordering::SeqCst);

        if REGISTERED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Fault handler already registered, reporter replaced");
            return Ok(());
        }

        // Every intercepted signal stays blocked while the handler runs, so a
        // second fault raised by the dump cannot re-enter it.
        let mut mask = SigSet::empty();
        for signal in &signals {
            mask.add(*signal);
        }
        let action = SigAction::new(
            SigHandler::SigAction(handle_fault),
            SaFlags::SA_SIGINFO,
            mask,
        );
        for signal in signals {
            // SAFETY: the handler only reads the reporter slot, writes the
            // dump and aborts.
            if let Err(e) = unsafe { signal::sigaction(signal, &action) } {
                REGISTERED.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
            log::debug!("Intercepting {}", signal.as_str());
        }
        Ok(())
    }

    pub fn detach(reporter: &Arc<Reporter>) -> bool {
        // The detached reporter is leaked like a replaced one.
        REPORTER
            .compare_exchange(
                Arc::as_ptr(reporter).cast_mut(),
                ptr::null_mut(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn is_installed() -> bool {
        REGISTERED.load(Ordering::SeqCst)
    }

    pub fn is_attached() -> bool {
        !REPORTER.load(Ordering::SeqCst).is_null()
    }

    extern "C" fn handle_fault(signum: libc::c_int, info: *mut libc::siginfo_t, _: *mut c_void) {
        // SAFETY: pthread_self is async-signal-safe.
        let this_thread = unsafe { libc::pthread_self() } as usize;
        if HANDLING.swap(true, Ordering::SeqCst) {
            // A fault on the dumping thread itself must not wait for that
            // thread; any other thread gives the dump a bounded time.
            if HANDLING_THREAD.load(Ordering::SeqCst) != this_thread {
                std::thread::sleep(CONCURRENT_FAULT_WAIT);
            }
            std::process::abort();
        }
        HANDLING_THREAD.store(this_thread, Ordering::SeqCst);

        let signal = Signal::try_from(signum).ok().map(Signal::as_str);
        let name = signal.unwrap_or("signal");
        let reporter = REPORTER.load(Ordering::SeqCst);
        if reporter.is_null() {
            eprintln!("gcrash: {} caught", name);
            std::process::abort();
        }

        // SAFETY: reporters stored in the slot are never freed.
        let reporter = unsafe { &*reporter };
        let address = unsafe { fault_address(info) };
        match reporter.report_fault(signal, address) {
            Some(Ok(path)) => eprintln!("gcrash: {} caught, dump written to {}", name, path.display()),
            Some(Err(e)) => eprintln!("gcrash: {} caught, {}", name, e),
            None => eprintln!("gcrash: {} caught during a freeze dump", name),
        }
        std::process::abort();
    }

    /// Faulting address, when the kernel produced the signal. Signals sent
    /// with `kill` or `raise` carry no address.
    unsafe fn fault_address(info: *const libc::siginfo_t) -> Option<usize> {
        if info.is_null() {
            return None;
        }
        let info = unsafe { &*info };
        if info.si_code <= 0 {
            return None;
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let address = unsafe { info.si_addr() };
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let address = info.si_addr;
        Some(address as usize)
    }

    pub fn trigger_fault() -> ! {
        // SAFETY: raising a signal on the current thread.
        unsafe {
            libc::raise(libc::SIGSEGV);
        }
        std::process::abort();
    }
}

#[cfg(not(unix))]
mod imp {
    use super::*;
    use crate::error::GcrashError;

    pub fn install(_reporter: Arc<Reporter>, _config: &FaultConfig) -> GcrashResult<()> {
        Err(GcrashError::Unsupported)
    }

    pub fn detach(_reporter: &Arc<Reporter>) -> bool {
        false
    }

    pub fn is_installed() -> bool {
        false
    }

    pub fn is_attached() -> bool {
        false
    }

    pub fn trigger_fault() -> ! {
        std::process::abort();
    }
}

/// Intercept the configured fatal signals, dumping through `reporter`
/// before the process aborts.
pub fn install(reporter: Arc<Reporter>, config: &FaultConfig) -> GcrashResult<()> {
    imp::install(reporter, config)
}

/// Stop dumping through `reporter`. A fault after this aborts without a
/// dump. Returns false when another reporter (or none) is installed.
pub fn detach(reporter: &Arc<Reporter>) -> bool {
    imp::detach(reporter)
}

/// Whether the signal handlers are registered.
pub fn is_installed() -> bool {
    imp::is_installed()
}

/// Whether a reporter is currently installed in the handler slot.
pub fn is_attached() -> bool {
    imp::is_attached()
}

/// Deliberately fault the current thread. Never returns.
pub fn trigger_fault() -> ! {
    imp::trigger_fault()
}
