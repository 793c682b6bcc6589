//! Crash-handler registration.
//!
//! The embedding script may register one callback that contributes extra
//! lines to every dump. Registering again replaces (and releases) the
//! previous callback.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

/// A callback invoked while a dump is being written.
///
/// `emit` appends one line to the dump in progress. A returned error is
/// written into the dump instead of aborting it.
pub trait CrashHandler: Send + Sync {
    fn run(&self, emit: &mut dyn FnMut(&str)) -> Result<(), String>;
}

impl<F> CrashHandler for F
where
    F: Fn(&mut dyn FnMut(&str)) -> Result<(), String> + Send + Sync,
{
    fn run(&self, emit: &mut dyn FnMut(&str)) -> Result<(), String> {
        self(emit)
    }
}

/// Holds the currently registered crash handler, if any.
#[derive(Default)]
pub struct CrashHandlerSlot {
    current: Mutex<Option<Arc<dyn CrashHandler>>>,
}

impl CrashHandlerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registered handler. `None` clears the slot.
    ///
    /// Returns whether a previous handler was released.
    pub fn register(&self, handler: Option<Box<dyn CrashHandler>>) -> bool {
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, handler.map(Arc::from))
        };
        // Dropped outside the lock; a dump may still hold its own reference.
        previous.is_some()
    }

    /// Remove the registered handler.
    pub fn clear(&self) -> bool {
        self.register(None)
    }

    pub fn is_registered(&self) -> bool {
        self.current
            .lock()
            .map(|current| current.is_some())
            .unwrap_or(false)
    }

    /// Take a reference to the current handler for the duration of a dump.
    ///
    /// This never blocks: the dump may be running in a signal handler that
    /// interrupted a registration on the same thread.
    pub(crate) fn snapshot(&self) -> Result<Option<Arc<dyn CrashHandler>>, ()> {
        match self.current.try_lock() {
            Ok(current) => Ok(current.clone()),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner().clone()),
            Err(TryLockError::WouldBlock) => Err(()),
        }
    }
}

/// Run a handler, turning a panic into an error message.
pub(crate) fn run_handler(
    handler: &dyn CrashHandler,
    emit: &mut dyn FnMut(&str),
) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.run(emit))) {
        Ok(result) => result,
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
