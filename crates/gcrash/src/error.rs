//! Error types for gcrash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while setting up diagnostics.
///
/// Nothing on the dump or watchdog paths returns these; those paths resolve
/// failures locally because they must never block process termination.
#[derive(Error, Debug)]
pub enum GcrashError {
    /// Installing a signal handler failed.
    #[cfg(unix)]
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] nix::errno::Errno),

    /// A configured signal name is not a known signal.
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// Fault interception is not available on this platform.
    #[error("Fault interception is not supported on this platform")]
    Unsupported,
}

/// Result type for gcrash operations.
pub type GcrashResult<T> = Result<T, GcrashError>;

/// Why a dump artifact could not be written in full.
#[derive(Error, Debug)]
pub enum DumpError {
    /// The artifact could not be created; nothing was written.
    #[error("could not create dump file in {}: {source}", .dir.display())]
    Create { dir: PathBuf, source: io::Error },

    /// The artifact exists but writing stopped part way.
    #[error("dump {} is incomplete: {source}", .path.display())]
    Incomplete { path: PathBuf, source: io::Error },
}

impl DumpError {
    /// The artifact, if one was created.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            DumpError::Create { .. } => None,
            DumpError::Incomplete { path, .. } => Some(path),
        }
    }
}
