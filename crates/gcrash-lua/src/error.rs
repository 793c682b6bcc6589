//! Error types for gcrash-lua.

use thiserror::Error;

/// Errors that can occur when binding to Lua.
#[derive(Error, Debug)]
pub enum LuaError {
    /// Failed to load the Lua library.
    #[error("Failed to load Lua library: {0}")]
    LoadError(#[from] libloading::Error),

    /// Lua library not found.
    #[error("Lua library not found at: {0}")]
    LibraryNotFound(String),

    /// The library has not been loaded yet.
    #[error("Lua library is not initialized")]
    NotInitialized,

    /// The library was already loaded.
    #[error("Lua library is already initialized")]
    AlreadyInitialized,

    /// Lua function not found.
    #[error("Lua function not found: {0}")]
    FunctionNotFound(String),
}

/// Result type for gcrash-lua operations.
pub type LuaResult<T> = Result<T, LuaError>;
