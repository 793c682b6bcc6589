//! Low-level Lua FFI bindings using dynamic loading.
//!
//! This crate provides dynamic bindings to the Lua 5.1 C API using `libloading`.
//! The host process already has its Lua library loaded; we resolve the
//! symbols we need from it at runtime instead of linking at compile time.

mod error;
mod functions;
mod types;

mod sys;

pub use error::*;
pub use functions::*;
pub use sys::*;
pub use types::*;
