//! Game server binary module exposing gcrash to Lua.
//!
//! Loading the module installs the fault handler and sets the global
//! `gcrash` table:
//!
//! - `gcrash.dumpstate()` writes a dump without terminating
//! - `gcrash.sethandler(fn)` registers a function contributing dump lines
//! - `gcrash.startwatchdog(period)` arms (or resumes) the freeze watchdog
//! - `gcrash.stopwatchdog()` pauses it
//! - `gcrash.destroywatchdog()` stops it
//! - `gcrash.crash()` faults deliberately

mod functions;
mod handler;
mod interpreter;
mod timer;

use anyhow::{Context, Result};
use gcrash::Diagnostics;
use gcrash_lua::{LuaError, find_lua_library, init_lua_library, lua_State, lua_library};
use interpreter::LuaInterpreter;
use std::fs;
use std::os::raw::c_int;
use std::sync::{Arc, PoisonError, RwLock};
use timer::TimerScheduler;

/// The diagnostics context of the open module, for the C entry points.
static MODULE: RwLock<Option<Arc<Diagnostics>>> = RwLock::new(None);

pub(crate) fn module() -> Option<Arc<Diagnostics>> {
    MODULE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn banner() -> String {
    format!(
        "\n-------------------------\n>> GCrash v{} <<\n-------------------------",
        env!("CARGO_PKG_VERSION")
    )
}

fn open(state: *mut lua_State) -> Result<()> {
    let config = gcrash::load_config();
    fs::create_dir_all(&config.dump.dir).with_context(|| {
        format!("Failed to create dump directory {}", config.dump.dir.display())
    })?;

    let library = find_lua_library().context("Failed to locate the Lua library")?;
    match init_lua_library(&library) {
        Ok(()) | Err(LuaError::AlreadyInitialized) => {}
        Err(e) => return Err(e).context("Failed to load the Lua library"),
    }
    let lua = lua_library()?;

    let diagnostics = Arc::new(Diagnostics::new(
        config,
        Some(Arc::new(LuaInterpreter::new(state, lua))),
        Box::new(TimerScheduler::new(state, lua)),
    ));
    if let Err(e) = diagnostics.install_fault_interceptor() {
        log::warn!("Fault dumps are disabled: {}", e);
    }

    // SAFETY: gmod13_open runs on the interpreter thread with its state
    unsafe { functions::register(state, lua) };
    *MODULE.write().unwrap_or_else(PoisonError::into_inner) = Some(diagnostics);
    log::info!("gcrash loaded");
    Ok(())
}

/// Module entry point called by the server when the module is required.
///
/// # Safety
/// `state` must be the server's Lua state.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn gmod13_open(state: *mut lua_State) -> c_int {
    let _ = env_logger::try_init();
    println!("{}", banner());

    if let Err(e) = open(state) {
        log::error!("gcrash failed to load: {:#}", e);
    }
    0
}

/// Module exit point. Destroys the watchdog, releases the crash handler and
/// detaches the fault interceptor from the Lua state the host frees next.
///
/// # Safety
/// `state` must be the server's Lua state.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn gmod13_close(_state: *mut lua_State) -> c_int {
    let diagnostics = MODULE.write().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(diagnostics) = diagnostics {
        diagnostics.destroy_watchdog();
        diagnostics.set_crash_handler(None);
        diagnostics.detach_fault_interceptor();
        log::info!("gcrash unloaded");
    }
    0
}
