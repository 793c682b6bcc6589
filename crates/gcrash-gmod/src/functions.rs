//! The `gcrash` table exposed to Lua.

use crate::handler::LuaCrashHandler;
use crate::module;
use gcrash_lua::{LUA_GLOBALSINDEX, LuaLibrary, LuaType, lua_CFunction, lua_State, lua_library};
use std::os::raw::c_int;

const FUNCTIONS: &[(&str, lua_CFunction)] = &[
    ("dumpstate", dumpstate),
    ("sethandler", sethandler),
    ("startwatchdog", startwatchdog),
    ("stopwatchdog", stopwatchdog),
    ("destroywatchdog", destroywatchdog),
    ("crash", crash),
];

/// Set the global `gcrash` table.
///
/// # Safety
/// `state` must be the module's Lua state.
pub unsafe fn register(state: *mut lua_State, lua: &LuaLibrary) {
    unsafe {
        (lua.lua_createtable)(state, 0, FUNCTIONS.len() as c_int);
        for (name, function) in FUNCTIONS {
            lua.set_cfunction(state, name, *function);
        }
        lua.set_field(state, LUA_GLOBALSINDEX, "gcrash");
    }
}

/// `gcrash.dumpstate()`
unsafe extern "C-unwind" fn dumpstate(_state: *mut lua_State) -> c_int {
    if let Some(diagnostics) = module() {
        diagnostics.dump_now();
    }
    0
}

/// `gcrash.sethandler(fn)`; anything but a function clears the handler.
unsafe extern "C-unwind" fn sethandler(state: *mut lua_State) -> c_int {
    let (Some(diagnostics), Ok(lua)) = (module(), lua_library()) else {
        return 0;
    };
    if unsafe { lua.type_of(state, 1) } == LuaType::Function {
        let handler = unsafe { LuaCrashHandler::from_stack(state, lua, 1) };
        diagnostics.set_crash_handler(Some(Box::new(handler)));
    } else {
        diagnostics.set_crash_handler(None);
    }
    0
}

/// `gcrash.startwatchdog(period)`
unsafe extern "C-unwind" fn startwatchdog(state: *mut lua_State) -> c_int {
    let (Some(diagnostics), Ok(lua)) = (module(), lua_library()) else {
        return 0;
    };
    let requested = unsafe { (lua.lua_tointeger)(state, 1) };
    diagnostics.start_watchdog(requested as i64);
    0
}

/// `gcrash.stopwatchdog()`
unsafe extern "C-unwind" fn stopwatchdog(_state: *mut lua_State) -> c_int {
    if let Some(diagnostics) = module() {
        diagnostics.stop_watchdog();
    }
    0
}

/// `gcrash.destroywatchdog()`
unsafe extern "C-unwind" fn destroywatchdog(_state: *mut lua_State) -> c_int {
    if let Some(diagnostics) = module() {
        diagnostics.destroy_watchdog();
    }
    0
}

/// `gcrash.crash()`
unsafe extern "C-unwind" fn crash(_state: *mut lua_State) -> c_int {
    match module() {
        Some(diagnostics) => diagnostics.trigger_fault(),
        None => gcrash::interceptor::trigger_fault(),
    }
}

/// Installed by the watchdog after the first missed deadline.
pub(crate) unsafe extern "C-unwind" fn escalation_hook(
    _state: *mut lua_State,
    _ar: *mut gcrash_lua::lua_Debug,
) {
    if let Some(diagnostics) = module() {
        diagnostics.escalation_triggered();
    }
}
