//! Crash handlers written in Lua.

use crate::interpreter::StatePtr;
use gcrash::CrashHandler;
use gcrash_lua::{LUA_OK, LUA_REGISTRYINDEX, LuaLibrary, lua_State, lua_library, lua_upvalueindex};
use std::ffi::c_void;
use std::os::raw::c_int;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// The emit sink of the dump in progress. Emit closures that escape the
/// handler call compare against it and do nothing once it is gone.
static ACTIVE_EMIT: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

type EmitFn<'a> = &'a mut dyn FnMut(&str);

/// A Lua function held in the registry.
pub struct LuaCrashHandler {
    state: StatePtr,
    lua: &'static LuaLibrary,
    reference: c_int,
}

impl LuaCrashHandler {
    /// Take a registry reference to the value at `index`.
    ///
    /// # Safety
    /// `state` must be the module's Lua state and `index` a valid stack index.
    pub unsafe fn from_stack(
        state: *mut lua_State,
        lua: &'static LuaLibrary,
        index: c_int,
    ) -> Self {
        let reference = unsafe {
            (lua.lua_pushvalue)(state, index);
            (lua.lual_ref)(state, LUA_REGISTRYINDEX)
        };
        LuaCrashHandler {
            state: StatePtr(state),
            lua,
            reference,
        }
    }
}

impl CrashHandler for LuaCrashHandler {
    fn run(&self, emit: &mut dyn FnMut(&str)) -> Result<(), String> {
        let state = self.state.0;
        let lua = self.lua;
        let mut sink: EmitFn<'_> = emit;
        let sink_ptr = (&mut sink as *mut EmitFn<'_>).cast::<c_void>();

        ACTIVE_EMIT.store(sink_ptr, Ordering::SeqCst);
        // SAFETY: the handler runs while the interpreter thread is stopped
        let result = unsafe {
            let top = (lua.lua_gettop)(state);
            (lua.lua_rawgeti)(state, LUA_REGISTRYINDEX, self.reference);
            (lua.lua_pushlightuserdata)(state, sink_ptr);
            (lua.lua_pushcclosure)(state, emit_line, 1);
            let result = if (lua.lua_pcall)(state, 1, 0, 0) == LUA_OK {
                Ok(())
            } else {
                Err(lua
                    .to_string(state, -1)
                    .unwrap_or_else(|| "(error object is not a string)".to_string()))
            };
            (lua.lua_settop)(state, top);
            result
        };
        ACTIVE_EMIT.store(ptr::null_mut(), Ordering::SeqCst);
        result
    }
}

impl Drop for LuaCrashHandler {
    fn drop(&mut self) {
        // SAFETY: handlers are replaced and released from the interpreter thread
        unsafe { (self.lua.lual_unref)(self.state.0, LUA_REGISTRYINDEX, self.reference) }
    }
}

/// The function passed to a Lua crash handler: writes its argument as one
/// line of the dump.
unsafe extern "C-unwind" fn emit_line(state: *mut lua_State) -> c_int {
    let Ok(lua) = lua_library() else {
        return 0;
    };
    let sink_ptr = unsafe { (lua.lua_touserdata)(state, lua_upvalueindex(1)) };
    if sink_ptr.is_null() || sink_ptr != ACTIVE_EMIT.load(Ordering::SeqCst) {
        return 0;
    }
    if let Some(line) = unsafe { lua.to_string(state, 1) } {
        // SAFETY: the pointer is the live sink of the running handler
        let sink = unsafe { &mut *sink_ptr.cast::<EmitFn<'_>>() };
        sink(&line);
    }
    0
}
