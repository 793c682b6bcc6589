//! Heartbeats from the server's `timer` library.
//!
//! The timer only fires while the game loop runs, which is exactly what the
//! watchdog needs to observe.

use crate::interpreter::StatePtr;
use gcrash::{Heartbeat, PulseScheduler};
use gcrash_lua::{LUA_GLOBALSINDEX, LUA_OK, LuaLibrary, LuaType, lua_State};
use std::os::raw::c_int;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub const TIMER_NAME: &str = "gcrash.watchdog";

/// Heartbeat delivered by the timer callback.
static PULSE: Mutex<Option<Heartbeat>> = Mutex::new(None);

pub struct TimerScheduler {
    state: StatePtr,
    lua: &'static LuaLibrary,
}

impl TimerScheduler {
    pub fn new(state: *mut lua_State, lua: &'static LuaLibrary) -> Self {
        TimerScheduler {
            state: StatePtr(state),
            lua,
        }
    }

    /// Call `timer.<function>(TIMER_NAME, ...)`, with `push_args` pushing
    /// the remaining arguments and returning their count.
    unsafe fn call_timer(&self, function: &str, push_args: impl FnOnce() -> c_int) {
        let (state, lua) = (self.state.0, self.lua);
        unsafe {
            let top = (lua.lua_gettop)(state);
            lua.get_field(state, LUA_GLOBALSINDEX, "timer");
            if lua.type_of(state, -1) != LuaType::Table {
                log::warn!("The timer library is not available, no heartbeats will be sent");
                (lua.lua_settop)(state, top);
                return;
            }
            lua.get_field(state, -1, function);
            lua.push_str(state, TIMER_NAME);
            let nargs = 1 + push_args();
            if (lua.lua_pcall)(state, nargs, 0, 0) != LUA_OK {
                log::warn!(
                    "timer.{} failed: {}",
                    function,
                    lua.to_string(state, -1).unwrap_or_default()
                );
            }
            (lua.lua_settop)(state, top);
        }
    }
}

impl PulseScheduler for TimerScheduler {
    fn schedule_pulse(&self, interval: Duration, heartbeat: Heartbeat) {
        *PULSE.lock().unwrap_or_else(PoisonError::into_inner) = Some(heartbeat);
        let (state, lua) = (self.state.0, self.lua);
        // SAFETY: called from the interpreter thread by startwatchdog
        unsafe {
            self.call_timer("Create", || {
                (lua.lua_pushnumber)(state, interval.as_secs_f64());
                (lua.lua_pushnumber)(state, 0.0);
                (lua.lua_pushcclosure)(state, pulse, 0);
                3
            });
        }
    }

    fn cancel_pulse(&self) {
        *PULSE.lock().unwrap_or_else(PoisonError::into_inner) = None;
        unsafe { self.call_timer("Remove", || 0) }
    }
}

unsafe extern "C-unwind" fn pulse(_state: *mut lua_State) -> c_int {
    if let Some(heartbeat) = PULSE.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
        heartbeat.beat();
    }
    0
}
