//! The server's Lua state as seen by gcrash.

use gcrash::{ExecutionContext, FrameKind, StackFrame};
use gcrash_lua::{
    LUA_MASKCALL, LUA_MASKCOUNT, LUA_MASKLINE, LUA_MASKRET, LuaLibrary, lua_Debug, lua_State,
};
use std::os::raw::c_int;

/// Instructions between count-hook calls while escalating.
const HOOK_INSTRUCTION_COUNT: c_int = 1000;

/// Pointer to the main Lua state.
///
/// It is only dereferenced by the interpreter thread, except when the
/// watchdog or the fault handler inspects a state that has stopped making
/// progress.
#[derive(Clone, Copy)]
pub struct StatePtr(pub *mut lua_State);

unsafe impl Send for StatePtr {}
unsafe impl Sync for StatePtr {}

pub struct LuaInterpreter {
    state: StatePtr,
    lua: &'static LuaLibrary,
}

impl LuaInterpreter {
    pub fn new(state: *mut lua_State, lua: &'static LuaLibrary) -> Self {
        LuaInterpreter {
            state: StatePtr(state),
            lua,
        }
    }

    fn frame(&self, level: c_int) -> Option<StackFrame> {
        let state = self.state.0;
        let mut ar = lua_Debug::default();
        // SAFETY: state is the module's Lua state and ar is a valid record
        unsafe {
            if (self.lua.lua_getstack)(state, level, &mut ar) == 0 {
                return None;
            }
            (self.lua.lua_getinfo)(state, c"Sln".as_ptr(), &mut ar);
        }
        Some(StackFrame {
            level: level as usize,
            kind: FrameKind::from_what(&ar.what()),
            source: ar.short_src(),
            current_line: ar.currentline,
            name: ar.name(),
            name_what: ar.namewhat(),
            line_defined: ar.linedefined,
            last_line_defined: ar.lastlinedefined,
        })
    }
}

impl ExecutionContext for LuaInterpreter {
    fn stack_frames(&self) -> Vec<StackFrame> {
        (0..).map_while(|level| self.frame(level)).collect()
    }

    fn arm_escalation_hook(&self) {
        // SAFETY: lua_sethook only stores the hook in the state
        unsafe {
            (self.lua.lua_sethook)(
                self.state.0,
                Some(crate::functions::escalation_hook),
                LUA_MASKCALL | LUA_MASKRET | LUA_MASKLINE | LUA_MASKCOUNT,
                HOOK_INSTRUCTION_COUNT,
            );
        }
    }

    fn disarm_escalation_hook(&self) {
        // SAFETY: a null hook with an empty mask removes the hook
        unsafe {
            (self.lua.lua_sethook)(self.state.0, None, 0, 0);
        }
    }
}
