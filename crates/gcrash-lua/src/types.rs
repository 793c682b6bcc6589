//! Lua type definitions.
//!
//! These types mirror the Lua 5.1 (and LuaJIT) C headers.

#![allow(non_camel_case_types)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

/// Lua's interpreter state (opaque).
#[repr(C)]
pub struct lua_State {
    _private: [u8; 0],
}

/// Signature of a C function callable from Lua.
pub type lua_CFunction = unsafe extern "C-unwind" fn(state: *mut lua_State) -> c_int;

/// Signature of a debug hook installed with `lua_sethook`.
pub type lua_Hook = Option<unsafe extern "C-unwind" fn(state: *mut lua_State, ar: *mut lua_Debug)>;

/// Integer type used by `lua_tointeger` / `lua_pushinteger`.
pub type lua_Integer = isize;

/// Number type used by `lua_pushnumber`.
pub type lua_Number = f64;

/// Size of `lua_Debug::short_src`.
pub const LUA_IDSIZE: usize = 60;

/// Pseudo-index of the registry table.
pub const LUA_REGISTRYINDEX: c_int = -10000;

/// Pseudo-index of the globals table.
pub const LUA_GLOBALSINDEX: c_int = -10002;

/// `lua_pcall` success status.
pub const LUA_OK: c_int = 0;

/// Hook mask bits.
pub const LUA_MASKCALL: c_int = 1 << 0;
pub const LUA_MASKRET: c_int = 1 << 1;
pub const LUA_MASKLINE: c_int = 1 << 2;
pub const LUA_MASKCOUNT: c_int = 1 << 3;

/// Type tags returned by `lua_type`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaType {
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

impl LuaType {
    /// Convert a raw `lua_type` result.
    pub fn from_raw(tag: c_int) -> Self {
        match tag {
            0 => LuaType::Nil,
            1 => LuaType::Boolean,
            2 => LuaType::LightUserdata,
            3 => LuaType::Number,
            4 => LuaType::String,
            5 => LuaType::Table,
            6 => LuaType::Function,
            7 => LuaType::Userdata,
            8 => LuaType::Thread,
            _ => LuaType::None,
        }
    }
}

/// Pseudo-index of the `i`-th upvalue of the running C closure.
pub const fn lua_upvalueindex(i: c_int) -> c_int {
    LUA_GLOBALSINDEX - i
}

/// Activation record filled by `lua_getstack` / `lua_getinfo`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct lua_Debug {
    pub event: c_int,
    /// (n)
    pub name: *const c_char,
    /// (n) "global", "local", "field", "method"
    pub namewhat: *const c_char,
    /// (S) "Lua", "C", "main", "tail"
    pub what: *const c_char,
    /// (S)
    pub source: *const c_char,
    /// (l)
    pub currentline: c_int,
    /// (u)
    pub nups: c_int,
    /// (S)
    pub linedefined: c_int,
    /// (S)
    pub lastlinedefined: c_int,
    /// (S)
    pub short_src: [c_char; LUA_IDSIZE],
    /// Private to the interpreter.
    i_ci: c_int,
}

impl Default for lua_Debug {
    fn default() -> Self {
        lua_Debug {
            event: 0,
            name: std::ptr::null(),
            namewhat: std::ptr::null(),
            what: std::ptr::null(),
            source: std::ptr::null(),
            currentline: -1,
            nups: 0,
            linedefined: -1,
            lastlinedefined: -1,
            short_src: [0; LUA_IDSIZE],
            i_ci: 0,
        }
    }
}

impl lua_Debug {
    /// `name`, if the interpreter could find one.
    pub fn name(&self) -> Option<String> {
        unsafe { c_str(self.name) }
    }

    /// `namewhat`, or `None` when empty.
    pub fn namewhat(&self) -> Option<String> {
        unsafe { c_str(self.namewhat) }.filter(|s| !s.is_empty())
    }

    /// `what`, or an empty string.
    pub fn what(&self) -> String {
        unsafe { c_str(self.what) }.unwrap_or_default()
    }

    /// Printable source locator.
    pub fn short_src(&self) -> String {
        // short_src is always NUL terminated within LUA_IDSIZE
        let bytes: Vec<u8> = self
            .short_src
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Copy a possibly-null C string.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: The caller guarantees ptr is NUL terminated
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn fill_short_src(ar: &mut lua_Debug, src: &str) {
        for (slot, byte) in ar.short_src.iter_mut().zip(src.bytes()) {
            *slot = byte as c_char;
        }
    }

    #[test]
    fn test_upvalue_index() {
        assert_eq!(lua_upvalueindex(1), -10003);
        assert_eq!(lua_upvalueindex(2), -10004);
    }

    #[test]
    fn test_type_from_raw() {
        assert_eq!(LuaType::from_raw(6), LuaType::Function);
        assert_eq!(LuaType::from_raw(0), LuaType::Nil);
        assert_eq!(LuaType::from_raw(-1), LuaType::None);
        assert_eq!(LuaType::from_raw(42), LuaType::None);
    }

    #[test]
    fn test_debug_accessors() {
        let name = CString::new("think").unwrap();
        let namewhat = CString::new("").unwrap();
        let what = CString::new("Lua").unwrap();

        let mut ar = lua_Debug {
            name: name.as_ptr(),
            namewhat: namewhat.as_ptr(),
            what: what.as_ptr(),
            ..Default::default()
        };
        fill_short_src(&mut ar, "addons/foo/lua/init.lua");

        assert_eq!(ar.name().as_deref(), Some("think"));
        assert_eq!(ar.namewhat(), None, "empty namewhat should be None");
        assert_eq!(ar.what(), "Lua");
        assert_eq!(ar.short_src(), "addons/foo/lua/init.lua");
    }

    #[test]
    fn test_debug_defaults_are_empty() {
        let ar = lua_Debug::default();
        assert_eq!(ar.name(), None);
        assert_eq!(ar.namewhat(), None);
        assert_eq!(ar.what(), "");
        assert_eq!(ar.short_src(), "");
    }
}
