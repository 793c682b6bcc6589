//! Lua function bindings loaded at runtime.

use crate::error::{LuaError, LuaResult};
use crate::types::*;
use libloading::{Library, Symbol};
use once_cell::sync::OnceCell;
use std::ffi::{CString, c_void};
use std::os::raw::{c_char, c_int};
use std::path::Path;

/// Global Lua library instance.
static LUA_LIBRARY: OnceCell<LuaLibrary> = OnceCell::new();

/// Container for the loaded Lua library and function pointers.
pub struct LuaLibrary {
    _library: Library,

    // Debug interface
    pub lua_getstack: unsafe extern "C-unwind" fn(*mut lua_State, c_int, *mut lua_Debug) -> c_int,
    pub lua_getinfo:
        unsafe extern "C-unwind" fn(*mut lua_State, *const c_char, *mut lua_Debug) -> c_int,
    pub lua_sethook: unsafe extern "C-unwind" fn(*mut lua_State, lua_Hook, c_int, c_int) -> c_int,

    // Calls
    pub lua_pcall: unsafe extern "C-unwind" fn(*mut lua_State, c_int, c_int, c_int) -> c_int,

    // Stack manipulation
    pub lua_gettop: unsafe extern "C-unwind" fn(*mut lua_State) -> c_int,
    pub lua_settop: unsafe extern "C-unwind" fn(*mut lua_State, c_int),
    pub lua_pushvalue: unsafe extern "C-unwind" fn(*mut lua_State, c_int),

    // Push functions
    pub lua_pushlightuserdata: unsafe extern "C-unwind" fn(*mut lua_State, *mut c_void),
    pub lua_pushcclosure: unsafe extern "C-unwind" fn(*mut lua_State, lua_CFunction, c_int),
    pub lua_pushstring: unsafe extern "C-unwind" fn(*mut lua_State, *const c_char),
    pub lua_pushnumber: unsafe extern "C-unwind" fn(*mut lua_State, lua_Number),

    // Access functions
    pub lua_type: unsafe extern "C-unwind" fn(*mut lua_State, c_int) -> c_int,
    pub lua_tolstring: unsafe extern "C-unwind" fn(*mut lua_State, c_int, *mut usize) -> *const c_char,
    pub lua_tointeger: unsafe extern "C-unwind" fn(*mut lua_State, c_int) -> lua_Integer,
    pub lua_touserdata: unsafe extern "C-unwind" fn(*mut lua_State, c_int) -> *mut c_void,

    // Tables
    pub lua_createtable: unsafe extern "C-unwind" fn(*mut lua_State, c_int, c_int),
    pub lua_getfield: unsafe extern "C-unwind" fn(*mut lua_State, c_int, *const c_char),
    pub lua_setfield: unsafe extern "C-unwind" fn(*mut lua_State, c_int, *const c_char),
    pub lua_rawgeti: unsafe extern "C-unwind" fn(*mut lua_State, c_int, c_int),

    // Auxiliary library references
    pub lual_ref: unsafe extern "C-unwind" fn(*mut lua_State, c_int) -> c_int,
    pub lual_unref: unsafe extern "C-unwind" fn(*mut lua_State, c_int, c_int),
}

// Safety: LuaLibrary only holds function pointers into a library that stays
// loaded for the lifetime of the process. Callers are responsible for the
// thread discipline of the lua_State they pass in.
unsafe impl Send for LuaLibrary {}
unsafe impl Sync for LuaLibrary {}

impl LuaLibrary {
    /// Load the Lua library from the given path.
    ///
    /// The host has normally loaded this library already, in which case the
    /// loader hands back the existing mapping and no second copy of the
    /// interpreter is created.
    pub fn load(library_path: &Path) -> LuaResult<Self> {
        unsafe {
            #[cfg(unix)]
            let library = {
                use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
                let unix_lib = UnixLibrary::open(Some(library_path), RTLD_NOW | RTLD_GLOBAL)
                    .map_err(|e| LuaError::LibraryNotFound(e.to_string()))?;
                Library::from(unix_lib)
            };

            #[cfg(windows)]
            let library = Library::new(library_path)
                .map_err(|e| LuaError::LibraryNotFound(e.to_string()))?;

            macro_rules! load_symbol {
                ($name:ident, $sym:expr) => {
                    let $name: Symbol<_> = library.get($sym).map_err(|_| {
                        LuaError::FunctionNotFound(
                            String::from_utf8_lossy(&$sym[..$sym.len() - 1]).to_string(),
                        )
                    })?;
                    let $name = *$name;
                };
            }

            load_symbol!(lua_getstack, b"lua_getstack\0");
            load_symbol!(lua_getinfo, b"lua_getinfo\0");
            load_symbol!(lua_sethook, b"lua_sethook\0");

            load_symbol!(lua_pcall, b"lua_pcall\0");

            load_symbol!(lua_gettop, b"lua_gettop\0");
            load_symbol!(lua_settop, b"lua_settop\0");
            load_symbol!(lua_pushvalue, b"lua_pushvalue\0");

            load_symbol!(lua_pushlightuserdata, b"lua_pushlightuserdata\0");
            load_symbol!(lua_pushcclosure, b"lua_pushcclosure\0");
            load_symbol!(lua_pushstring, b"lua_pushstring\0");
            load_symbol!(lua_pushnumber, b"lua_pushnumber\0");

            load_symbol!(lua_type, b"lua_type\0");
            load_symbol!(lua_tolstring, b"lua_tolstring\0");
            load_symbol!(lua_tointeger, b"lua_tointeger\0");
            load_symbol!(lua_touserdata, b"lua_touserdata\0");

            load_symbol!(lua_createtable, b"lua_createtable\0");
            load_symbol!(lua_getfield, b"lua_getfield\0");
            load_symbol!(lua_setfield, b"lua_setfield\0");
            load_symbol!(lua_rawgeti, b"lua_rawgeti\0");

            load_symbol!(lual_ref, b"luaL_ref\0");
            load_symbol!(lual_unref, b"luaL_unref\0");

            log::debug!("Resolved Lua C API from {}", library_path.display());

            Ok(LuaLibrary {
                _library: library,
                lua_getstack,
                lua_getinfo,
                lua_sethook,
                lua_pcall,
                lua_gettop,
                lua_settop,
                lua_pushvalue,
                lua_pushlightuserdata,
                lua_pushcclosure,
                lua_pushstring,
                lua_pushnumber,
                lua_type,
                lua_tolstring,
                lua_tointeger,
                lua_touserdata,
                lua_createtable,
                lua_getfield,
                lua_setfield,
                lua_rawgeti,
                lual_ref,
                lual_unref,
            })
        }
    }

    /// Type of the value at `index`.
    ///
    /// # Safety
    /// `state` must be a valid Lua state.
    pub unsafe fn type_of(&self, state: *mut lua_State, index: c_int) -> LuaType {
        LuaType::from_raw(unsafe { (self.lua_type)(state, index) })
    }

    /// Copy the string (or number) at `index`, if it is one.
    ///
    /// # Safety
    /// `state` must be a valid Lua state.
    pub unsafe fn to_string(&self, state: *mut lua_State, index: c_int) -> Option<String> {
        let mut len = 0usize;
        let ptr = unsafe { (self.lua_tolstring)(state, index, &mut len) };
        if ptr.is_null() {
            return None;
        }
        // SAFETY: lua_tolstring returned a buffer of exactly `len` bytes
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Push a Rust string, truncating at the first interior NUL.
    ///
    /// # Safety
    /// `state` must be a valid Lua state.
    pub unsafe fn push_str(&self, state: *mut lua_State, value: &str) {
        let value = value.split('\0').next().unwrap_or_default();
        let Ok(cstring) = CString::new(value) else {
            return;
        };
        unsafe { (self.lua_pushstring)(state, cstring.as_ptr()) }
    }

    /// Read `table[key]` onto the stack (`lua_getfield`).
    ///
    /// # Safety
    /// `state` must be a valid Lua state and `index` a valid stack index.
    pub unsafe fn get_field(&self, state: *mut lua_State, index: c_int, key: &str) {
        let Ok(key) = CString::new(key) else {
            return;
        };
        unsafe { (self.lua_getfield)(state, index, key.as_ptr()) }
    }

    /// Pop a value and store it as `table[key]` (`lua_setfield`).
    ///
    /// # Safety
    /// `state` must be a valid Lua state with a value on top of the stack.
    pub unsafe fn set_field(&self, state: *mut lua_State, index: c_int, key: &str) {
        let Ok(key) = CString::new(key) else {
            return;
        };
        unsafe { (self.lua_setfield)(state, index, key.as_ptr()) }
    }

    /// Store a C function as `table[key]`, where the table is on top of the stack.
    ///
    /// # Safety
    /// `state` must be a valid Lua state with a table on top of the stack.
    pub unsafe fn set_cfunction(&self, state: *mut lua_State, key: &str, function: lua_CFunction) {
        unsafe {
            (self.lua_pushcclosure)(state, function, 0);
            self.set_field(state, -2, key);
        }
    }
}

/// Initialize the global Lua library.
pub fn init_lua_library(library_path: &Path) -> LuaResult<()> {
    if LUA_LIBRARY.get().is_some() {
        return Err(LuaError::AlreadyInitialized);
    }
    LUA_LIBRARY
        .set(LuaLibrary::load(library_path)?)
        .map_err(|_| LuaError::AlreadyInitialized)
}

/// Get a reference to the global Lua library.
pub fn lua_library() -> LuaResult<&'static LuaLibrary> {
    LUA_LIBRARY.get().ok_or(LuaError::NotInitialized)
}
