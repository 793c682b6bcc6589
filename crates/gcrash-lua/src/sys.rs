//! Locating the host's Lua shared library.

use crate::error::{LuaError, LuaResult};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the Lua library location.
pub const LUA_LIBRARY_ENV: &str = "GCRASH_LUA_LIBRARY";

/// Default Lua library paths, relative to the server's working directory.
#[cfg(target_os = "linux")]
const LUA_LIB_PATHS: &[&str] = &[
    "bin/linux64/lua_shared.so",
    "garrysmod/bin/lua_shared.so",
    "bin/lua_shared.so",
    "bin/lua_shared_srv.so",
];

#[cfg(target_os = "macos")]
const LUA_LIB_PATHS: &[&str] = &[
    "GarrysMod_Signed.app/Contents/MacOS/lua_shared.dylib",
    "garrysmod/bin/lua_shared.dylib",
];

#[cfg(target_os = "windows")]
const LUA_LIB_PATHS: &[&str] = &[
    "bin\\win64\\lua_shared.dll",
    "garrysmod\\bin\\lua_shared.dll",
    "bin\\lua_shared.dll",
];

/// Find the Lua shared library path.
///
/// Search order:
/// 1. `GCRASH_LUA_LIBRARY` environment variable
/// 2. Well-known host locations relative to the working directory
pub fn find_lua_library() -> LuaResult<PathBuf> {
    find_lua_library_in(env::var_os(LUA_LIBRARY_ENV).map(PathBuf::from), Path::new("."))
}

fn find_lua_library_in(explicit: Option<PathBuf>, root: &Path) -> LuaResult<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        log::warn!(
            "{LUA_LIBRARY_ENV} points to {}, which does not exist",
            path.display()
        );
    }

    for candidate in LUA_LIB_PATHS {
        let path = root.join(candidate);
        if path.exists() {
            log::debug!("Found Lua library at {}", path.display());
            return Ok(path);
        }
    }

    Err(LuaError::LibraryNotFound(format!(
        "Could not find the Lua library. Set {LUA_LIBRARY_ENV} to its path."
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom_lua.so");
        fs::write(&explicit, b"").unwrap();

        let found = find_lua_library_in(Some(explicit.clone()), dir.path()).unwrap();
        assert_eq!(found, explicit);
    }

    #[test]
    fn test_falls_back_to_known_locations() {
        let dir = tempfile::tempdir().unwrap();
        let known = dir.path().join(LUA_LIB_PATHS[0]);
        fs::create_dir_all(known.parent().unwrap()).unwrap();
        fs::write(&known, b"").unwrap();

        let missing = dir.path().join("nope.so");
        let found = find_lua_library_in(Some(missing), dir.path()).unwrap();
        assert_eq!(found, known);
    }

    #[test]
    fn test_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = find_lua_library_in(None, dir.path());
        assert!(matches!(result, Err(LuaError::LibraryNotFound(_))));
    }
}
