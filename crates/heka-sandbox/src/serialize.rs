//! Global-state preservation: dumps the plugin's non-stdlib globals to a
//! Lua source file that, when run against a fresh VM, reconstructs them.
//!
//! Grounded in `lsb_serialize.c`'s table-by-reference approach (each table
//! gets a numbered local so shared and cyclic references serialize once and
//! re-link instead of being duplicated or looping forever) and its
//! `_PRESERVATION_VERSION` guard, which lets a plugin refuse to restore data
//! written by an incompatible version of itself.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::path::Path;

use mlua::{Lua, Table, Value};

use crate::error::SandboxError;

/// Globals that belong to the Lua standard library or to the host API
/// surface this sandbox injects, never to plugin-authored state. Excluded
/// from preservation so restoring never clobbers the restricted stdlib or
/// re-creates a stale copy of a host function.
const NON_PRESERVED: &[&str] = &[
    "string", "table", "math", "os", "io", "debug", "utf8", "bit32", "_G", "_VERSION", "assert", "error", "ipairs",
    "next", "pairs", "pcall", "rawget", "rawlen", "rawset", "select", "setmetatable", "tonumber", "tostring", "type",
    "xpcall", "unpack", "coroutine", "collectgarbage", "dofile", "getmetatable", "load", "loadfile", "loadstring",
    "newproxy", "print", "rawequal", "require", "package", "warn", "output", "add_to_payload", "read_message",
    "decode_message", "encode_message", "inject_message", "inject_payload", "update_checkpoint",
    "create_message_matcher", "create_stream_reader", "_PRESERVATION_VERSION",
];

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "0/0".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "1/0".to_string() } else { "-1/0".to_string() }
    } else {
        format!("{n}")
    }
}

fn quote_lua_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0..=8 | 11 | 12 | 14..=31 | 127..=255 => out.push_str(&format!("\\{b}")),
            _ => out.push(b as char),
        }
    }
    out.push('"');
    out
}

struct Serializer {
    seen: HashMap<*const c_void, String>,
    decls: Vec<String>,
    counter: usize,
}

impl Serializer {
    fn new() -> Self {
        Serializer { seen: HashMap::new(), decls: Vec::new(), counter: 0 }
    }

    fn value_expr(&mut self, v: &Value) -> mlua::Result<String> {
        Ok(match v {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => quote_lua_string(&s.as_bytes()),
            Value::Table(t) => self.table_ref(t)?,
            // functions, userdata, threads carry no serializable state.
            _ => "nil".to_string(),
        })
    }

    fn table_ref(&mut self, t: &Table) -> mlua::Result<String> {
        let ptr = t.to_pointer();
        if let Some(name) = self.seen.get(&ptr) {
            return Ok(name.clone());
        }
        let name = format!("t{}", self.counter);
        self.counter += 1;
        self.seen.insert(ptr, name.clone());
        self.decls.push(format!("local {name} = {{}}\n"));

        let mut entries = Vec::new();
        t.for_each(|k: Value, v: Value| {
            entries.push((k, v));
            Ok(())
        })?;
        for (k, v) in entries {
            let kexpr = match &k {
                Value::String(s) => format!("[{}]", quote_lua_string(&s.as_bytes())),
                Value::Integer(i) => format!("[{i}]"),
                Value::Number(n) => format!("[{}]", format_number(*n)),
                _ => continue, // boolean/table/function keys: skip, matches the original's string/number-only key support
            };
            let vexpr = self.value_expr(&v)?;
            self.decls.push(format!("{name}{kexpr} = {vexpr}\n"));
        }
        Ok(name)
    }
}

/// Serializes every non-stdlib global to `path`. Any error leaves no file
/// behind (a partially-written state file is worse than none).
pub fn preserve(lua: &Lua, path: &Path) -> Result<(), SandboxError> {
    let globals = lua.globals();

    let version: i64 = match globals.get::<Value>("_PRESERVATION_VERSION") {
        Ok(Value::Integer(i)) => i,
        Ok(Value::Number(n)) => n as i64,
        _ => 0,
    };

    let mut ser = Serializer::new();
    let mut assigns = Vec::new();
    let mut plugin_globals = Vec::new();
    globals
        .for_each(|k: String, v: Value| {
            plugin_globals.push((k, v));
            Ok(())
        })
        .map_err(SandboxError::Lua)?;

    for (name, value) in plugin_globals {
        if NON_PRESERVED.contains(&name.as_str()) || matches!(value, Value::Function(_) | Value::UserData(_) | Value::Thread(_)) {
            continue;
        }
        let expr = ser.value_expr(&value).map_err(SandboxError::Lua)?;
        assigns.push(format!("_G[{}] = {expr}\n", quote_lua_string(name.as_bytes())));
    }

    let mut src = String::new();
    src.push_str(&format!("if _PRESERVATION_VERSION and _PRESERVATION_VERSION ~= {version} then return end\n"));
    for decl in ser.decls {
        src.push_str(&decl);
    }
    for assign in assigns {
        src.push_str(&assign);
    }

    if let Err(e) = fs::write(path, src) {
        let _ = fs::remove_file(path);
        return Err(SandboxError::Io(e));
    }
    Ok(())
}

/// Runs a previously-preserved state file against `lua`. A missing file is
/// not an error — there is simply nothing to restore on a first run.
pub fn restore(lua: &Lua, path: &Path) -> Result<(), SandboxError> {
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SandboxError::Io(e)),
    };
    lua.load(src).set_name(format!("@{}", path.display())).exec().map_err(SandboxError::Lua)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars_and_nested_tables() {
        let lua = Lua::new();
        lua.load(
            r#"
            counter = 42
            name = "hello \"world\""
            nested = { a = 1, b = { c = "deep" } }
            "#,
        )
        .exec()
        .unwrap();

        let dir = std::env::temp_dir().join(format!("heka-sandbox-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.lua");

        preserve(&lua, &path).unwrap();

        let lua2 = Lua::new();
        restore(&lua2, &path).unwrap();
        let counter: i64 = lua2.globals().get("counter").unwrap();
        let name: String = lua2.globals().get("name").unwrap();
        let nested: Table = lua2.globals().get("nested").unwrap();
        assert_eq!(counter, 42);
        assert_eq!(name, "hello \"world\"");
        assert_eq!(nested.get::<i64>("a").unwrap(), 1);
        let inner: Table = nested.get("b").unwrap();
        assert_eq!(inner.get::<String>("c").unwrap(), "deep");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn shared_table_reference_is_not_duplicated() {
        let lua = Lua::new();
        lua.load("shared = {}; a = { shared }; b = { shared }").exec().unwrap();
        let dir = std::env::temp_dir().join(format!("heka-sandbox-test-shared-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.lua");
        preserve(&lua, &path).unwrap();
        let src = std::fs::read_to_string(&path).unwrap();
        // exactly one `local tN = {}` per distinct table identity: 3 tables total (a, b, shared).
        assert_eq!(src.matches("= {}").count(), 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_state_file_is_not_an_error() {
        let lua = Lua::new();
        let path = std::env::temp_dir().join("heka-sandbox-test-missing-nonexistent.lua");
        std::fs::remove_file(&path).ok();
        restore(&lua, &path).unwrap();
    }

    #[test]
    fn version_mismatch_skips_restoration() {
        let lua = Lua::new();
        lua.load("x = 1").exec().unwrap();
        let dir = std::env::temp_dir().join(format!("heka-sandbox-test-version-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.lua");
        preserve(&lua, &path).unwrap();

        let lua2 = Lua::new();
        lua2.load("_PRESERVATION_VERSION = 2").exec().unwrap();
        restore(&lua2, &path).unwrap();
        let x: Option<i64> = lua2.globals().get("x").unwrap();
        assert_eq!(x, None);
        std::fs::remove_dir_all(&dir).ok();
    }
}
