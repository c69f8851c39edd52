//! Stdlib capability restriction. Applied once, right after the VM is
//! created and before the plugin script is loaded, so a script never
//! observes the unrestricted globals.

use mlua::{Lua, Value};

use crate::config::PluginConfig;
use crate::Role;

/// Removed from every sandbox's globals regardless of role: anything that
/// lets a script load/execute code outside the plugin file, inspect the
/// runtime, or talk to stdout directly.
const UNIVERSAL_DENY: &[&str] =
    &["collectgarbage", "dofile", "getmetatable", "load", "loadfile", "loadstring", "newproxy", "print", "rawequal", "require"];

/// `os.*` entries removed for every role.
const OS_DENY_COMMON: &[&str] = &["getenv", "exit", "setlocale"];
/// `os.*` entries removed only for the analysis role (it never touches the
/// filesystem or subprocesses; input/output plugins may need these).
const OS_DENY_ANALYSIS_ONLY: &[&str] = &["execute", "remove", "rename", "tmpname"];
/// `string.*` entries removed for every role (bytecode dumping defeats the
/// instruction/memory quotas).
const STRING_DENY: &[&str] = &["dump"];

/// Removes the globals and submodule entries a given role must not see.
/// Input and output plugins keep `io` and `coroutine`; analysis plugins
/// lose both outright, since they never perform their own I/O.
pub fn apply(lua: &Lua, role: Role) -> mlua::Result<()> {
    let globals = lua.globals();

    for name in UNIVERSAL_DENY {
        globals.set(*name, Value::Nil)?;
    }

    if let Ok(os) = globals.get::<mlua::Table>("os") {
        for name in OS_DENY_COMMON {
            os.set(*name, Value::Nil)?;
        }
        if role == Role::Analysis {
            for name in OS_DENY_ANALYSIS_ONLY {
                os.set(*name, Value::Nil)?;
            }
        }
    }

    if let Ok(string) = globals.get::<mlua::Table>("string") {
        for name in STRING_DENY {
            string.set(*name, Value::Nil)?;
        }
    }

    if role == Role::Analysis {
        globals.set("io", Value::Nil)?;
        globals.set("coroutine", Value::Nil)?;
    }

    Ok(())
}

/// Applies a plugin's `path`/`cpath`/`remove_entries`/`disable_modules`
/// on top of the role-based restriction `apply` already performed. Call
/// after `apply` and before the plugin script is loaded, so a script never
/// observes the wider surface.
pub fn apply_plugin_config(lua: &Lua, config: &PluginConfig) -> mlua::Result<()> {
    let globals = lua.globals();

    if let Ok(package) = globals.get::<mlua::Table>("package") {
        if let Some(path) = &config.path {
            package.set("path", path.clone())?;
        }
        if let Some(cpath) = &config.cpath {
            package.set("cpath", cpath.clone())?;
        }
    }

    for module_name in &config.disable_modules {
        globals.set(module_name.as_str(), Value::Nil)?;
    }

    for (module_name, entries) in &config.remove_entries {
        if let Ok(module) = globals.get::<mlua::Table>(module_name.as_str()) {
            for entry in entries {
                module.set(entry.as_str(), Value::Nil)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(role: Role) -> Lua {
        let lua = Lua::new();
        apply(&lua, role).unwrap();
        lua
    }

    #[test]
    fn universal_functions_are_gone_in_every_role() {
        for role in [Role::Input, Role::Analysis, Role::Output] {
            let lua = vm(role);
            let is_nil: bool = lua.load("return load == nil").eval().unwrap();
            assert!(is_nil, "role {role:?} still has load()");
        }
    }

    #[test]
    fn analysis_loses_io_and_coroutine_but_others_keep_them() {
        let analysis = vm(Role::Analysis);
        let is_nil: bool = analysis.load("return io == nil and coroutine == nil").eval().unwrap();
        assert!(is_nil);

        let input = vm(Role::Input);
        let has_io: bool = input.load("return io ~= nil").eval().unwrap();
        assert!(has_io);
    }

    #[test]
    fn os_execute_only_removed_for_analysis() {
        let analysis = vm(Role::Analysis);
        let gone: bool = analysis.load("return os.execute == nil").eval().unwrap();
        assert!(gone);

        let output = vm(Role::Output);
        let present: bool = output.load("return os.execute ~= nil").eval().unwrap();
        assert!(present);
    }

    #[test]
    fn plugin_config_disables_modules_and_removes_entries() {
        let lua = vm(Role::Input);
        let config = PluginConfig::parse(r#"{disable_modules = {"coroutine"}, remove_entries = {os = {"date"}}}"#).unwrap();
        apply_plugin_config(&lua, &config).unwrap();
        let gone: bool = lua.load("return coroutine == nil and os.date == nil").eval().unwrap();
        assert!(gone);
        let kept: bool = lua.load("return os.time ~= nil").eval().unwrap();
        assert!(kept);
    }

    #[test]
    fn plugin_config_sets_package_path_and_cpath() {
        let lua = vm(Role::Input);
        let config = PluginConfig::parse(r#"{path = "/plugins/?.lua", cpath = "/plugins/?.so"}"#).unwrap();
        apply_plugin_config(&lua, &config).unwrap();
        let path: String = lua.load("return package.path").eval().unwrap();
        assert_eq!(path, "/plugins/?.lua");
    }
}
