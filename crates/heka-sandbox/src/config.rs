//! Plugin configuration parsing: the Lua-table config text spec.md's
//! Plugin Config table describes (`memory_limit`/`instruction_limit`/
//! `output_limit`/`path`/`cpath`/`remove_entries`/`disable_modules`/
//! `log_level`/`restricted_headers`) evaluated once through a throwaway VM
//! and read back into a typed struct, the way `heka_sandbox_init`
//! evaluates the config text before the plugin's own VM is restricted.

use std::collections::HashMap;

use mlua::{Lua, Table, Value};
use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// Parsed form of a plugin's Lua-table configuration. `Serialize`/
/// `Deserialize` back the JSON round-trip tests exercise; the Lua-table
/// form is read by [`PluginConfig::parse`], not through a serde-mlua
/// bridge, since the source of truth is the Lua table the sandboxed VM
/// itself would evaluate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub path: Option<String>,
    pub cpath: Option<String>,
    /// `module name -> entry names to remove`, e.g. `{os = {"execute"}}`.
    pub remove_entries: HashMap<String, Vec<String>>,
    /// Module names to remove entirely, e.g. `{"io", "os"}`.
    pub disable_modules: Vec<String>,
    pub log_level: Option<String>,
    pub restricted_headers: Vec<String>,
}

impl PluginConfig {
    /// Evaluates `expr` (a Lua table constructor) in a throwaway VM and
    /// reads the recognized keys off the result. Unrecognized keys (the
    /// quota fields `SandboxConfig` reads from the same table, `Logger`/
    /// `Hostname`/`Pid`) are left for their own readers.
    pub fn parse(expr: &str) -> Result<Self, SandboxError> {
        let lua = Lua::new();
        let value: Value = lua.load(expr).eval().map_err(SandboxError::Lua)?;
        let Value::Table(table) = value else {
            return Err(SandboxError::Lua(mlua::Error::RuntimeError("plugin config must evaluate to a table".to_string())));
        };
        Self::from_table(&table).map_err(SandboxError::Lua)
    }

    fn from_table(table: &Table) -> mlua::Result<Self> {
        let mut config = PluginConfig { path: table.get("path")?, cpath: table.get("cpath")?, log_level: table.get("log_level")?, ..Default::default() };

        if let Ok(re) = table.get::<Table>("remove_entries") {
            for pair in re.pairs::<String, Table>() {
                let (module, entries) = pair?;
                let names: Vec<String> = entries.sequence_values::<String>().collect::<mlua::Result<_>>()?;
                config.remove_entries.insert(module, names);
            }
        }
        if let Ok(dm) = table.get::<Table>("disable_modules") {
            config.disable_modules = dm.sequence_values::<String>().collect::<mlua::Result<_>>()?;
        }
        if let Ok(rh) = table.get::<Table>("restricted_headers") {
            config.restricted_headers = rh.sequence_values::<String>().collect::<mlua::Result<_>>()?;
        }
        Ok(config)
    }

    /// The configured log level, if any, mapped onto [`heka_util::log::LogLevel`].
    pub fn log_level(&self) -> Option<heka_util::log::LogLevel> {
        use heka_util::log::LogLevel;
        match self.log_level.as_deref()?.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "fatal" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_cpath_and_log_level() {
        let config = PluginConfig::parse(r#"{path = "/a/?.lua", cpath = "/a/?.so", log_level = "warn"}"#).unwrap();
        assert_eq!(config.path.as_deref(), Some("/a/?.lua"));
        assert_eq!(config.cpath.as_deref(), Some("/a/?.so"));
        assert_eq!(config.log_level(), Some(heka_util::log::LogLevel::Warn));
    }

    #[test]
    fn parses_remove_entries_disable_modules_and_restricted_headers() {
        let config = PluginConfig::parse(
            r#"{
                remove_entries = { os = {"execute", "remove"} },
                disable_modules = {"io"},
                restricted_headers = {"Uuid", "Timestamp"},
            }"#,
        )
        .unwrap();
        assert_eq!(config.remove_entries.get("os"), Some(&vec!["execute".to_string(), "remove".to_string()]));
        assert_eq!(config.disable_modules, vec!["io".to_string()]);
        assert_eq!(config.restricted_headers, vec!["Uuid".to_string(), "Timestamp".to_string()]);
    }

    #[test]
    fn round_trips_through_json() {
        let config = PluginConfig::parse(r#"{path = "/a/?.lua", disable_modules = {"io"}}"#).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: PluginConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn non_table_config_is_rejected() {
        assert!(PluginConfig::parse("42").is_err());
    }
}
