//! Resource-constrained Lua sandbox: a VM wrapped with three quota
//! dimensions (memory, instructions, output bytes), one capability
//! dimension (stdlib restriction per plugin role), panic isolation, and
//! global-state preservation across restarts.
//!
//! Grounded in `lua_sandbox.c`'s `lsb_create`/`lsb_init`/`lsb_destroy`
//! lifecycle and `heka_sandbox/sandbox.c`'s `set_restrictions`, reworked
//! around `mlua` instead of hand-rolled `lua_State*` bookkeeping: Lua's own
//! `pcall` boundary and `mlua::Result` take the place of the C code's
//! `setjmp`/`longjmp` panic trampoline.

pub mod config;
pub mod error;
pub mod quota;
pub mod restrict;
pub mod serialize;

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use heka_util::log::{LogLevel, LogRecord, Logger, NullLogger};
use mlua::{HookTriggers, Lua, VmState};

pub use config::PluginConfig;
pub use error::SandboxError;
pub use quota::{SandboxConfig, Usage, UsageType, MAX_INSTRUCTION_LIMIT, MAX_MEMORY_LIMIT, MAX_OUTPUT_LIMIT};

/// How often the instruction hook fires. Smaller values give tighter
/// accounting at the cost of more hook invocations per call.
const INSTRUCTION_HOOK_GRANULARITY: u32 = 64;

/// The plugin role a sandbox is restricted for. Determines which stdlib
/// entries `restrict::apply` removes and which host functions the plugin
/// shell layers in on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Analysis,
    Output,
}

/// Sandbox lifecycle state, mirroring `lsb_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Unknown,
    Running,
    Terminated,
}

/// A resource-constrained Lua VM running one plugin script.
pub struct Sandbox {
    lua: Lua,
    role: Role,
    config: SandboxConfig,
    state: SandboxState,
    error_message: Option<String>,
    instruction_ticks: Rc<Cell<u64>>,
    instruction_max: u64,
    memory_max: usize,
    logger: Rc<dyn Logger>,
}

impl Sandbox {
    /// Creates and restricts a fresh VM with no logger attached. Does not
    /// yet load the plugin script — call [`Sandbox::init`] for that.
    pub fn create(role: Role, config: SandboxConfig) -> Result<Self, SandboxError> {
        Self::create_with_logger(role, config, Rc::new(NullLogger))
    }

    /// Same as [`Sandbox::create`], but quota breaches and termination are
    /// reported to `logger` as structured records (component `"sandbox"`).
    pub fn create_with_logger(role: Role, config: SandboxConfig, logger: Rc<dyn Logger>) -> Result<Self, SandboxError> {
        let config = config.normalize().ok_or(SandboxError::ConfigOutOfRange)?;
        let lua = Lua::new();
        restrict::apply(&lua, role)?;
        Ok(Sandbox {
            lua,
            role,
            config,
            state: SandboxState::Unknown,
            error_message: None,
            instruction_ticks: Rc::new(Cell::new(0)),
            instruction_max: 0,
            memory_max: 0,
            logger,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Layers a plugin's `path`/`cpath`/`remove_entries`/`disable_modules`
    /// on top of the role-based restriction already applied at
    /// construction. Call before [`Sandbox::init`].
    pub fn apply_plugin_config(&self, config: &PluginConfig) -> Result<(), SandboxError> {
        Ok(restrict::apply_plugin_config(&self.lua, config)?)
    }

    /// The normalized `output_limit` this sandbox was created with.
    pub fn output_limit(&self) -> usize {
        self.config.output_limit
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Loads and runs `script`, then restores preserved global state from
    /// `state_file` (if given and present). On failure the sandbox
    /// transitions to `Terminated` and the error is both returned and
    /// recorded in `error_message`.
    pub fn init(&mut self, script: &str, chunk_name: &str, state_file: Option<&Path>) -> Result<(), SandboxError> {
        self.lua.set_memory_limit(self.config.memory_limit)?;
        self.install_instruction_hook();

        let result = self.lua.load(script).set_name(chunk_name).exec();
        if let Err(e) = result {
            return self.terminate_with(e.to_string());
        }
        let _ = self.lua.gc_collect();
        self.sync_usage_maxima();

        if let Some(path) = state_file {
            self.lua.set_memory_limit(usize::MAX)?;
            let restored = serialize::restore(&self.lua, path);
            self.lua.set_memory_limit(self.config.memory_limit)?;
            if let Err(e) = restored {
                return self.terminate_with(e.to_string());
            }
        }

        self.state = SandboxState::Running;
        Ok(())
    }

    fn install_instruction_hook(&mut self) {
        let ticks = Rc::clone(&self.instruction_ticks);
        let limit = self.config.instruction_limit as u64;
        self.lua.set_hook(HookTriggers::default().every_nth_instruction(INSTRUCTION_HOOK_GRANULARITY), move |_lua, _debug| {
            let next = ticks.get() + INSTRUCTION_HOOK_GRANULARITY as u64;
            ticks.set(next);
            if limit != 0 && next > limit {
                return Err(mlua::Error::RuntimeError("instruction_limit exceeded".to_string()));
            }
            Ok(VmState::Continue)
        });
    }

    fn terminate_with(&mut self, message: String) -> Result<(), SandboxError> {
        self.log(LogLevel::Error, message.clone(), serde_json::Value::Null);
        self.error_message = Some(message.clone());
        self.state = SandboxState::Terminated;
        Err(SandboxError::Lua(mlua::Error::RuntimeError(message)))
    }

    /// Shuts the sandbox down due to a fatal error (quota breach, invalid
    /// plugin contract, or an explicit error status from the plugin).
    pub fn terminate(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.log(LogLevel::Error, reason.clone(), serde_json::Value::Null);
        self.error_message = Some(reason);
        self.state = SandboxState::Terminated;
    }

    fn log(&self, level: LogLevel, message: String, fields: serde_json::Value) {
        self.logger.log(LogRecord { level, component: "sandbox", message, fields });
    }

    fn sync_usage_maxima(&mut self) {
        self.instruction_ticks.set(0);
        let mem = self.lua.used_memory();
        if mem > self.memory_max {
            self.memory_max = mem;
        }
    }

    /// Re-arms the instruction hook and resets its counter. Call before
    /// every `process_message`/`timer_event` invocation, matching
    /// `lsb_pcall_setup`.
    pub fn pcall_setup(&mut self) {
        self.instruction_ticks.set(0);
        self.install_instruction_hook();
    }

    /// Updates usage high-water marks after a call completes, matching
    /// `lsb_pcall_teardown`.
    pub fn pcall_teardown(&mut self) {
        let used = self.instruction_ticks.get();
        if used > self.instruction_max {
            self.instruction_max = used;
        }
        let mem = self.lua.used_memory();
        if mem > self.memory_max {
            self.memory_max = mem;
        }
    }

    pub fn usage(&self, utype: UsageType) -> Usage {
        match utype {
            UsageType::Memory => {
                Usage { limit: self.config.memory_limit as u64, current: self.lua.used_memory() as u64, maximum: self.memory_max as u64 }
            }
            UsageType::Instruction => {
                Usage { limit: self.config.instruction_limit as u64, current: self.instruction_ticks.get(), maximum: self.instruction_max }
            }
            UsageType::Output => Usage { limit: self.config.output_limit as u64, current: 0, maximum: 0 },
        }
    }

    /// Preserves global state to `state_file` (if given) and tears the VM
    /// down. Quotas are lifted for the duration of preservation so a
    /// near-the-limit plugin can still save its state on shutdown.
    pub fn destroy(mut self, state_file: Option<&Path>) -> Result<(), SandboxError> {
        if let Some(path) = state_file {
            self.lua.remove_hook();
            self.lua.set_memory_limit(usize::MAX)?;
            let result = serialize::preserve(&self.lua, path);
            self.state = SandboxState::Terminated;
            result?;
        } else {
            self.state = SandboxState::Terminated;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(role: Role) -> Sandbox {
        Sandbox::create(role, SandboxConfig::default()).unwrap()
    }

    #[test]
    fn runs_a_trivial_script() {
        let mut sb = sandbox(Role::Analysis);
        sb.init("x = 1 + 1", "test", None).unwrap();
        assert_eq!(sb.state(), SandboxState::Running);
        let x: i64 = sb.lua().globals().get("x").unwrap();
        assert_eq!(x, 2);
    }

    #[test]
    fn syntax_error_terminates_the_sandbox() {
        let mut sb = sandbox(Role::Analysis);
        let err = sb.init("this is not lua(", "test", None);
        assert!(err.is_err());
        assert_eq!(sb.state(), SandboxState::Terminated);
        assert!(sb.error_message().is_some());
    }

    #[test]
    fn instruction_quota_terminates_a_runaway_loop() {
        let config = SandboxConfig { instruction_limit: 1000, ..SandboxConfig::default() };
        let mut sb = Sandbox::create(Role::Analysis, config).unwrap();
        let err = sb.init("local i = 0; while true do i = i + 1 end", "test", None);
        assert!(err.is_err());
        assert_eq!(sb.state(), SandboxState::Terminated);
    }

    #[test]
    fn zero_instruction_limit_means_unlimited() {
        let config = SandboxConfig { instruction_limit: 0, ..SandboxConfig::default() };
        let mut sb = Sandbox::create(Role::Analysis, config).unwrap();
        sb.init("local i = 0; for j = 1, 100000 do i = i + 1 end", "test", None).unwrap();
        assert_eq!(sb.state(), SandboxState::Running);
    }

    #[test]
    fn memory_quota_terminates_runaway_allocation() {
        let config = SandboxConfig { memory_limit: 64 * 1024, instruction_limit: MAX_INSTRUCTION_LIMIT, ..SandboxConfig::default() };
        let mut sb = Sandbox::create(Role::Analysis, config).unwrap();
        let err = sb.init("local t = {}; for i = 1, 1000000 do t[i] = string.rep('x', 64) end", "test", None);
        assert!(err.is_err());
        assert_eq!(sb.state(), SandboxState::Terminated);
    }

    #[test]
    fn out_of_range_config_is_rejected() {
        let config = SandboxConfig { memory_limit: MAX_MEMORY_LIMIT + 1, ..SandboxConfig::default() };
        assert!(Sandbox::create(Role::Input, config).is_err());
    }

    #[test]
    fn state_round_trips_through_destroy_and_init() {
        let dir = std::env::temp_dir().join(format!("heka-sandbox-lifecycle-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.lua");

        let mut sb = sandbox(Role::Analysis);
        sb.init("counter = 41; counter = counter + 1", "test", None).unwrap();
        sb.destroy(Some(&path)).unwrap();

        let mut sb2 = sandbox(Role::Analysis);
        sb2.init("", "test", Some(&path)).unwrap();
        let counter: i64 = sb2.lua().globals().get("counter").unwrap();
        assert_eq!(counter, 42);

        std::fs::remove_dir_all(&dir).ok();
    }
}
