//! Plugin dispatch shell: wraps a [`heka_sandbox::Sandbox`] with the three
//! Heka plugin roles (input, analysis, output), each a thin state machine
//! around `process_message`/`timer_event` invocation discipline, injected
//! message draining, and running statistics.
//!
//! Grounded in `heka_sandbox/sandbox.c`'s `lsb_heka_create_input/_analysis/
//! _output` and `process_message`/`lsb_heka_timer_event`, with the
//! `lsb_heka_stats` counters carried over via [`heka_util::RunningStats`].

pub mod error;
pub mod host;
pub mod table_codec;

use std::rc::Rc;

use heka_sandbox::{Role, Sandbox, SandboxConfig, SandboxState};
use heka_util::log::{LogLevel, LogRecord, Logger, NullLogger};
use heka_util::{monotonic_nanos, RunningStats};
use mlua::{Function, Value};

pub use error::PluginError;
pub use host::{CheckpointUpdate, Injected};

/// The "shutting down" sentinel: when a plugin's `process_message` raises
/// this exact error from inside an input role's synchronization barrier,
/// it is reported as a clean success rather than a fatal failure.
const SHUTTING_DOWN: &str = "shutting down";

/// Matches `msg`'s first line (before mlua's appended stack traceback)
/// against the shutting-down sentinel, either bare or behind Lua's
/// `chunkname:line: ` error-location prefix. mlua always stringifies a
/// Lua-raised error value before it reaches Rust, so this can't be a typed
/// comparison; anchoring to the first line at least rules out an unrelated
/// match buried in the traceback.
fn is_shutting_down_signal(msg: &str) -> bool {
    let first_line = msg.lines().next().unwrap_or(msg);
    first_line == SHUTTING_DOWN || first_line.ends_with(&format!(": {SHUTTING_DOWN}"))
}

/// Checkpoint value threaded into an input role's `process_message` call.
#[derive(Debug, Clone, Default)]
pub enum Checkpoint {
    #[default]
    None,
    Numeric(f64),
    Text(String),
}

/// Non-fatal outcome of one `process_message`/`timer_event` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Retry(i64),
}

fn classify(status: i64) -> Outcome {
    match status {
        0 => Outcome::Success,
        -1 => Outcome::Failure,
        s @ -4..=-2 => Outcome::Retry(s),
        _ => Outcome::Failure,
    }
}

/// Result of one `process_message` call: the classified status plus any
/// error message the plugin attached.
#[derive(Debug, Clone)]
pub struct PmResult {
    pub outcome: Outcome,
    pub error: Option<String>,
}

/// Running counters mirroring `lsb_heka_stats`.
#[derive(Debug, Clone, Default)]
pub struct PluginStats {
    pub im_cnt: u64,
    pub im_bytes: u64,
    pub pm_cnt: u64,
    pub pm_failures: u64,
    pub pm: RunningStats,
    pub te: RunningStats,
}

struct Core {
    sandbox: Sandbox,
    shared: Rc<host::Shared>,
    stats: PluginStats,
    logger: Rc<dyn Logger>,
}

impl Core {
    fn new(role: Role, config: SandboxConfig, logger_name: &str, hostname: &str, logger: Rc<dyn Logger>) -> Result<Self, PluginError> {
        let sandbox = Sandbox::create_with_logger(role, config, Rc::clone(&logger))?;
        let shared = Rc::new(host::Shared::default());
        *shared.logger_name.borrow_mut() = logger_name.to_string();
        *shared.hostname.borrow_mut() = hostname.to_string();
        shared.output_limit.set(sandbox.output_limit());
        shared.running.set(true);
        Ok(Core { sandbox, shared, stats: PluginStats::default(), logger })
    }

    fn log(&self, level: LogLevel, message: String) {
        self.logger.log(LogRecord { level, component: "plugin", message, fields: serde_json::Value::Null });
    }

    /// Reads one quota dimension, matching `lsb_get_lua_usage`. The output
    /// dimension is tracked here rather than in `heka_sandbox::Sandbox`,
    /// since only the plugin shell's host functions see encoded message
    /// byte counts.
    fn usage(&self, utype: heka_sandbox::UsageType) -> heka_sandbox::Usage {
        match utype {
            heka_sandbox::UsageType::Output => heka_sandbox::Usage {
                limit: self.shared.output_limit.get() as u64,
                current: self.shared.output_current.get(),
                maximum: self.shared.output_max.get(),
            },
            other => self.sandbox.usage(other),
        }
    }

    fn require_running(&self) -> Result<(), PluginError> {
        if self.sandbox.state() != SandboxState::Running {
            return Err(PluginError::NotRunning);
        }
        Ok(())
    }

    /// Drains queued injections, folding their byte counts into `stats`.
    fn drain_injected(&mut self) -> Vec<Injected> {
        let injected = self.shared.injected.borrow_mut().drain(..).collect::<Vec<_>>();
        self.stats.im_cnt += injected.len() as u64;
        self.stats.im_bytes += injected.iter().map(|i| i.bytes.len() as u64).sum::<u64>();
        injected
    }

    fn drain_checkpoints(&mut self) -> Vec<CheckpointUpdate> {
        self.shared.checkpoints.borrow_mut().drain(..).collect()
    }

    /// Calls a zero/one/two-arg Lua entry point, classifies its `(status,
    /// error)` return, and folds wall-time into `stats` when `profile`.
    fn call(&mut self, func_name: &'static str, args: Vec<Value>, stats_target: StatsTarget, profile: bool) -> Result<PmResult, PluginError> {
        self.sandbox.pcall_setup();
        let lua = self.sandbox.lua();
        let func: Function = match lua.globals().get(func_name) {
            Ok(Value::Function(f)) => f,
            _ => {
                let msg = format!("{func_name}() function was not found");
                self.sandbox.terminate(msg.clone());
                return Err(PluginError::Sandbox(heka_sandbox::SandboxError::MissingEntryPoint(func_name)));
            }
        };

        let start = profile.then(monotonic_nanos);
        let call_result: mlua::Result<(Option<i64>, Option<Value>)> = func.call(mlua::MultiValue::from_vec(args));

        let (status, error) = match call_result {
            Ok(v) => v,
            Err(e) => {
                let msg = e.to_string();
                if func_name == "process_message" && is_shutting_down_signal(&msg) {
                    self.log(LogLevel::Info, "process_message raised the shutting-down sentinel; treating as a clean stop".to_string());
                    (Some(0), None)
                } else {
                    let full = format!("{func_name}() {msg}");
                    self.sandbox.terminate(full.clone());
                    return Err(PluginError::Lua(mlua::Error::RuntimeError(full)));
                }
            }
        };

        if let Some(start) = start {
            let elapsed = (monotonic_nanos() - start) as f64;
            match stats_target {
                StatsTarget::ProcessMessage => self.stats.pm.add(elapsed),
                StatsTarget::TimerEvent => self.stats.te.add(elapsed),
            }
        }

        let Some(status) = status else {
            self.sandbox.terminate(format!("{func_name}() must return a numeric status code"));
            return Err(PluginError::Sandbox(heka_sandbox::SandboxError::NonNumericStatus(func_name)));
        };

        let error_message = match error {
            None | Some(Value::Nil) => None,
            Some(Value::String(s)) => Some(s.to_str()?.to_string()),
            Some(_) => {
                self.sandbox.terminate(format!("{func_name}() must return a nil or string error message"));
                return Err(PluginError::Sandbox(heka_sandbox::SandboxError::NonStringMessage(func_name)));
            }
        };

        if status > 0 {
            let msg = format!("{func_name}() received a termination status code");
            self.sandbox.terminate(msg);
            return Err(PluginError::TerminationStatus(func_name));
        }

        self.sandbox.pcall_teardown();
        let outcome = classify(status);
        if stats_target == StatsTarget::ProcessMessage {
            match outcome {
                Outcome::Failure => {
                    self.stats.pm_cnt += 1;
                    self.stats.pm_failures += 1;
                }
                Outcome::Retry(_) => {}
                Outcome::Success => self.stats.pm_cnt += 1,
            }
        }
        Ok(PmResult { outcome, error: error_message })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatsTarget {
    ProcessMessage,
    TimerEvent,
}

/// An input-role plugin: generates messages from an external source and
/// injects them, with no `read_message` subject of its own.
pub struct InputPlugin(Core);

impl InputPlugin {
    pub fn create(config: SandboxConfig, logger_name: &str, hostname: &str) -> Result<Self, PluginError> {
        Self::create_with_logger(config, logger_name, hostname, Rc::new(NullLogger))
    }

    pub fn create_with_logger(config: SandboxConfig, logger_name: &str, hostname: &str, logger: Rc<dyn Logger>) -> Result<Self, PluginError> {
        let core = Core::new(Role::Input, config, logger_name, hostname, logger)?;
        host::register_input(core.sandbox.lua(), &core.shared)?;
        Ok(InputPlugin(core))
    }

    pub fn init(&mut self, script: &str, chunk_name: &str, state_file: Option<&std::path::Path>) -> Result<(), PluginError> {
        Ok(self.0.sandbox.init(script, chunk_name, state_file)?)
    }

    pub fn process_message(&mut self, checkpoint: Checkpoint, profile: bool) -> Result<(PmResult, Vec<Injected>), PluginError> {
        self.0.require_running()?;
        let arg = match checkpoint {
            Checkpoint::None => Value::Nil,
            Checkpoint::Numeric(n) => Value::Number(n),
            Checkpoint::Text(s) => Value::String(self.0.sandbox.lua().create_string(s)?),
        };
        let result = self.0.call("process_message", vec![arg], StatsTarget::ProcessMessage, profile)?;
        Ok((result, self.0.drain_injected()))
    }

    pub fn stats(&self) -> &PluginStats {
        &self.0.stats
    }

    pub fn usage(&self, utype: heka_sandbox::UsageType) -> heka_sandbox::Usage {
        self.0.usage(utype)
    }

    /// Flips the `is_running()` barrier the plugin's own `process_message`
    /// loop polls, signaling a clean shutdown is in progress.
    pub fn request_shutdown(&self) {
        self.0.shared.running.set(false);
    }

    pub fn destroy(self, state_file: Option<&std::path::Path>) -> Result<(), PluginError> {
        Ok(self.0.sandbox.destroy(state_file)?)
    }
}

/// An analysis-role plugin: reads the message passed to `process_message`
/// and injects zero or more derived messages/payloads.
pub struct AnalysisPlugin(Core);

impl AnalysisPlugin {
    pub fn create(config: SandboxConfig, logger_name: &str, hostname: &str) -> Result<Self, PluginError> {
        Self::create_with_logger(config, logger_name, hostname, Rc::new(NullLogger))
    }

    pub fn create_with_logger(config: SandboxConfig, logger_name: &str, hostname: &str, logger: Rc<dyn Logger>) -> Result<Self, PluginError> {
        let core = Core::new(Role::Analysis, config, logger_name, hostname, logger)?;
        host::register_analysis(core.sandbox.lua(), &core.shared)?;
        Ok(AnalysisPlugin(core))
    }

    pub fn init(&mut self, script: &str, chunk_name: &str, state_file: Option<&std::path::Path>) -> Result<(), PluginError> {
        Ok(self.0.sandbox.init(script, chunk_name, state_file)?)
    }

    pub fn process_message(&mut self, message: &[u8], profile: bool) -> Result<(PmResult, Vec<Injected>), PluginError> {
        self.0.require_running()?;
        *self.0.shared.current_message.borrow_mut() = Some(message.to_vec());
        let result = self.0.call("process_message", Vec::new(), StatsTarget::ProcessMessage, profile);
        *self.0.shared.current_message.borrow_mut() = None;
        Ok((result?, self.0.drain_injected()))
    }

    pub fn timer_event(&mut self, timestamp_ns: i64, shutdown: bool) -> Result<Vec<Injected>, PluginError> {
        self.0.require_running()?;
        self.0.call("timer_event", vec![Value::Integer(timestamp_ns), Value::Boolean(shutdown)], StatsTarget::TimerEvent, true)?;
        Ok(self.0.drain_injected())
    }

    pub fn stats(&self) -> &PluginStats {
        &self.0.stats
    }

    pub fn usage(&self, utype: heka_sandbox::UsageType) -> heka_sandbox::Usage {
        self.0.usage(utype)
    }

    pub fn destroy(self, state_file: Option<&std::path::Path>) -> Result<(), PluginError> {
        Ok(self.0.sandbox.destroy(state_file)?)
    }
}

/// An output-role plugin: reads the message passed to `process_message`
/// and emits it elsewhere (network, disk), reporting checkpoint progress.
pub struct OutputPlugin(Core);

impl OutputPlugin {
    pub fn create(config: SandboxConfig, logger_name: &str, hostname: &str) -> Result<Self, PluginError> {
        Self::create_with_logger(config, logger_name, hostname, Rc::new(NullLogger))
    }

    pub fn create_with_logger(config: SandboxConfig, logger_name: &str, hostname: &str, logger: Rc<dyn Logger>) -> Result<Self, PluginError> {
        let core = Core::new(Role::Output, config, logger_name, hostname, logger)?;
        host::register_output(core.sandbox.lua(), &core.shared)?;
        Ok(OutputPlugin(core))
    }

    pub fn init(&mut self, script: &str, chunk_name: &str, state_file: Option<&std::path::Path>) -> Result<(), PluginError> {
        Ok(self.0.sandbox.init(script, chunk_name, state_file)?)
    }

    pub fn process_message(&mut self, message: &[u8], profile: bool) -> Result<(PmResult, Vec<CheckpointUpdate>), PluginError> {
        self.0.require_running()?;
        *self.0.shared.current_message.borrow_mut() = Some(message.to_vec());
        let result = self.0.call("process_message", Vec::new(), StatsTarget::ProcessMessage, profile);
        *self.0.shared.current_message.borrow_mut() = None;
        Ok((result?, self.0.drain_checkpoints()))
    }

    pub fn timer_event(&mut self, timestamp_ns: i64, shutdown: bool) -> Result<(), PluginError> {
        self.0.require_running()?;
        self.0.call("timer_event", vec![Value::Integer(timestamp_ns), Value::Boolean(shutdown)], StatsTarget::TimerEvent, true)?;
        Ok(())
    }

    pub fn stats(&self) -> &PluginStats {
        &self.0.stats
    }

    pub fn usage(&self, utype: heka_sandbox::UsageType) -> heka_sandbox::Usage {
        self.0.usage(utype)
    }

    pub fn destroy(self, state_file: Option<&std::path::Path>) -> Result<(), PluginError> {
        Ok(self.0.sandbox.destroy(state_file)?)
    }
}
