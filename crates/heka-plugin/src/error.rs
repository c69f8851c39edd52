use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    Sandbox(#[from] heka_sandbox::SandboxError),
    #[error(transparent)]
    Lua(#[from] mlua::Error),
    #[error("plugin is not running")]
    NotRunning,
    #[error("{0}() received a termination status code")]
    TerminationStatus(&'static str),
}
