//! Sandbox-level errors. A VM panic or a quota breach never unwinds past
//! the sandbox boundary as a Rust panic — it always comes back as one of
//! these.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox configuration exceeds the hard resource ceilings")]
    ConfigOutOfRange,
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}() function was not found")]
    MissingEntryPoint(&'static str),
    #[error("{0}() must return a numeric status code")]
    NonNumericStatus(&'static str),
    #[error("{0}() must return a nil or string error message")]
    NonStringMessage(&'static str),
    #[error("sandbox is not running")]
    NotRunning,
}
