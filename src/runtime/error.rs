//! Error types shared by the execution primitives, the script engine and the
//! platform.
//!
//! Errors that can travel through the shared filter engine future are `Clone`,
//! which is why I/O failures are carried as rendered strings.

use crate::runtime::weak_values::WeakValuesId;
use std::time::Duration;
use thiserror::Error;

/// Failure to hand work to an execution lane.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("executor has stopped accepting work")]
    Stopped,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Failure reported by the script backend or by a host native invoked from
/// script.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("{filename}: {message}")]
    Exception { filename: String, message: String },
    #[error("value is not callable")]
    NotCallable,
    #[error("function {0} is not known to the script backend")]
    UnknownFunction(u32),
    #[error("{0}")]
    Native(String),
    #[error("script engine is gone")]
    EngineGone,
}

impl ScriptError {
    pub fn exception(filename: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::Exception {
            filename: filename.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WeakValuesError {
    #[error("weak values were invalidated by engine teardown")]
    Invalidated,
    #[error("weak values {0} were already taken or never stored")]
    Unknown(WeakValuesId),
}

/// Errors surfaced by [`crate::runtime::engine::JsEngine`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    WeakValues(#[from] WeakValuesError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Errors surfaced by [`crate::runtime::platform::Platform`] and the filter
/// engine it constructs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlatformError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("script '{0}' is not part of the configured sources")]
    UnknownScript(String),
    #[error("filter engine did not signal readiness within {0:?}")]
    InitTimeout(Duration),
    #[error("filter engine construction was abandoned")]
    Abandoned,
}

impl From<ScriptError> for PlatformError {
    fn from(err: ScriptError) -> Self {
        PlatformError::Engine(EngineError::Script(err))
    }
}
