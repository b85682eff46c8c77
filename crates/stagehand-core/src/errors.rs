use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading, running or releasing a single script.
///
/// Every embedded engine maps its native failures onto these variants so the
/// runtime can report them uniformly, whichever language produced them.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The source could not be read or was rejected by the engine's compiler.
    #[error("compile error: {message}")]
    Compile { message: String },

    /// The engine raised an error while the script body was executing.
    #[error("runtime error: {message}")]
    Runtime {
        message: String,
        /// Engine-provided traceback or position text, when available.
        stack: Option<String>,
    },

    /// A host binding could not be installed into the script environment.
    #[error("registration error: {message}")]
    Registration { message: String },

    /// The engine failed to release its state cleanly.
    #[error("disposal error: {message}")]
    Disposal { message: String },
}

impl ScriptError {
    pub fn compile(message: impl Into<String>) -> Self {
        ScriptError::Compile {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime {
            message: message.into(),
            stack: None,
        }
    }

    pub fn registration(message: impl Into<String>) -> Self {
        ScriptError::Registration {
            message: message.into(),
        }
    }

    /// Traceback text attached to a runtime error, if the engine supplied one.
    pub fn stack(&self) -> Option<&str> {
        match self {
            ScriptError::Runtime {
                stack: Some(stack), ..
            } => Some(stack),
            _ => None,
        }
    }
}

/// Why a declared element was rejected before it reached the document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ElementError {
    #[error("start time must be a finite, non-negative number, got {0}")]
    InvalidStartTime(f64),

    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("unknown origin '{0}'")]
    UnknownOrigin(String),

    #[error("unknown loop kind '{0}'")]
    UnknownLoopKind(String),

    #[error("animation frame count must be at least 1, got {0}")]
    InvalidFrameCount(i64),

    #[error("animation frame delay must be a finite, non-negative number, got {0}")]
    InvalidFrameDelay(f64),

    #[error("element path must not be empty")]
    EmptyPath,
}

/// Error surfaced to the calling script by a host API function.
///
/// Adapters translate these into the engine's native error value, so a script
/// can catch them with its own mechanisms (`pcall`, `try`, ...) while an
/// uncaught one faults the script as a whole.
#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Element(#[from] ElementError),

    #[error("{name} expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("argument {index} of {name}: expected {expected}, got {got}")]
    Argument {
        name: String,
        index: usize,
        expected: &'static str,
        got: String,
    },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One entry in the failure report of a run pass.
///
/// A failing script never stops the pass; it is recorded here and the run
/// carries on with the remaining scripts.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptFailure {
    /// Display name of the script that failed.
    pub script: String,
    /// Source path, for editor navigation.
    pub path: PathBuf,
    pub severity: Severity,
    pub message: String,
    /// Engine traceback, when one was available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}
