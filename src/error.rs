//! Error types
//!
//! Three layers, three enums:
//! - `RuntimeError` is what a failing runtime call carries up the native
//!   call chain until a protected call catches it.
//! - `LoadError` is returned by the data-chunk loader.
//! - `BindError` is the taxonomy of the host binding layer. Every variant is
//!   recovered locally by the non-`try_` handle API.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::value::{Value, ValueType};

/// Outcome of a protected call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    /// The call completed normally
    Ok,
    /// An error was raised while running the callee
    Runtime,
    /// A chunk failed to parse
    Syntax,
    /// The runtime's stack budget was exhausted
    Memory,
    /// The message handler itself failed
    ErrorInError,
}

impl CallStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == CallStatus::Ok
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallStatus::Ok => "ok",
            CallStatus::Runtime => "runtime error",
            CallStatus::Syntax => "syntax error",
            CallStatus::Memory => "memory allocation error",
            CallStatus::ErrorInError => "error in error handling",
        })
    }
}

/// Error raised inside the runtime
///
/// Native functions return this to raise an error; `State::pcall` turns it
/// into a `CallStatus` plus an error object on the stack.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Error raised with an arbitrary error object
    #[error("{0}")]
    Runtime(Value),
    #[error("{0}")]
    Syntax(String),
    #[error("not enough memory: {0}")]
    Memory(String),
    #[error("{0}")]
    ErrorInError(Value),
}

impl RuntimeError {
    /// Raise a runtime error with a text message
    pub fn runtime(msg: impl AsRef<str>) -> Self {
        RuntimeError::Runtime(Value::string(msg.as_ref()))
    }

    /// Status reported by a protected call that caught this error
    pub fn status(&self) -> CallStatus {
        match self {
            RuntimeError::Runtime(_) => CallStatus::Runtime,
            RuntimeError::Syntax(_) => CallStatus::Syntax,
            RuntimeError::Memory(_) => CallStatus::Memory,
            RuntimeError::ErrorInError(_) => CallStatus::ErrorInError,
        }
    }

    /// Error object left on the stack by a protected call
    pub fn into_value(self) -> Value {
        match self {
            RuntimeError::Runtime(v) | RuntimeError::ErrorInError(v) => v,
            RuntimeError::Syntax(msg) => Value::string(&msg),
            RuntimeError::Memory(_) => Value::string("not enough memory"),
        }
    }
}

/// Error loading a data chunk
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {}: {source}", .path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{chunk}:{line}: {message}")]
    Syntax {
        chunk: String,
        line: usize,
        message: String,
    },
    #[error("{chunk}: {source}")]
    Runtime { chunk: String, source: RuntimeError },
    #[error("runtime context is busy executing a call")]
    ContextBusy,
}

impl LoadError {
    pub fn status(&self) -> CallStatus {
        match self {
            LoadError::Syntax { .. } => CallStatus::Syntax,
            LoadError::Runtime { source, .. } => source.status(),
            LoadError::File { .. } | LoadError::ContextBusy => CallStatus::Runtime,
        }
    }
}

/// Failure kinds of the host binding layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    /// The handle holds no captured value
    #[error("value handle holds no reference")]
    NoReference,
    /// The runtime value does not have the requested host type
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: ValueType,
    },
    /// A table-only operation was requested on something else
    #[error("attempt to index a {0} value")]
    NotATable(ValueType),
    /// A named lookup did not resolve to a function
    #[error("field '{name}' is not callable (found {found})")]
    NotCallable { name: String, found: ValueType },
    /// The runtime raised an error during a call
    #[error("{status}: {message}")]
    RuntimeFailure { status: CallStatus, message: String },
    /// The context is already borrowed by a running call
    #[error("runtime context is busy executing a call")]
    ContextBusy,
}

/// Result type for binding operations
pub type BindResult<T> = Result<T, BindError>;
