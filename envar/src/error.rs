//! Error taxonomy shared by the store, process, mutation and broadcast layers.

use thiserror::Error;

/// Every failure an envar command can surface.
///
/// All variants are terminal for the invocation; nothing is retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvarError {
    /// Backing store is missing, unreadable or malformed.
    #[error("store unavailable at {location}: {reason}")]
    StoreUnavailable { location: String, reason: String },

    #[error("permission denied: {location}")]
    PermissionDenied { location: String },

    #[error("no process with id {pid} was found")]
    ProcessNotFound { pid: u32 },

    /// Malformed or contradictory request, rejected before any I/O.
    #[error("{0}")]
    Validation(String),

    /// Append of a token the variable already holds.
    #[error("the value '{value}' already exists in variable '{name}'")]
    ValueAlreadyExists { name: String, value: String },

    /// Existing variable and no mode to resolve the conflict.
    #[error("the variable '{name}' already exists; specify -a (append) or -o (overwrite)")]
    VariableExists { name: String },

    #[error("the change broadcast timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("the change broadcast failed (os error {code}): {message}")]
    Broadcast { code: i32, message: String },
}

impl EnvarError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Map an I/O failure on a store or process file to the taxonomy.
    pub fn from_io(location: impl Into<String>, err: &std::io::Error) -> Self {
        let location = location.into();
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { location },
            _ => Self::StoreUnavailable {
                location,
                reason: err.to_string(),
            },
        }
    }

    /// Map an I/O failure on the broadcast directory; `-1` when the OS gave no code.
    pub fn broadcast_io(err: &std::io::Error) -> Self {
        Self::Broadcast {
            code: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
        }
    }
}
