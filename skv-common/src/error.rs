//! Error taxonomy for the keyspace store and dispatcher.
//!
//! Mirrors the failure semantics a keyspace operation can return: never a
//! panic, always one of these variants. The dispatcher maps each variant to
//! a wire error line; nothing here is fatal to the connection or process.

use std::path::PathBuf;

/// Result alias used throughout `skv-core`.
pub type SkvResult<T> = Result<T, SkvError>;

/// Failure modes a keyspace or snapshot operation can report.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SkvError {
    /// The key already exists under a different type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    TypeConflict,

    /// Admission failed: the write would exceed `max_memory_bytes` and
    /// eviction could not free enough space (or is disabled).
    #[error("OOM command not allowed when used memory > 'max_memory_bytes'")]
    OutOfMemory,

    /// An INCR-family command found a value that does not parse as a
    /// signed decimal integer.
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// The dispatcher received the wrong number of arguments for a command.
    /// `Display` omits the `usage:` wire prefix; the dispatcher adds it via
    /// [`SkvError::wire_prefix`] so the text isn't duplicated on the wire.
    #[error("{command} {usage}")]
    WrongArity {
        /// The command token as received (uppercased for display).
        command: String,
        /// A short usage hint shown after the command name.
        usage: String,
    },

    /// The command token did not match any known command.
    #[error("unknown command")]
    UnknownCommand,

    /// A snapshot save or load failed at the filesystem boundary.
    /// `Display` omits the `failed:` wire prefix; see [`SkvError::WrongArity`].
    #[error("{operation}{detail_suffix}")]
    SnapshotIo {
        /// Which operation failed: "save" or "load".
        operation: &'static str,
        /// Human-readable detail, already formatted as `": <reason>"`, or
        /// empty when no further detail is available.
        detail_suffix: String,
        /// The path involved, if known.
        path: Option<PathBuf>,
    },

    /// Reserved for host-supplied authorization failures. The core never
    /// produces this itself.
    #[error("access denied")]
    Denied,
}

impl SkvError {
    /// Builds a `WrongArity` error for a command and its usage string.
    pub fn wrong_arity(command: &str, usage: &str) -> Self {
        SkvError::WrongArity {
            command: command.to_ascii_uppercase(),
            usage: usage.to_string(),
        }
    }

    /// Builds a `SnapshotIo` error for a save failure.
    pub fn save_failed(path: PathBuf, detail: impl std::fmt::Display) -> Self {
        SkvError::SnapshotIo {
            operation: "save",
            detail_suffix: format!(": {detail}"),
            path: Some(path),
        }
    }

    /// Builds a `SnapshotIo` error for a load failure.
    pub fn load_failed(path: PathBuf, detail: impl std::fmt::Display) -> Self {
        SkvError::SnapshotIo {
            operation: "load",
            detail_suffix: format!(": {detail}"),
            path: Some(path),
        }
    }

    /// Returns the wire error-line prefix for this error, per the dispatcher's
    /// framing rules (`error:`, `usage:`, `failed:`).
    pub fn wire_prefix(&self) -> &'static str {
        match self {
            SkvError::WrongArity { .. } => "usage",
            SkvError::SnapshotIo { .. } => "failed",
            SkvError::Denied => "denied",
            _ => "error",
        }
    }
}

impl From<std::io::Error> for SkvError {
    fn from(err: std::io::Error) -> Self {
        SkvError::SnapshotIo {
            operation: "save",
            detail_suffix: format!(": {err}"),
            path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_prefix_matches_taxonomy() {
        assert_eq!(SkvError::TypeConflict.wire_prefix(), "error");
        assert_eq!(SkvError::OutOfMemory.wire_prefix(), "error");
        assert_eq!(SkvError::NotAnInteger.wire_prefix(), "error");
        assert_eq!(SkvError::UnknownCommand.wire_prefix(), "error");
        assert_eq!(
            SkvError::wrong_arity("set", "<key> <value>").wire_prefix(),
            "usage"
        );
        assert_eq!(
            SkvError::save_failed(PathBuf::from("/tmp/x"), "disk full").wire_prefix(),
            "failed"
        );
        assert_eq!(SkvError::Denied.wire_prefix(), "denied");
    }

    #[test]
    fn wrong_arity_uppercases_command() {
        let err = SkvError::wrong_arity("get", "<key>");
        match err {
            SkvError::WrongArity { command, .. } => assert_eq!(command, "GET"),
            _ => panic!("wrong variant"),
        }
    }
}
