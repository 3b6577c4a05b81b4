//! Error types for seedboxtools
//!
//! This module provides the error taxonomy shared by the seedbox clients, the
//! download orchestrator and the session controller:
//! - Backend classifications (temporary malfunction, misconfiguration, invalid torrent)
//! - Backend contract violations (unexpected tool output, failed batch removals)
//! - A single interruption kind for operations cancelled by a signal
//! - Process exit code mapping for the command line front ends

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for seedboxtools operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for seedboxtools
///
/// Each variant belongs to one failure class of the engine. The class decides
/// whether the controller retries on the next polling cycle, aborts the run, or
/// only rejects a single upload.
#[derive(Debug, Error)]
pub enum Error {
    /// Local configuration is missing or invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "general.client")
        key: Option<String>,
    },

    /// The backend failed in a way that is expected to clear up by itself (HTTP 500, faults)
    #[error("temporary malfunction: {0}")]
    TemporaryMalfunction(String),

    /// The backend address or endpoint is wrong (HTTP 404, bad host)
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// The backend rejected a torrent file or magnet link
    #[error("invalid torrent file or magnet link: {0:?}")]
    InvalidTorrent(String),

    /// The backend output broke its contract (wrong number of names, failed sub-call)
    #[error("backend contract violated: {0}")]
    InvariantViolation(String),

    /// A session-cache lookup happened before `list_finished` populated the cache
    #[error("session cache miss for {0}: list_finished must be called first")]
    CacheMiss(String),

    /// The operation was interrupted by a signal
    #[error("{0} interrupted")]
    Interrupted(String),

    /// A captured command exited with a non-zero status
    #[error("command {command} returned status {code}")]
    CommandFailed {
        /// The command line, space-joined
        command: String,
        /// The exit status (negative when killed by a signal)
        code: i32,
    },

    /// External tool could not be executed at all (ssh, rsync, transmission-remote)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported by this backend
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Another process holds the advisory lock
    #[error("another process has a lock on {}", .0.display())]
    LockHeld(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error stands for a cancellation rather than a failure
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Interrupted(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::Interrupted,
            _ => false,
        }
    }

    /// Whether this is an HTTP failure on the way to or from the server
    ///
    /// Connection failures, timeouts and requests cut off mid-flight count as a
    /// temporary malfunction, both for the exit code and for retrying.
    pub fn is_transient_network(&self) -> bool {
        match self {
            Error::Network(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }

    /// Whether this error must stop a daemon instead of waiting for the next cycle
    pub fn is_configuration_level(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::Misconfiguration(_))
    }
}

/// Process exit codes used by `leechtorrents` and `uploadtorrents`
pub mod exit_code {
    /// Everything went fine
    pub const SUCCESS: i32 = 0;
    /// A transfer exited with a failure status or was killed
    pub const TRANSFER_FAILED: i32 = 1;
    /// Invalid command line argument
    pub const INVALID_ARGUMENT: i32 = 2;
    /// A transfer was interrupted at the user's request
    pub const TRANSFER_CANCELLED: i32 = 3;
    /// The log file cannot be opened
    pub const NO_PERMISSION: i32 = 4;
    /// Another process holds the lock
    pub const LOCK_HELD: i32 = 5;
    /// Configuration is missing or unreadable
    pub const NOT_CONFIGURED: i32 = 6;
    /// The backend had a transient failure
    pub const TEMPORARY_MALFUNCTION: i32 = 7;
    /// A remote operation was interrupted by a signal
    pub const INTERRUPTED: i32 = 8;
    /// Backend contract violation or any other runtime failure
    pub const RUNTIME_ERROR: i32 = 9;
    /// The backend endpoint is misconfigured
    pub const MISCONFIGURED: i32 = 16;
    /// The download directory cannot be entered
    pub const CHDIR: i32 = 200;
    /// `uploadtorrents`: at least one torrent could not be uploaded
    pub const UPLOAD_FAILED: i32 = 4;
}

/// Convert errors to process exit codes
///
/// This trait maps domain errors to the distinct exit statuses of the command
/// line front ends.
pub trait ToExitCode {
    /// Get the process exit code for this error
    fn exit_code(&self) -> i32;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } | Error::Toml(_) => exit_code::NOT_CONFIGURED,
            Error::Misconfiguration(_) => exit_code::MISCONFIGURED,
            Error::TemporaryMalfunction(_) => exit_code::TEMPORARY_MALFUNCTION,
            e if e.is_transient_network() => exit_code::TEMPORARY_MALFUNCTION,
            Error::LockHeld(_) => exit_code::LOCK_HELD,
            e if e.is_interrupted() => exit_code::INTERRUPTED,
            Error::InvalidTorrent(_)
            | Error::InvariantViolation(_)
            | Error::CacheMiss(_)
            | Error::Interrupted(_)
            | Error::CommandFailed { .. }
            | Error::ExternalTool(_)
            | Error::NotSupported(_)
            | Error::Io(_)
            | Error::Network(_)
            | Error::Serialization(_) => exit_code::RUNTIME_ERROR,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::TemporaryMalfunction(_) => "temporary_malfunction",
            Error::Misconfiguration(_) => "misconfiguration",
            Error::InvalidTorrent(_) => "invalid_torrent",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::CacheMiss(_) => "cache_miss",
            Error::Interrupted(_) => "interrupted",
            Error::CommandFailed { .. } => "command_failed",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::LockHeld(_) => "lock_held",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Toml(_) => "config_parse_error",
        }
    }
}
