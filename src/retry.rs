//! Classification of failures that clear up on the next polling cycle
//!
//! The engine never retries inside a cycle. A retryable error ends the current pass
//! and the daemon simply tries again after its sleep interval; a non-retryable one
//! is reported as a failure of the run.
//!
//! # Example
//!
//! ```
//! use seedboxtools::retry::IsRetryable;
//! use seedboxtools::Error;
//!
//! let transient = Error::TemporaryMalfunction("HTTP 500".into());
//! assert!(transient.is_retryable());
//!
//! let permanent = Error::Misconfiguration("HTTP 404".into());
//! assert!(!permanent.is_retryable());
//! ```

use crate::error::Error;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (server hiccups, connection resets, timeouts) should return `true`.
/// Permanent failures (wrong endpoint, broken backend contract, rejected torrent) should
/// return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the next cycle should try again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::TemporaryMalfunction(_) => true,
            // Connection-level failures behave like a server hiccup
            e @ Error::Network(_) => e.is_transient_network(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
            ),
            // ssh exits with 255 when the connection itself failed
            Error::CommandFailed { code, .. } => *code == 255,
            Error::Config { .. }
            | Error::Misconfiguration(_)
            | Error::InvalidTorrent(_)
            | Error::InvariantViolation(_)
            | Error::CacheMiss(_)
            | Error::Interrupted(_)
            | Error::ExternalTool(_)
            | Error::NotSupported(_)
            | Error::LockHeld(_)
            | Error::Serialization(_)
            | Error::Toml(_) => false,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ToExitCode, exit_code};

    #[test]
    fn temporary_malfunction_is_retryable() {
        assert!(Error::TemporaryMalfunction("500".into()).is_retryable());
    }

    #[test]
    fn misconfiguration_is_not_retryable() {
        assert!(!Error::Misconfiguration("404".into()).is_retryable());
    }

    #[test]
    fn invariant_violation_is_not_retryable() {
        assert!(!Error::InvariantViolation("two names".into()).is_retryable());
    }

    #[test]
    fn interruption_is_not_retryable() {
        assert!(!Error::Interrupted("transfer".into()).is_retryable());
    }

    #[test]
    fn ssh_connection_failure_is_retryable() {
        let err = Error::CommandFailed {
            command: "ssh host fluxcli transfers".into(),
            code: 255,
        };
        assert!(err.is_retryable());

        let err = Error::CommandFailed {
            command: "ssh host fluxcli transfers".into(),
            code: 1,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn connection_reset_io_error_is_retryable() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(err.is_retryable());

        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!err.is_retryable());
    }

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/")
    }

    async fn hang_up_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn network_errors_retry_exactly_when_they_exit_as_temporary() {
        let refused = Error::from(reqwest::get(closed_port_url().await).await.unwrap_err());
        let hung_up = Error::from(reqwest::get(hang_up_url().await).await.unwrap_err());
        let malformed = Error::from(reqwest::get("not a url").await.unwrap_err());

        for err in [&refused, &hung_up] {
            assert!(err.is_retryable(), "{err:?}");
            assert_eq!(err.exit_code(), exit_code::TEMPORARY_MALFUNCTION, "{err:?}");
        }
        assert!(!malformed.is_retryable());
        assert_eq!(malformed.exit_code(), exit_code::RUNTIME_ERROR);
    }
}
