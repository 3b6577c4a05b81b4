//! # seedboxtools
//!
//! Mirror finished torrents from a remote seedbox to a local directory.
//!
//! The seedbox is reached through one of three backends (TorrentFlux,
//! Transmission over SSH, or a PulsedMedia/ruTorrent web service). Files are
//! copied with `rsync` over SSH, marked complete locally, optionally handed to
//! a post-processing program, and removed from the seedbox once they stopped
//! seeding.
//!
//! Two programs are built on this library: `leechtorrents` (one-shot or
//! daemonized periodic download) and `uploadtorrents` (submit torrent files
//! and magnet links).
//!
//! ## Quick Start
//!
//! ```no_run
//! use seedboxtools::{Config, Leecher, LeechOptions, Reporter, SeedboxClient};
//! use seedboxtools::transport::SystemTransport;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(&Config::default_path()?)?;
//!     let client = SeedboxClient::from_config(&config, Arc::new(SystemTransport))?;
//!     let options = LeechOptions::new(config.download_dir());
//!
//!     let mut leecher = Leecher::new(client, options, Reporter::silent(), CancellationToken::new());
//!     let outcome = leecher.run_once().await?;
//!     println!("pass ended: {outcome:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Command line front ends
pub mod cli;
/// Seedbox backends
pub mod clients;
/// Configuration file
pub mod config;
/// Locking, daemonization and the run loop
pub mod daemon;
/// Error types and exit codes
pub mod error;
/// Download orchestrator
pub mod leecher;
/// Local completion markers and directory icons
pub mod markers;
/// Desktop notifications
pub mod report;
/// Error classification for retry decisions
pub mod retry;
/// Subprocess execution (local, SSH, rsync)
pub mod transport;
/// Torrent and magnet link submission
pub mod uploader;

pub use clients::{
    FileToDownload, PulsedMediaClient, SeedboxBackend, SeedboxClient, TorrentDescriptor,
    TorrentFluxClient, TorrentStatus, TransmissionClient,
};
pub use config::Config;
pub use daemon::{Controller, LockGuard, acquire_lock};
pub use error::{Error, Result, ToExitCode};
pub use leecher::{LeechOptions, Leecher, RunOutcome};
pub use report::Reporter;
pub use retry::IsRetryable;
pub use transport::{SystemTransport, Transport};
pub use uploader::{Uploadable, upload_all};

/// Cancel `cancel` on the first SIGTERM or SIGINT
///
/// The first signal is also forwarded to the whole process group so that a
/// running `rsync` or `ssh` child stops too. Later signals are ignored.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub fn spawn_signal_handler(
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    spawn_signal_handler_with(cancel, forward_to_process_group)
}

/// Same as [`spawn_signal_handler`] with a custom action for the first signal number
///
/// The handlers are registered before this returns, so a signal raised right
/// after the call is already caught.
fn spawn_signal_handler_with<F>(
    cancel: tokio_util::sync::CancellationToken,
    forward: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(i32) + Send + 'static,
{
    let mut listener = SignalListener::register();
    tokio::spawn(async move {
        let signal = listener.recv().await;
        cancel.cancel();
        if let Some(signal) = signal {
            forward(signal);
        }
        // Repeats (including our own forwarded signal) land here and are dropped.
        loop {
            listener.recv().await;
            tracing::debug!("ignoring repeated signal");
        }
    })
}

#[cfg(unix)]
fn forward_to_process_group(signal: i32) {
    // SAFETY: killpg with pgrp 0 targets our own process group; both arguments are plain
    // integers and the call does not touch memory owned by Rust.
    let rc = unsafe { libc::killpg(0, signal) };
    if rc != 0 {
        tracing::warn!(
            signal,
            error = %std::io::Error::last_os_error(),
            "could not forward signal to process group"
        );
    }
}

#[cfg(not(unix))]
fn forward_to_process_group(_signal: i32) {}

/// SIGTERM and SIGINT streams, registered once and polled for every signal
#[cfg(unix)]
struct SignalListener {
    sigterm: Option<tokio::signal::unix::Signal>,
    sigint: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl SignalListener {
    /// Register both streams; registration may fail in restricted environments
    fn register() -> Self {
        use tokio::signal::unix::{SignalKind, signal};

        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| {
                tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            })
            .ok();
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| {
                tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            })
            .ok();
        if sigterm.is_none() && sigint.is_none() {
            tracing::error!("could not register any signal handlers, using ctrl_c fallback");
        }
        Self { sigterm, sigint }
    }

    /// Wait for the next signal and return its number when known
    async fn recv(&mut self) -> Option<i32> {
        match (self.sigterm.as_mut(), self.sigint.as_mut()) {
            (Some(sigterm), Some(sigint)) => {
                tokio::select! {
                    Some(()) = sigterm.recv() => {
                        tracing::info!("received SIGTERM, finishing");
                        Some(libc::SIGTERM)
                    }
                    Some(()) = sigint.recv() => {
                        tracing::info!("received SIGINT, finishing");
                        Some(libc::SIGINT)
                    }
                    else => std::future::pending().await,
                }
            }
            (Some(sigterm), None) => {
                sigterm.recv().await;
                tracing::info!("received SIGTERM, finishing");
                Some(libc::SIGTERM)
            }
            (None, Some(sigint)) => {
                sigint.recv().await;
                tracing::info!("received SIGINT, finishing");
                Some(libc::SIGINT)
            }
            (None, None) => {
                ctrl_c_fallback().await;
                None
            }
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn register() -> Self {
        SignalListener
    }

    async fn recv(&mut self) -> Option<i32> {
        ctrl_c_fallback().await;
        None
    }
}

/// Wait for Ctrl+C; never returns when it cannot be listened for
async fn ctrl_c_fallback() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl+C, finishing"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn first_signal_cancels_and_is_forwarded_once() {
        let cancel = CancellationToken::new();
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let record = forwarded.clone();
        let handler = spawn_signal_handler_with(cancel.clone(), move |signal| {
            record.lock().unwrap().push(signal);
        });

        // SAFETY: raise only signals this process, whose SIGTERM handler is installed above.
        unsafe { libc::raise(libc::SIGTERM) };
        tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
            .await
            .expect("SIGTERM should cancel the token");

        // SAFETY: as above, for SIGINT.
        unsafe { libc::raise(libc::SIGINT) };
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*forwarded.lock().unwrap(), vec![libc::SIGTERM]);
        assert!(!handler.is_finished());
        handler.abort();
    }
}
