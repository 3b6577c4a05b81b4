//! Session controller
//!
//! Runs download passes once or forever, maps their results to process exit
//! codes and owns the process-level resources: the advisory lock file, the
//! detached daemon process and output redirection to a log file.

use crate::clients::SeedboxBackend;
use crate::error::{Error, Result, ToExitCode, exit_code};
use crate::leecher::{Leecher, RunOutcome};
use crate::retry::IsRetryable;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lock file name, in the download directory or the home directory
pub const LOCK_FILE_NAME: &str = ".torrentleecher.lock";

/// Log file used by `--daemon` when no log file is given
pub const DAEMON_LOG_FILE_NAME: &str = ".torrentleecher.log";

/// Granularity of the sleep between daemon passes
pub const SLEEP_TICK: Duration = Duration::from_secs(1);

/// Exclusive advisory lock, released when dropped
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Take the advisory lock on `path` without blocking
///
/// # Errors
///
/// [`Error::LockHeld`] when another process holds the lock.
pub fn acquire_lock(path: &Path) -> Result<LockGuard> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;

        // SAFETY: the descriptor belongs to `file`, which stays open for the
        // lifetime of the guard; flock does not touch memory we own.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(Error::LockHeld(path.to_path_buf()));
            }
            return Err(err.into());
        }
    }

    tracing::debug!(path = %path.display(), "lock acquired");
    Ok(LockGuard {
        _file: file,
        path: path.to_path_buf(),
    })
}

/// Redirect standard output and standard error to `log_file` (appending)
///
/// Child processes such as `rsync` inherit the redirection.
#[cfg(unix)]
pub fn redirect_output(log_file: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let log = OpenOptions::new().create(true).append(true).open(log_file)?;
    // SAFETY: both descriptors are valid for the duration of the calls; dup2
    // only duplicates descriptors and `log` can be closed afterwards.
    unsafe {
        if libc::dup2(log.as_raw_fd(), libc::STDOUT_FILENO) < 0
            || libc::dup2(log.as_raw_fd(), libc::STDERR_FILENO) < 0
        {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}

/// Detach from the controlling terminal and continue in the background
///
/// Must be called before any threads (including the async runtime) are started.
/// Standard input is read from the null device and output goes to `log_file`.
/// The working directory is kept.
#[cfg(unix)]
pub fn daemonize(log_file: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let devnull = File::open("/dev/null")?;
    OpenOptions::new().create(true).append(true).open(log_file)?;

    // SAFETY: the process is still single-threaded, so forking is sound; the
    // parents leave with _exit without running destructors or atexit handlers.
    unsafe {
        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error().into()),
            0 => {}
            _ => libc::_exit(0),
        }
        if libc::setsid() == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error().into()),
            0 => {}
            _ => libc::_exit(0),
        }
        if libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO) < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    redirect_output(log_file)
}

/// Exit code and whether the daemon must stop after one pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PassResult {
    code: i32,
    fatal: bool,
}

/// Runs download passes and turns their results into an exit code
pub struct Controller<C> {
    leecher: Leecher<C>,
    run_every: Option<Duration>,
    cancel: CancellationToken,
}

impl<C: SeedboxBackend> Controller<C> {
    /// Create a controller; `run_every` switches to daemon mode
    pub fn new(
        leecher: Leecher<C>,
        run_every: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            leecher,
            run_every,
            cancel,
        }
    }

    /// The orchestrator being driven
    pub fn leecher(&self) -> &Leecher<C> {
        &self.leecher
    }

    /// Run until done and return the process exit code
    ///
    /// A run that ended because shutdown was requested exits with success.
    pub async fn run(&mut self) -> i32 {
        let code = match self.run_every {
            None => {
                tracing::info!("starting download of finished torrents");
                let result = self.guarded_pass().await;
                tracing::info!("download of finished torrents complete");
                result.code
            }
            Some(interval) => self.run_forever(interval).await,
        };

        if self.cancel.is_cancelled() {
            exit_code::SUCCESS
        } else {
            code
        }
    }

    async fn run_forever(&mut self, interval: Duration) -> i32 {
        tracing::info!(
            interval_secs = interval.as_secs(),
            "starting daemon for download of finished torrents"
        );
        let mut code = exit_code::SUCCESS;

        while !self.cancel.is_cancelled() {
            let result = self.guarded_pass().await;
            code = result.code;
            if result.fatal {
                tracing::error!(code, "stopping daemon after configuration error");
                break;
            }
            if !self.cancel.is_cancelled() {
                tracing::info!(seconds = interval.as_secs(), "sleeping");
            }
            self.sleep(interval).await;
        }

        tracing::info!("download of finished torrents complete");
        code
    }

    /// Sleep in ticks, returning early on cancellation
    async fn sleep(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        loop {
            let now = Instant::now();
            if now >= deadline || self.cancel.is_cancelled() {
                return;
            }
            let tick = SLEEP_TICK.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn guarded_pass(&mut self) -> PassResult {
        match self.leecher.run_once().await {
            Ok(RunOutcome::Completed) => PassResult {
                code: exit_code::SUCCESS,
                fatal: false,
            },
            Ok(RunOutcome::Cancelled) => PassResult {
                code: exit_code::TRANSFER_CANCELLED,
                fatal: false,
            },
            Ok(RunOutcome::Failed) => PassResult {
                code: exit_code::TRANSFER_FAILED,
                fatal: false,
            },
            Err(e) => self.classify(e),
        }
    }

    fn classify(&self, error: Error) -> PassResult {
        if self.cancel.is_cancelled() || error.is_interrupted() {
            tracing::info!(error = %error, "pass interrupted");
            return PassResult {
                code: exit_code::INTERRUPTED,
                fatal: false,
            };
        }

        let code = error.exit_code();
        let fatal = error.is_configuration_level();
        if error.is_retryable() {
            tracing::warn!(error = %error, error_code = error.error_code(), "pass failed, will retry next cycle");
        } else {
            tracing::error!(error = %error, error_code = error.error_code(), "pass failed");
        }
        self.leecher.reporter().error(&error.to_string());
        PassResult { code, fatal }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{TorrentDescriptor, TorrentStatus};
    use crate::leecher::LeechOptions;
    use crate::report::Reporter;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Backend whose listings replay a script and may request shutdown
    struct ScriptedBackend {
        listings: VecDeque<Result<Vec<(TorrentDescriptor, TorrentStatus)>>>,
        cancel_after: Option<(usize, CancellationToken)>,
        listed: usize,
    }

    impl ScriptedBackend {
        fn new(listings: Vec<Result<Vec<(TorrentDescriptor, TorrentStatus)>>>) -> Self {
            Self {
                listings: listings.into(),
                cancel_after: None,
                listed: 0,
            }
        }
    }

    #[async_trait]
    impl SeedboxBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "Scripted"
        }

        async fn list_finished(&mut self) -> Result<Vec<(TorrentDescriptor, TorrentStatus)>> {
            self.listed += 1;
            if let Some((limit, cancel)) = &self.cancel_after
                && self.listed >= *limit
            {
                cancel.cancel();
            }
            self.listings.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn resolve_filename(&mut self, descriptor: &TorrentDescriptor) -> Result<String> {
            Ok(descriptor.to_string())
        }

        async fn transfer(&mut self, _filename: &str) -> Result<i32> {
            Ok(1)
        }

        async fn exists_remotely(&mut self, _filename: &str) -> Result<bool> {
            Ok(true)
        }

        async fn remove_remote(&mut self, _filename: &str) -> Result<()> {
            Ok(())
        }
    }

    fn controller(
        backend: ScriptedBackend,
        dir: &tempfile::TempDir,
        run_every: Option<Duration>,
        cancel: CancellationToken,
    ) -> Controller<ScriptedBackend> {
        let leecher = Leecher::new(
            backend,
            LeechOptions::new(dir.path()),
            Reporter::silent(),
            cancel.clone(),
        );
        Controller::new(leecher, run_every, cancel)
    }

    #[tokio::test]
    async fn one_shot_success_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(
            ScriptedBackend::new(vec![Ok(Vec::new())]),
            &dir,
            None,
            CancellationToken::new(),
        );
        assert_eq!(c.run().await, exit_code::SUCCESS);
    }

    #[tokio::test]
    async fn one_shot_maps_errors_to_exit_codes() {
        let cases = [
            (
                Error::TemporaryMalfunction("500".into()),
                exit_code::TEMPORARY_MALFUNCTION,
            ),
            (
                Error::Misconfiguration("404".into()),
                exit_code::MISCONFIGURED,
            ),
            (
                Error::InvariantViolation("two names".into()),
                exit_code::RUNTIME_ERROR,
            ),
            (
                Error::Interrupted("exists_on_server".into()),
                exit_code::INTERRUPTED,
            ),
        ];
        for (error, expected) in cases {
            let dir = tempfile::tempdir().unwrap();
            let mut c = controller(
                ScriptedBackend::new(vec![Err(error)]),
                &dir,
                None,
                CancellationToken::new(),
            );
            assert_eq!(c.run().await, expected);
        }
    }

    #[tokio::test]
    async fn one_shot_failed_transfer_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(
            ScriptedBackend::new(vec![Ok(vec![(
                TorrentDescriptor::new("file1"),
                TorrentStatus::Done,
            )])]),
            &dir,
            None,
            CancellationToken::new(),
        );
        assert_eq!(c.run().await, exit_code::TRANSFER_FAILED);
    }

    #[tokio::test]
    async fn daemon_keeps_going_after_temporary_malfunction() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut backend = ScriptedBackend::new(vec![
            Err(Error::TemporaryMalfunction("500".into())),
            Err(Error::InvariantViolation("odd output".into())),
            Ok(Vec::new()),
        ]);
        backend.cancel_after = Some((3, cancel.clone()));
        let mut c = controller(backend, &dir, Some(Duration::from_millis(20)), cancel);

        assert_eq!(c.run().await, exit_code::SUCCESS);
        assert_eq!(c.leecher().client().listed, 3);
    }

    #[tokio::test]
    async fn daemon_stops_on_misconfiguration() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = controller(
            ScriptedBackend::new(vec![
                Err(Error::Misconfiguration("404".into())),
                Ok(Vec::new()),
            ]),
            &dir,
            Some(Duration::from_millis(20)),
            CancellationToken::new(),
        );

        assert_eq!(c.run().await, exit_code::MISCONFIGURED);
        assert_eq!(c.leecher().client().listed, 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut c = controller(
            ScriptedBackend::new(vec![]),
            &dir,
            Some(Duration::from_secs(3600)),
            cancel.clone(),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let code = tokio::time::timeout(Duration::from_secs(10), c.run())
            .await
            .expect("controller did not stop after cancellation");
        canceller.await.unwrap();

        assert_eq!(code, exit_code::SUCCESS);
    }

    #[test]
    fn second_lock_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let guard = acquire_lock(&path).unwrap();
        assert_eq!(guard.path(), path.as_path());

        #[cfg(unix)]
        {
            match acquire_lock(&path) {
                Err(Error::LockHeld(held)) => assert_eq!(held, path),
                other => panic!("Expected LockHeld, got: {other:?}"),
            }
        }

        drop(guard);
        acquire_lock(&path).unwrap();
    }
}
