//! Download orchestrator
//!
//! One pass over the seedbox: for every finished torrent, in listing order,
//! mirror it locally unless a completion marker says it is already here, run the
//! optional post-processing program, and remove it from the seedbox once it has
//! stopped seeding (when asked to).
//!
//! Transfer exit codes are not errors. A failed or interrupted transfer ends the
//! pass with [`RunOutcome::Failed`] or [`RunOutcome::Cancelled`]; backend errors
//! are propagated to the caller.

use crate::clients::{FileToDownload, SeedboxBackend};
use crate::error::Result;
use crate::markers::{self, DirectoryIcon};
use crate::report::Reporter;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio_util::sync::CancellationToken;

/// Exit code of `rsync` when interrupted by the user
pub const TRANSFER_INTERRUPTED: i32 = 20;

/// How a download pass ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every torrent was handled
    Completed,
    /// A transfer was interrupted on request, or shutdown was requested
    Cancelled,
    /// A transfer failed or was killed
    Failed,
}

/// What a pass does besides downloading
#[derive(Clone, Debug)]
pub struct LeechOptions {
    /// Local directory the downloads and markers live in
    pub download_dir: PathBuf,
    /// Remove torrents from the seedbox once downloaded and no longer seeding
    pub remove_finished: bool,
    /// Program run after each completed download with the file name as argument
    pub processor_program: Option<PathBuf>,
}

impl LeechOptions {
    /// Download only, into `download_dir`
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            remove_finished: false,
            processor_program: None,
        }
    }
}

/// Drives download passes against one seedbox backend
pub struct Leecher<C> {
    client: C,
    options: LeechOptions,
    reporter: Reporter,
    cancel: CancellationToken,
}

impl<C: SeedboxBackend> Leecher<C> {
    /// Create an orchestrator
    pub fn new(
        client: C,
        options: LeechOptions,
        reporter: Reporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            options,
            reporter,
            cancel,
        }
    }

    /// The backend in use
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Pass options
    pub fn options(&self) -> &LeechOptions {
        &self.options
    }

    /// Message and notification reporter
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    fn download_dir(&self) -> &Path {
        &self.options.download_dir
    }

    /// Run one download pass over all finished torrents
    pub async fn run_once(&mut self) -> Result<RunOutcome> {
        let files = self.client.files_to_download().await?;
        tracing::debug!(
            count = files.len(),
            backend = self.client.name(),
            "finished torrents listed"
        );

        for file in files {
            if self.cancel.is_cancelled() {
                tracing::info!("shutdown requested, stopping before next torrent");
                return Ok(RunOutcome::Cancelled);
            }
            if let Some(outcome) = self.process(file).await? {
                return Ok(outcome);
            }
        }
        Ok(RunOutcome::Completed)
    }

    /// Handle one torrent; `Some` ends the pass early
    async fn process(&mut self, file: FileToDownload) -> Result<Option<RunOutcome>> {
        let FileToDownload {
            descriptor,
            status,
            filename,
        } = file;
        let fully_downloaded =
            markers::is_fully_downloaded(self.download_dir(), &filename).await?;

        if fully_downloaded && !self.options.remove_finished {
            tracing::info!(filename = %filename, torrent = %descriptor, "fully downloaded, continuing to next torrent");
            return Ok(None);
        }

        tracing::info!(filename = %filename, torrent = %descriptor, "checking if it exists on server");
        if !self.client.exists_remotely(&filename).await? {
            tracing::info!(filename = %filename, torrent = %descriptor, "no longer available on server, continuing to next torrent");
            return Ok(None);
        }

        if !fully_downloaded {
            tracing::info!(filename = %filename, torrent = %descriptor, "downloading");
            self.reporter
                .message(&format!("downloading {filename} from torrent {descriptor}"));

            let watcher = markers::tag_downloading_when_it_appears(self.download_dir(), &filename);
            let transferred = self.client.transfer(&filename).await;
            watcher.abort();
            let code = transferred?;

            if code != 0 {
                markers::tag_directory(self.download_dir(), &filename, DirectoryIcon::Error).await;
                return Ok(Some(self.transfer_failed(&filename, code)));
            }

            markers::create_completion_marker(self.download_dir(), &filename).await?;
            markers::tag_directory(self.download_dir(), &filename, DirectoryIcon::Complete).await;
            tracing::info!(filename = %filename, "download complete");
            self.reporter.message(&format!("download of {filename} complete"));

            if let Some(program) = self.options.processor_program.clone() {
                self.run_processor(&program, &filename).await;
            }
        }

        if self.options.remove_finished {
            if !status.is_removable() {
                tracing::info!(filename = %filename, torrent = %descriptor, status = %status, "complete but still seeding, not removing");
                return Ok(None);
            }
            self.client.remove_remote(&filename).await?;
            markers::remove_completion_marker(self.download_dir(), &filename).await?;
            tracing::info!(filename = %filename, torrent = %descriptor, "removal complete");
            self.reporter.message(&format!("removal of {filename} complete"));
        }

        Ok(None)
    }

    fn transfer_failed(&self, filename: &str, code: i32) -> RunOutcome {
        match code {
            TRANSFER_INTERRUPTED => {
                tracing::error!(filename = %filename, "download stopped, rsync process interrupted");
                self.reporter.error(&format!(
                    "download of {filename} stopped -- rsync process interrupted"
                ));
                tracing::info!("finishing by user request");
                RunOutcome::Cancelled
            }
            code if code < 0 => {
                tracing::error!(filename = %filename, signal = -code, "download failed, rsync process killed");
                self.reporter.error(&format!(
                    "download of {filename} failed -- rsync process killed with signal {}",
                    -code
                ));
                RunOutcome::Failed
            }
            code => {
                tracing::error!(filename = %filename, code, "download failed, rsync process exited with error");
                self.reporter.error(&format!(
                    "download of {filename} failed -- rsync process exited with return status {code}"
                ));
                RunOutcome::Failed
            }
        }
    }

    /// Run the post-processing program; its outcome is only logged
    async fn run_processor(&self, program: &Path, filename: &str) {
        let status = tokio::process::Command::new(program)
            .arg(filename)
            .current_dir(self.download_dir())
            .stdin(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) => {
                tracing::info!(
                    program = %program.display(),
                    filename = %filename,
                    code = ?status.code(),
                    "post-processing program exited"
                );
            }
            Err(e) => {
                tracing::error!(program = %program.display(), error = %e, "post-processing program is not executable");
                self.reporter.error(&format!(
                    "program {} is not executable: {e}",
                    program.display()
                ));
            }
        }
    }
}
