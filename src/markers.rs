//! Local download state kept next to the downloads
//!
//! - `.<filename>.done` completion markers record that a transfer finished, so
//!   later runs skip it and a removal pass knows what to clean up.
//! - `.directory` desktop-entry files give downloaded directories an icon in file
//!   managers (downloading, complete, error). Tagging is best-effort.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long the downloading tagger waits for a directory to appear
pub const WATCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Poll interval of the downloading tagger
pub const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Content written to completion markers
const MARKER_CONTENT: &str = "Done";

/// Icon shown for a downloaded directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectoryIcon {
    /// Transfer in progress
    Downloading,
    /// Transfer finished
    Complete,
    /// Transfer failed or was interrupted
    Error,
}

impl DirectoryIcon {
    /// Icon file name understood by desktop file managers
    pub fn icon_name(&self) -> &'static str {
        match self {
            DirectoryIcon::Downloading => "document-open-remote.png",
            DirectoryIcon::Complete => "dialog-ok-apply.png",
            DirectoryIcon::Error => "dialog-cancel.png",
        }
    }
}

/// Path of the completion marker for `filename`
pub fn completion_marker_path(download_dir: &Path, filename: &str) -> PathBuf {
    download_dir.join(format!(".{filename}.done"))
}

/// Whether `filename` was fully downloaded in an earlier run
///
/// A missing marker is `false`; a marker that cannot be checked is an error.
pub async fn is_fully_downloaded(download_dir: &Path, filename: &str) -> Result<bool> {
    Ok(tokio::fs::try_exists(completion_marker_path(download_dir, filename)).await?)
}

/// Record that `filename` was fully downloaded
///
/// An existing marker is left as is.
pub async fn create_completion_marker(download_dir: &Path, filename: &str) -> Result<()> {
    let path = completion_marker_path(download_dir, filename);
    let created = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await;
    match created {
        Ok(mut file) => {
            tokio::io::AsyncWriteExt::write_all(&mut file, MARKER_CONTENT.as_bytes()).await?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete the completion marker of `filename`, tolerating its absence
pub async fn remove_completion_marker(download_dir: &Path, filename: &str) -> Result<()> {
    match tokio::fs::remove_file(completion_marker_path(download_dir, filename)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Tag the directory `filename` with an icon
///
/// Plain files cannot carry a `.directory` entry; those and any write failure are
/// silently ignored.
pub async fn tag_directory(download_dir: &Path, filename: &str, icon: DirectoryIcon) {
    let entry = download_dir.join(filename).join(".directory");
    let text = format!("[Desktop Entry]\nIcon = {}\n", icon.icon_name());
    if let Err(e) = tokio::fs::write(&entry, text).await {
        tracing::trace!(path = %entry.display(), error = %e, "directory not tagged");
    }
}

/// Tag `filename` as downloading as soon as it shows up as a directory
///
/// The returned task gives up after [`WATCH_TIMEOUT`]. It is detached; aborting it
/// is only needed when the transfer ends early.
pub fn tag_downloading_when_it_appears(download_dir: &Path, filename: &str) -> JoinHandle<()> {
    tag_downloading_within(download_dir, filename, WATCH_TIMEOUT)
}

pub(crate) fn tag_downloading_within(
    download_dir: &Path,
    filename: &str,
    timeout: Duration,
) -> JoinHandle<()> {
    let download_dir = download_dir.to_path_buf();
    let filename = filename.to_string();

    tokio::spawn(async move {
        let target = download_dir.join(&filename);
        let appeared = tokio::time::timeout(timeout, async {
            while !tokio::fs::metadata(&target)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
            {
                tokio::time::sleep(WATCH_INTERVAL).await;
            }
        })
        .await;

        match appeared {
            Ok(()) => tag_directory(&download_dir, &filename, DirectoryIcon::Downloading).await,
            Err(_) => tracing::debug!(filename = %filename, "directory never appeared, not tagging"),
        }
    })
}
