//! Submission of torrent files and magnet links
//!
//! Arguments starting with `magnet:` are magnet links, everything else is a path to
//! a `.torrent` file. Failures are reported and the remaining uploads still run.

use crate::clients::SeedboxBackend;
use crate::error::{Result, exit_code};
use crate::report::Reporter;
use std::fmt;
use std::path::PathBuf;

/// One argument of `uploadtorrents`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Uploadable {
    /// `magnet:` URI
    MagnetLink(String),
    /// Local `.torrent` file
    TorrentFile(PathBuf),
}

impl Uploadable {
    /// Classify a command line argument
    pub fn classify(argument: &str) -> Self {
        if argument.starts_with("magnet:") {
            Uploadable::MagnetLink(argument.to_string())
        } else {
            Uploadable::TorrentFile(PathBuf::from(argument))
        }
    }

    /// Submit to the seedbox
    pub async fn upload<C: SeedboxBackend + ?Sized>(&self, client: &mut C) -> Result<()> {
        match self {
            Uploadable::MagnetLink(uri) => client.upload_magnet_link(uri).await,
            Uploadable::TorrentFile(path) => client.upload_torrent(path).await,
        }
    }
}

impl fmt::Display for Uploadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uploadable::MagnetLink(uri) => f.write_str(uri),
            Uploadable::TorrentFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Upload every argument, continuing past failures
///
/// Returns [`exit_code::SUCCESS`] when all uploads succeeded and
/// [`exit_code::UPLOAD_FAILED`] otherwise. With `debug` the
/// full error structure is logged.
pub async fn upload_all<C: SeedboxBackend + ?Sized>(
    client: &mut C,
    arguments: &[String],
    debug: bool,
    reporter: &Reporter,
) -> i32 {
    let mut failed = 0usize;
    for uploadable in arguments.iter().map(|a| Uploadable::classify(a)) {
        match uploadable.upload(client).await {
            Ok(()) => tracing::info!(torrent = %uploadable, "uploaded"),
            Err(e) => {
                if debug {
                    tracing::error!(torrent = %uploadable, error = ?e, "error while uploading");
                } else {
                    tracing::error!(torrent = %uploadable, error = %e, "error while uploading");
                }
                reporter.error(&format!("error while uploading {uploadable}: {e}"));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        tracing::warn!(failed, total = arguments.len(), "some uploads failed");
        exit_code::UPLOAD_FAILED
    } else {
        exit_code::SUCCESS
    }
}
