//! Seedbox clients
//!
//! One capability interface, [`SeedboxBackend`], covers everything the download
//! engine needs from a remote torrent backend. Three backends implement it:
//!
//! - [`TorrentFluxClient`] - parses `fluxcli` and torrent-info text output over SSH
//! - [`TransmissionClient`] - drives `transmission-remote` and caches torrent ids per session
//! - [`PulsedMediaClient`] - talks to ruTorrent's `httprpc` plugin over HTTPS
//!
//! [`SeedboxClient`] is the tagged union of the three, selected from the
//! configuration through the [`BACKENDS`] lookup table.

mod multicall;
mod pulsedmedia;
mod torrentflux;
mod transmission;


pub use pulsedmedia::PulsedMediaClient;
pub use torrentflux::TorrentFluxClient;
pub use transmission::TransmissionClient;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::Transport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Backend-specific identifier of one torrent (name, info hash or numeric id)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorrentDescriptor(pub String);

impl TorrentDescriptor {
    /// Create a new descriptor
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TorrentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TorrentDescriptor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Remote state of a finished torrent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TorrentStatus {
    /// Fully downloaded and no longer shared
    Done,
    /// Fully downloaded and still uploading to peers
    Seeding,
    /// Fully downloaded and paused by the backend
    Stopped,
}

impl TorrentStatus {
    /// Whether the torrent may be removed from the seedbox
    pub fn is_removable(&self) -> bool {
        matches!(self, TorrentStatus::Done)
    }
}

impl fmt::Display for TorrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TorrentStatus::Done => "Done",
            TorrentStatus::Seeding => "Seeding",
            TorrentStatus::Stopped => "Stopped",
        })
    }
}

/// A finished torrent together with the local name its content maps to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileToDownload {
    /// The torrent on the backend
    pub descriptor: TorrentDescriptor,
    /// Its remote status
    pub status: TorrentStatus,
    /// The file or directory name its content lands under locally
    pub filename: String,
}

/// Capability interface of a seedbox backend
///
/// # Session precondition
///
/// `list_finished` starts a session. Backends that memoize listing results
/// (Transmission, PulsedMedia) need it to have run before `resolve_filename`,
/// `transfer`, `exists_remotely` or `remove_remote`; calling those first fails
/// with [`Error::CacheMiss`].
#[async_trait]
pub trait SeedboxBackend: Send {
    /// Configuration name of this backend
    fn name(&self) -> &'static str;

    /// List finished torrents, oldest-finished first
    ///
    /// An empty backend yields an empty list, never an error.
    async fn list_finished(&mut self) -> Result<Vec<(TorrentDescriptor, TorrentStatus)>>;

    /// Map a torrent to the single file or directory name its content uses
    ///
    /// # Errors
    ///
    /// [`Error::InvariantViolation`] when the backend output does not name exactly
    /// one candidate.
    async fn resolve_filename(&mut self, descriptor: &TorrentDescriptor) -> Result<String>;

    /// Copy the remote file or directory into the local download directory
    ///
    /// Returns the mirroring tool's exit code: `0` success, `20` interrupted by the
    /// user, negative when killed by a signal, anything else a failure.
    async fn transfer(&mut self, filename: &str) -> Result<i32>;

    /// Whether the file or directory still exists on the seedbox
    async fn exists_remotely(&mut self, filename: &str) -> Result<bool>;

    /// Remove the torrent and its data from the seedbox
    async fn remove_remote(&mut self, filename: &str) -> Result<()>;

    /// Submit a magnet link to the backend
    async fn upload_magnet_link(&mut self, uri: &str) -> Result<()> {
        let _ = uri;
        Err(Error::NotSupported(format!(
            "{} cannot upload magnet links",
            self.name()
        )))
    }

    /// Submit a local torrent file to the backend
    async fn upload_torrent(&mut self, path: &Path) -> Result<()> {
        let _ = path;
        Err(Error::NotSupported(format!(
            "{} cannot upload torrent files",
            self.name()
        )))
    }

    /// List finished torrents and resolve each one's local name, keeping the order
    async fn files_to_download(&mut self) -> Result<Vec<FileToDownload>> {
        let finished = self.list_finished().await?;
        let mut files = Vec::with_capacity(finished.len());
        for (descriptor, status) in finished {
            let filename = self.resolve_filename(&descriptor).await?;
            files.push(FileToDownload {
                descriptor,
                status,
                filename,
            });
        }
        Ok(files)
    }
}

/// The configured seedbox backend
pub enum SeedboxClient {
    /// TorrentFlux over SSH
    TorrentFlux(TorrentFluxClient),
    /// Transmission through `transmission-remote`
    Transmission(TransmissionClient),
    /// ruTorrent on a PulsedMedia seedbox
    PulsedMedia(PulsedMediaClient),
}

/// Constructor for one backend
pub type Constructor = fn(&Config, Arc<dyn Transport>) -> Result<SeedboxClient>;

/// Backends by configuration name
pub const BACKENDS: &[(&str, Constructor)] = &[
    (TorrentFluxClient::NAME, |config, transport| {
        TorrentFluxClient::from_config(config, transport).map(SeedboxClient::TorrentFlux)
    }),
    (TransmissionClient::NAME, |config, transport| {
        TransmissionClient::from_config(config, transport).map(SeedboxClient::Transmission)
    }),
    (PulsedMediaClient::NAME, |config, transport| {
        PulsedMediaClient::from_config(config, transport).map(SeedboxClient::PulsedMedia)
    }),
];

/// Find the constructor registered under `name`
pub fn lookup_client(name: &str) -> Option<Constructor> {
    BACKENDS
        .iter()
        .find(|(backend, _)| *backend == name)
        .map(|(_, constructor)| *constructor)
}

impl SeedboxClient {
    /// Build the backend selected by `general.client`
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let name = config.general.client.as_str();
        let constructor = lookup_client(name).ok_or_else(|| {
            Error::config(
                format!(
                    "unknown client {name:?}, expected one of {}",
                    BACKENDS
                        .iter()
                        .map(|(n, _)| *n)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                "general.client",
            )
        })?;
        constructor(config, transport)
    }

    fn backend(&mut self) -> &mut dyn SeedboxBackend {
        match self {
            SeedboxClient::TorrentFlux(c) => c,
            SeedboxClient::Transmission(c) => c,
            SeedboxClient::PulsedMedia(c) => c,
        }
    }
}

#[async_trait]
impl SeedboxBackend for SeedboxClient {
    fn name(&self) -> &'static str {
        match self {
            SeedboxClient::TorrentFlux(c) => c.name(),
            SeedboxClient::Transmission(c) => c.name(),
            SeedboxClient::PulsedMedia(c) => c.name(),
        }
    }

    async fn list_finished(&mut self) -> Result<Vec<(TorrentDescriptor, TorrentStatus)>> {
        self.backend().list_finished().await
    }

    async fn resolve_filename(&mut self, descriptor: &TorrentDescriptor) -> Result<String> {
        self.backend().resolve_filename(descriptor).await
    }

    async fn transfer(&mut self, filename: &str) -> Result<i32> {
        self.backend().transfer(filename).await
    }

    async fn exists_remotely(&mut self, filename: &str) -> Result<bool> {
        self.backend().exists_remotely(filename).await
    }

    async fn remove_remote(&mut self, filename: &str) -> Result<()> {
        self.backend().remove_remote(filename).await
    }

    async fn upload_magnet_link(&mut self, uri: &str) -> Result<()> {
        self.backend().upload_magnet_link(uri).await
    }

    async fn upload_torrent(&mut self, path: &Path) -> Result<()> {
        self.backend().upload_torrent(path).await
    }
}

/// Probe a remote path with `test -e`
///
/// Exit status `0` means present and `1` absent. A probe killed by a signal is an
/// interruption; any other status is a command failure.
pub(crate) async fn remote_test_minus_e(
    transport: &dyn Transport,
    host: &str,
    path: &str,
) -> Result<bool> {
    let cmdline = vec!["test".to_string(), "-e".to_string(), path.to_string()];
    match transport.ssh_passthru(host, &cmdline).await? {
        0 => Ok(true),
        1 => Ok(false),
        code if code < 0 => Err(Error::Interrupted("exists_on_server".to_string())),
        code => Err(Error::CommandFailed {
            command: format!("ssh {host} test -e {path}"),
            code,
        }),
    }
}

/// Join a remote POSIX directory and a name
pub(crate) fn remote_join(dir: &str, name: &str) -> String {
    if name.starts_with('/') || dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Last component of a remote POSIX path
pub(crate) fn remote_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// First component of a relative path (`Dir/sub/file` yields `Dir`)
pub(crate) fn first_component(path: &str) -> Result<String> {
    path.split('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvariantViolation(format!("path cannot be empty: {path:?}")))
}
