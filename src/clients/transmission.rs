//! Transmission backend
//!
//! Listing and removal go through a local `transmission-remote` talking to the
//! daemon's RPC port; transfers and probes run over SSH against the download
//! directory. Torrents are addressed by numeric id, so the listing caches the
//! name-to-id mapping for the rest of the session.

use super::{
    SeedboxBackend, TorrentDescriptor, TorrentStatus, first_component, remote_join,
    remote_test_minus_e,
};
use crate::config::{Config, TransmissionConfig};
use crate::error::{Error, Result};
use crate::transport::Transport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

// column offsets of the fixed-width `transmission-remote` tables
const NAME_COLUMN: usize = 70;
const FILE_PATH_COLUMN: usize = 34;

/// One finished row of `transmission-remote -l`
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ListedTorrent {
    pub(crate) id: String,
    pub(crate) status: TorrentStatus,
    pub(crate) name: TorrentDescriptor,
}

/// Parse `transmission-remote -l` output into finished torrents, oldest first
///
/// A row is finished when its ETA column reads `Done`.
pub(crate) fn parse_listing(stdout: &str) -> Vec<ListedTorrent> {
    let lines: Vec<&str> = stdout.lines().collect();
    if lines.len() < 2 {
        return Vec::new();
    }

    lines[1..lines.len() - 1]
        .iter()
        .rev()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 9 || fields[4] != "Done" {
                return None;
            }
            let status = if fields[8] == "Stopped" {
                TorrentStatus::Stopped
            } else {
                TorrentStatus::Seeding
            };
            Some(ListedTorrent {
                id: fields[0].to_string(),
                status,
                name: TorrentDescriptor::new(line.chars().skip(NAME_COLUMN).collect::<String>()),
            })
        })
        .collect()
}

/// Extract the content name from `transmission-remote -t <id> -f` output
pub(crate) fn parse_file_listing(stdout: &str) -> Result<String> {
    let line = stdout.lines().nth(2).ok_or_else(|| {
        Error::InvariantViolation(format!("file listing has no file rows: {stdout:?}"))
    })?;
    first_component(&line.chars().skip(FILE_PATH_COLUMN).collect::<String>())
}

#[derive(Debug, Default)]
struct SessionCache {
    order: Vec<TorrentDescriptor>,
    ids: HashMap<TorrentDescriptor, String>,
    torrent_for_filename: Option<HashMap<String, TorrentDescriptor>>,
}

/// Seedbox running the Transmission daemon
pub struct TransmissionClient {
    settings: TransmissionConfig,
    download_dir: PathBuf,
    transport: Arc<dyn Transport>,
    cache: Option<SessionCache>,
}

impl TransmissionClient {
    /// Configuration name
    pub const NAME: &'static str = "TransmissionClient";

    /// Create a client from its settings
    pub fn new(
        settings: TransmissionConfig,
        download_dir: PathBuf,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            download_dir,
            transport,
            cache: None,
        }
    }

    /// Create a client from the `[TransmissionClient]` section
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let settings = config
            .transmission
            .clone()
            .ok_or_else(|| Error::config("section is missing", Self::NAME))?;
        Ok(Self::new(
            settings,
            config.download_dir().to_path_buf(),
            transport,
        ))
    }

    fn ssh_host(&self) -> &str {
        self.settings.effective_ssh_hostname()
    }

    fn remote_path(&self, filename: &str) -> String {
        remote_join(&self.settings.incoming_dir, filename)
    }

    fn remote_cmdline(&self, tail: &[&str]) -> Vec<String> {
        let mut cmdline = vec![
            self.settings.transmission_remote_path.clone(),
            self.settings.hostname.clone(),
            format!(
                "--auth={}:{}",
                self.settings.transmission_remote_user, self.settings.transmission_remote_password
            ),
        ];
        cmdline.extend(tail.iter().map(|s| s.to_string()));
        cmdline
    }

    fn id_for(&self, descriptor: &TorrentDescriptor) -> Result<String> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.ids.get(descriptor))
            .cloned()
            .ok_or_else(|| Error::CacheMiss(descriptor.to_string()))
    }
}

#[async_trait]
impl SeedboxBackend for TransmissionClient {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn list_finished(&mut self) -> Result<Vec<(TorrentDescriptor, TorrentStatus)>> {
        let stdout = self.transport.output(&self.remote_cmdline(&["-l"])).await?;
        let listed = parse_listing(&stdout);

        self.cache = Some(SessionCache {
            order: listed.iter().map(|t| t.name.clone()).collect(),
            ids: listed
                .iter()
                .map(|t| (t.name.clone(), t.id.clone()))
                .collect(),
            torrent_for_filename: None,
        });
        tracing::debug!(count = listed.len(), "transmission listing parsed");

        Ok(listed.into_iter().map(|t| (t.name, t.status)).collect())
    }

    async fn resolve_filename(&mut self, descriptor: &TorrentDescriptor) -> Result<String> {
        let id = self.id_for(descriptor)?;
        let mut cmdline = vec!["env".to_string(), "LANG=C".to_string()];
        cmdline.extend(self.remote_cmdline(&["-t", &id, "-f"]));
        let stdout = self.transport.output(&cmdline).await?;
        parse_file_listing(&stdout)
    }

    async fn transfer(&mut self, filename: &str) -> Result<i32> {
        let source = format!("{}:{}", self.ssh_host(), self.remote_path(filename));
        self.transport.rsync(&source, &self.download_dir).await
    }

    async fn exists_remotely(&mut self, filename: &str) -> Result<bool> {
        remote_test_minus_e(
            self.transport.as_ref(),
            self.ssh_host(),
            &self.remote_path(filename),
        )
        .await
    }

    async fn remove_remote(&mut self, filename: &str) -> Result<()> {
        let needs_filenames = match &self.cache {
            None => return Err(Error::CacheMiss(filename.to_string())),
            Some(cache) => cache.torrent_for_filename.is_none(),
        };
        if needs_filenames {
            let order = self
                .cache
                .as_ref()
                .map(|cache| cache.order.clone())
                .unwrap_or_default();
            let mut mapping = HashMap::with_capacity(order.len());
            for descriptor in order {
                let resolved = self.resolve_filename(&descriptor).await?;
                mapping.insert(resolved, descriptor);
            }
            if let Some(cache) = self.cache.as_mut() {
                cache.torrent_for_filename = Some(mapping);
            }
        }

        let descriptor = self
            .cache
            .as_ref()
            .and_then(|cache| cache.torrent_for_filename.as_ref())
            .and_then(|mapping| mapping.get(filename))
            .cloned()
            .ok_or_else(|| Error::CacheMiss(filename.to_string()))?;
        let id = self.id_for(&descriptor)?;

        let mut cmdline = vec!["env".to_string(), "LANG=C".to_string()];
        cmdline.extend(self.remote_cmdline(&["-t", &id, "--remove-and-delete"]));
        match self.transport.passthru(&cmdline).await? {
            0 => Ok(()),
            code if code < 0 => Err(Error::Interrupted("remove_remote_download".to_string())),
            code => Err(Error::InvariantViolation(format!(
                "remove dirs only returned {code}"
            ))),
        }
    }
}
