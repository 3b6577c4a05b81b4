//! Configuration types for seedboxtools
//!
//! The configuration lives in a TOML file (by default `~/.torrentleecher.toml`) with a
//! `[general]` section selecting the backend and one section per backend named after
//! it. Only the section of the selected backend has to be present.

use crate::error::{Error, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the configuration inside the home directory
pub const CONFIG_FILE_NAME: &str = ".torrentleecher.toml";

/// Settings shared by every backend
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Backend name: `TransmissionClient`, `TorrentFluxClient` or `PulsedMedia`
    #[serde(default = "default_client")]
    pub client: String,

    /// Local directory finished torrents are mirrored into
    #[serde(default = "default_local_download_dir")]
    pub local_download_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            client: default_client(),
            local_download_dir: default_local_download_dir(),
        }
    }
}

/// Transmission daemon reachable with `transmission-remote`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransmissionConfig {
    /// Host the Transmission RPC listens on
    pub hostname: String,

    /// SSH host used for transfers and probes (empty = same as `hostname`)
    #[serde(default)]
    pub ssh_hostname: String,

    /// Directory holding the `.torrent` files on the seedbox
    #[serde(default = "default_transmission_torrents_dir")]
    pub torrents_dir: String,

    /// Directory downloads complete into on the seedbox
    #[serde(default = "default_transmission_incoming_dir")]
    pub incoming_dir: String,

    /// Torrent metadata dump tool on the seedbox
    #[serde(default = "default_torrentinfo_path")]
    pub torrentinfo_path: String,

    /// Local `transmission-remote` binary
    #[serde(default = "default_transmission_remote_path")]
    pub transmission_remote_path: String,

    /// Transmission RPC user
    #[serde(default)]
    pub transmission_remote_user: String,

    /// Transmission RPC password
    #[serde(default)]
    pub transmission_remote_password: String,
}

impl TransmissionConfig {
    /// Host used for SSH and rsync
    pub fn effective_ssh_hostname(&self) -> &str {
        non_empty_or(&self.ssh_hostname, &self.hostname)
    }
}

/// TorrentFlux installation driven with `fluxcli`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TorrentFluxConfig {
    /// Seedbox host
    pub hostname: String,

    /// SSH host (empty = same as `hostname`)
    #[serde(default)]
    pub ssh_hostname: String,

    /// TorrentFlux base directory (holds `.transfers`)
    pub base_dir: String,

    /// Directory downloads complete into
    pub incoming_dir: String,

    /// Torrent metadata dump tool on the seedbox
    #[serde(default = "default_torrentinfo_path")]
    pub torrentinfo_path: String,

    /// `fluxcli` on the seedbox
    #[serde(default = "default_fluxcli_path")]
    pub fluxcli_path: String,
}

impl TorrentFluxConfig {
    /// Host used for SSH and rsync
    pub fn effective_ssh_hostname(&self) -> &str {
        non_empty_or(&self.ssh_hostname, &self.hostname)
    }
}

/// ruTorrent seedbox hosted by PulsedMedia
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PulsedMediaConfig {
    /// Web host of the seedbox
    pub hostname: String,

    /// SSH host (empty = same as `hostname`)
    #[serde(default)]
    pub ssh_hostname: String,

    /// Account login, used for HTTP basic auth and SSH
    pub login: String,

    /// Account password
    #[serde(default)]
    pub password: String,

    /// Only torrents carrying this label count as finished (empty = all)
    #[serde(default)]
    pub label: String,

    /// Accept self-signed or mismatched TLS certificates (default: false)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Override of the ruTorrent base URL (default: `https://<hostname>/user-<login>/rutorrent/`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rutorrent_url: Option<String>,
}

impl PulsedMediaConfig {
    /// Host used for SSH and rsync
    pub fn effective_ssh_hostname(&self) -> &str {
        non_empty_or(&self.ssh_hostname, &self.hostname)
    }

    /// Label filter with surrounding whitespace removed, `None` when unset
    pub fn label_filter(&self) -> Option<&str> {
        Some(self.label.trim()).filter(|label| !label.is_empty())
    }
}

/// Complete configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend selection and local download directory
    #[serde(default)]
    pub general: GeneralConfig,

    /// Transmission backend settings
    #[serde(
        rename = "TransmissionClient",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transmission: Option<TransmissionConfig>,

    /// TorrentFlux backend settings
    #[serde(
        rename = "TorrentFluxClient",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub torrentflux: Option<TorrentFluxConfig>,

    /// PulsedMedia backend settings
    #[serde(rename = "PulsedMedia", default, skip_serializing_if = "Option::is_none")]
    pub pulsedmedia: Option<PulsedMediaConfig>,
}

impl Config {
    /// Default configuration path: `~/.torrentleecher.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dirs = BaseDirs::new()
            .ok_or_else(|| Error::config("cannot determine the home directory", "path"))?;
        Ok(dirs.home_dir().join(CONFIG_FILE_NAME))
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the configuration at `path`
    ///
    /// # Errors
    ///
    /// A missing or unreadable file is a [`Error::Config`]; malformed TOML is
    /// [`Error::Toml`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), client = %config.general.client, "configuration loaded");
        Ok(config)
    }

    /// Write the configuration to `path`, readable only by its owner
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config {
            message: format!("cannot serialize configuration: {e}"),
            key: None,
        })?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        std::io::Write::write_all(&mut file, text.as_bytes())?;
        Ok(())
    }

    /// Check that the selected backend is known and has its section
    pub fn validate(&self) -> Result<()> {
        let present = match self.general.client.as_str() {
            "TransmissionClient" => self.transmission.is_some(),
            "TorrentFluxClient" => self.torrentflux.is_some(),
            "PulsedMedia" => self.pulsedmedia.is_some(),
            other => {
                return Err(Error::config(
                    format!("unknown client {other:?}"),
                    "general.client",
                ));
            }
        };
        if !present {
            return Err(Error::config(
                format!("section [{}] is missing", self.general.client),
                self.general.client.clone(),
            ));
        }
        if self.general.local_download_dir.as_os_str().is_empty() {
            return Err(Error::config(
                "local download directory cannot be empty",
                "general.local_download_dir",
            ));
        }
        Ok(())
    }

    /// Local download directory
    pub fn download_dir(&self) -> &Path {
        &self.general.local_download_dir
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

fn default_client() -> String {
    "TransmissionClient".to_string()
}

fn default_local_download_dir() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_transmission_torrents_dir() -> String {
    "/var/lib/transmission/torrents".to_string()
}

fn default_transmission_incoming_dir() -> String {
    "/var/lib/transmission/Downloads".to_string()
}

fn default_torrentinfo_path() -> String {
    "torrentinfo-console".to_string()
}

fn default_transmission_remote_path() -> String {
    "transmission-remote".to_string()
}

fn default_fluxcli_path() -> String {
    "fluxcli".to_string()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn transmission_config() -> Config {
        Config {
            general: GeneralConfig {
                client: "TransmissionClient".to_string(),
                local_download_dir: PathBuf::from("/tmp/leech"),
            },
            transmission: Some(TransmissionConfig {
                hostname: "box.example.com".to_string(),
                ssh_hostname: String::new(),
                torrents_dir: default_transmission_torrents_dir(),
                incoming_dir: "/srv/incoming".to_string(),
                torrentinfo_path: default_torrentinfo_path(),
                transmission_remote_path: "transmission-remote".to_string(),
                transmission_remote_user: "admin".to_string(),
                transmission_remote_password: "secret".to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn parses_minimal_transmission_config_with_defaults() {
        let config = Config::from_toml(
            r#"
            [general]
            client = "TransmissionClient"
            local_download_dir = "/home/me/Downloads"

            [TransmissionClient]
            hostname = "box.example.com"
            "#,
        )
        .unwrap();

        let section = config.transmission.as_ref().unwrap();
        assert_eq!(section.transmission_remote_path, "transmission-remote");
        assert_eq!(section.incoming_dir, "/var/lib/transmission/Downloads");
        assert_eq!(section.effective_ssh_hostname(), "box.example.com");
        assert_eq!(config.download_dir(), Path::new("/home/me/Downloads"));
    }

    #[test]
    fn ssh_hostname_overrides_hostname() {
        let config = Config::from_toml(
            r#"
            [general]
            client = "TorrentFluxClient"
            local_download_dir = "/dl"

            [TorrentFluxClient]
            hostname = "web.example.com"
            ssh_hostname = "shell.example.com"
            base_dir = "/srv/flux"
            incoming_dir = "/srv/flux/incoming"
            "#,
        )
        .unwrap();

        let section = config.torrentflux.unwrap();
        assert_eq!(section.effective_ssh_hostname(), "shell.example.com");
        assert_eq!(section.fluxcli_path, "fluxcli");
    }

    #[test]
    fn missing_backend_section_is_rejected() {
        let err = Config::from_toml(
            r#"
            [general]
            client = "PulsedMedia"
            local_download_dir = "/dl"
            "#,
        )
        .unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("PulsedMedia")),
            other => panic!("Expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_client_is_rejected() {
        let err = Config::from_toml(
            r#"
            [general]
            client = "uTorrent"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            Config::from_toml("[general\nclient = 1"),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn label_filter_ignores_whitespace() {
        let mut section = PulsedMediaConfig {
            hostname: "x.pulsedmedia.com".to_string(),
            ssh_hostname: String::new(),
            login: "me".to_string(),
            password: "pw".to_string(),
            label: "  ".to_string(),
            accept_invalid_certs: false,
            rutorrent_url: None,
        };
        assert_eq!(section.label_filter(), None);
        section.label = " tv ".to_string();
        assert_eq!(section.label_filter(), Some("tv"));
    }

    #[test]
    fn save_then_load_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = transmission_config();

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        let section = loaded.transmission.unwrap();
        assert_eq!(section.transmission_remote_password, "secret");
        assert!(loaded.pulsedmedia.is_none());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn loading_a_missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::Config { key: None, .. }));
    }
}
