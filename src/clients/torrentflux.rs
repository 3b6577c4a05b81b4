//! TorrentFlux backend
//!
//! Everything runs over SSH: `fluxcli transfers` lists the torrents and the
//! torrent-info tool maps a `.transfers/<name>` metafile to the file or directory
//! its content lands under.

use super::{
    SeedboxBackend, TorrentDescriptor, TorrentStatus, remote_join, remote_test_minus_e,
};
use crate::config::{Config, TorrentFluxConfig};
use crate::error::{Error, Result};
use crate::transport::Transport;
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

const FILE_NAME_PREFIX: &str = "file name...........: ";
const DIRECTORY_NAME_PREFIX: &str = "directory name......: ";
const FILES_HEADER: &str = "files...............:";

// header and footer lines printed by `fluxcli transfers`
const HEADER_LINES: usize = 2;
const FOOTER_LINES: usize = 5;

#[allow(clippy::expect_used)]
fn transfer_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^- (.+) - [0123456789.]+ [KMG]B - (Seeding|Done)")
            .expect("transfer line pattern is valid")
    })
}

/// Parse `fluxcli transfers` output into finished torrents, oldest first
pub(crate) fn parse_transfers(stdout: &str) -> Vec<(TorrentDescriptor, TorrentStatus)> {
    let lines: Vec<&str> = stdout.lines().collect();
    if lines.len() <= HEADER_LINES + FOOTER_LINES {
        return Vec::new();
    }

    lines[HEADER_LINES..lines.len() - FOOTER_LINES]
        .iter()
        .rev()
        .filter_map(|line| {
            let captures = transfer_line().captures(line)?;
            let status = match &captures[2] {
                "Done" => TorrentStatus::Done,
                _ => TorrentStatus::Seeding,
            };
            Some((TorrentDescriptor::new(&captures[1]), status))
        })
        .collect()
}

/// Extract the single content name from torrent-info output
///
/// Single-file torrents print one `file name` field. Multi-file torrents print a
/// `files` header instead, and the `directory name` field names the content.
pub(crate) fn parse_torrentinfo(stdout: &str) -> Result<String> {
    let lines: Vec<&str> = stdout.lines().collect();

    let mut names: Vec<&str> = lines
        .iter()
        .filter_map(|line| line.strip_prefix(FILE_NAME_PREFIX))
        .collect();

    if names.is_empty() {
        if !lines.contains(&FILES_HEADER) {
            return Err(Error::InvariantViolation(format!(
                "torrent info lists neither a file name nor a {FILES_HEADER:?} header"
            )));
        }
        names = lines
            .iter()
            .filter_map(|line| line.strip_prefix(DIRECTORY_NAME_PREFIX))
            .collect();
    }

    match names.as_slice() {
        [name] => Ok(name.to_string()),
        _ => Err(Error::InvariantViolation(format!(
            "Wrong length of filenames: {names:?}"
        ))),
    }
}

/// Seedbox running TorrentFlux
pub struct TorrentFluxClient {
    settings: TorrentFluxConfig,
    download_dir: PathBuf,
    transport: Arc<dyn Transport>,
}

impl TorrentFluxClient {
    /// Configuration name
    pub const NAME: &'static str = "TorrentFluxClient";

    /// Create a client from its settings
    pub fn new(
        settings: TorrentFluxConfig,
        download_dir: PathBuf,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            download_dir,
            transport,
        }
    }

    /// Create a client from the `[TorrentFluxClient]` section
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let settings = config
            .torrentflux
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
}

#[async_trait]
impl SeedboxBackend for TorrentFluxClient {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn list_finished(&mut self) -> Result<Vec<(TorrentDescriptor, TorrentStatus)>> {
        let cmdline = vec![self.settings.fluxcli_path.clone(), "transfers".to_string()];
        let stdout = self.transport.ssh_output(self.ssh_host(), &cmdline).await?;
        let finished = parse_transfers(&stdout);
        tracing::debug!(count = finished.len(), "torrentflux listing parsed");
        Ok(finished)
    }

    async fn resolve_filename(&mut self, descriptor: &TorrentDescriptor) -> Result<String> {
        let metafile = remote_join(
            &remote_join(&self.settings.base_dir, ".transfers"),
            descriptor.as_str(),
        );
        let cmdline = vec![
            "env".to_string(),
            "LANG=C".to_string(),
            self.settings.torrentinfo_path.clone(),
            metafile,
        ];
        let stdout = self.transport.ssh_output(self.ssh_host(), &cmdline).await?;
        parse_torrentinfo(&stdout)
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
        let cmdline = vec![
            "rm".to_string(),
            "-rf".to_string(),
            self.remote_path(filename),
        ];
        match self.transport.ssh_passthru(self.ssh_host(), &cmdline).await? {
            0 => Ok(()),
            code if code < 0 => Err(Error::Interrupted("remove_remote_download".to_string())),
            code => Err(Error::InvariantViolation(format!(
                "remove dirs only returned {code}"
            ))),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::tests::ScriptedTransport;

    const TRANSFERS: &str = "\
Transfers:
-------------------------------------
- Newest.Show.S01E02 - 350.2 MB - Seeding
- Some Movie (2010) - 1.4 GB - Done
- still downloading - 12.0 MB - Running
- Oldest.Album - 98.1 MB - Done
-------------------------------------
Total: 4
Up: 0 kB/s
Down: 0 kB/s
-------------------------------------";

    fn client(transport: Arc<ScriptedTransport>) -> TorrentFluxClient {
        TorrentFluxClient::new(
            TorrentFluxConfig {
                hostname: "flux.example.com".to_string(),
                ssh_hostname: String::new(),
                base_dir: "/srv/flux".to_string(),
                incoming_dir: "/srv/flux/incoming".to_string(),
                torrentinfo_path: "torrentinfo-console".to_string(),
                fluxcli_path: "/usr/bin/fluxcli".to_string(),
            },
            PathBuf::from("/home/me/Downloads"),
            transport,
        )
    }

    #[test]
    fn transfers_are_reversed_and_filtered() {
        let finished = parse_transfers(TRANSFERS);
        assert_eq!(
            finished,
            vec![
                (TorrentDescriptor::new("Oldest.Album"), TorrentStatus::Done),
                (
                    TorrentDescriptor::new("Some Movie (2010)"),
                    TorrentStatus::Done
                ),
                (
                    TorrentDescriptor::new("Newest.Show.S01E02"),
                    TorrentStatus::Seeding
                ),
            ]
        );
    }

    #[test]
    fn short_transfer_listing_is_empty() {
        assert!(parse_transfers("Transfers:\n----\n----\nTotal: 0\n\n\n").is_empty());
        assert!(parse_transfers("").is_empty());
    }

    #[test]
    fn torrentinfo_single_file() {
        let out = "metainfo file.......: x.torrent\n\
                   file name...........: movie.mkv\n\
                   file size...........: 123 (0.1 MB)\n";
        assert_eq!(parse_torrentinfo(out).unwrap(), "movie.mkv");
    }

    #[test]
    fn torrentinfo_multi_file_uses_directory_name() {
        let out = "metainfo file.......: x.torrent\n\
                   directory name......: Show.S01\n\
                   files...............:\n   ep1.mkv (10)\n   ep2.mkv (10)\n";
        assert_eq!(parse_torrentinfo(out).unwrap(), "Show.S01");
    }

    #[test]
    fn torrentinfo_with_two_file_names_violates_contract() {
        let out = "file name...........: a.mkv\nfile name...........: b.mkv\n";
        match parse_torrentinfo(out) {
            Err(Error::InvariantViolation(msg)) => assert!(msg.contains("Wrong length")),
            other => panic!("Expected InvariantViolation, got: {other:?}"),
        }
    }

    #[test]
    fn torrentinfo_without_any_name_violates_contract() {
        assert!(matches!(
            parse_torrentinfo("metainfo file.......: x.torrent\n"),
            Err(Error::InvariantViolation(_))
        ));
        assert!(matches!(
            parse_torrentinfo("files...............:\n"),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn listing_runs_fluxcli_over_ssh() {
        let transport = Arc::new(ScriptedTransport::default().with_output(TRANSFERS));
        let mut flux = client(transport.clone());

        let finished = flux.list_finished().await.unwrap();
        assert_eq!(finished.len(), 3);

        let calls = transport.calls();
        assert_eq!(calls[0][5], "flux.example.com");
        assert_eq!(calls[0][6], "'/usr/bin/fluxcli' 'transfers'");
    }

    #[tokio::test]
    async fn resolve_reads_metafile_under_transfers() {
        let transport = Arc::new(
            ScriptedTransport::default().with_output("file name...........: movie.mkv\n"),
        );
        let mut flux = client(transport.clone());

        let name = flux
            .resolve_filename(&TorrentDescriptor::new("Some Movie"))
            .await
            .unwrap();
        assert_eq!(name, "movie.mkv");
        assert_eq!(
            transport.calls()[0][6],
            "'env' 'LANG=C' 'torrentinfo-console' '/srv/flux/.transfers/Some Movie'"
        );
    }

    #[tokio::test]
    async fn transfer_mirrors_incoming_path() {
        let transport = Arc::new(ScriptedTransport::default().with_code(0));
        let mut flux = client(transport.clone());

        assert_eq!(flux.transfer("movie.mkv").await.unwrap(), 0);
        let call = &transport.calls()[0];
        assert_eq!(call[0], "rsync");
        assert_eq!(
            &call[call.len() - 2..],
            &[
                "flux.example.com:/srv/flux/incoming/movie.mkv".to_string(),
                "/home/me/Downloads".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn remove_classifies_exit_codes() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with_code(0)
                .with_code(-2)
                .with_code(1),
        );
        let mut flux = client(transport.clone());

        flux.remove_remote("movie.mkv").await.unwrap();
        assert!(matches!(
            flux.remove_remote("movie.mkv").await,
            Err(Error::Interrupted(_))
        ));
        assert!(matches!(
            flux.remove_remote("movie.mkv").await,
            Err(Error::InvariantViolation(_))
        ));
        assert_eq!(
            transport.calls()[0][6],
            "'rm' '-rf' '/srv/flux/incoming/movie.mkv'"
        );
    }
}
