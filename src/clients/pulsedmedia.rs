//! ruTorrent backend for PulsedMedia seedboxes
//!
//! Listing goes through ruTorrent's `httprpc` plugin (`mode=list`), removal through
//! an XML-RPC `system.multicall` on the same endpoint and uploads through
//! `php/addtorrent.php`. Transfers and probes use SSH as `<login>@<ssh host>`.

use super::multicall::{self, Multicall};
use super::{
    SeedboxBackend, TorrentDescriptor, TorrentStatus, remote_basename, remote_test_minus_e,
};
use crate::config::{Config, PulsedMediaConfig};
use crate::error::{Error, Result};
use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Timeout applied to every HTTP request
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

const LIST_ENDPOINT: &str = "plugins/httprpc/action.php";
const UPLOAD_ENDPOINT: &str = "php/addtorrent.php";

// positions inside a `mode=list` row
const FIELD_IS_OPEN: usize = 0;
const FIELD_COMPLETED_CHUNKS: usize = 6;
const FIELD_SIZE_CHUNKS: usize = 7;
const FIELD_LABEL: usize = 14;
const FIELD_BASE_PATH: usize = 25;

/// One torrent row of the `mode=list` response
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ListedRow {
    pub(crate) hash: String,
    pub(crate) is_open: bool,
    pub(crate) completed_chunks: u64,
    pub(crate) size_chunks: u64,
    pub(crate) label: String,
    pub(crate) base_path: String,
}

impl ListedRow {
    fn is_finished(&self, label_filter: Option<&str>) -> bool {
        if let Some(label) = label_filter
            && self.label != label
        {
            return false;
        }
        self.size_chunks > 0 && self.completed_chunks == self.size_chunks
    }

    fn status(&self) -> TorrentStatus {
        if self.is_open {
            TorrentStatus::Seeding
        } else {
            TorrentStatus::Done
        }
    }
}

fn field_text(hash: &str, fields: &[Value], index: usize) -> Result<String> {
    match fields.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        other => Err(Error::InvariantViolation(format!(
            "torrent {hash} has no usable field {index}: {other:?}"
        ))),
    }
}

fn field_number(hash: &str, fields: &[Value], index: usize) -> Result<u64> {
    let text = field_text(hash, fields, index)?;
    text.trim().parse().map_err(|_| {
        Error::InvariantViolation(format!(
            "torrent {hash} field {index} is not a number: {text:?}"
        ))
    })
}

/// Parse a `mode=list` response body, keeping the server's row order
///
/// The torrent bag `t` is an object keyed by info hash. ruTorrent sends an empty
/// array (or nothing at all) when there are no torrents.
pub(crate) fn parse_listing(body: &str) -> Result<Vec<ListedRow>> {
    let data: Value = serde_json::from_str(body)?;
    let torrents = match data.get("t") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return Ok(Vec::new()),
        Some(Value::Array(rows)) if rows.is_empty() => return Ok(Vec::new()),
        Some(Value::Object(torrents)) => torrents,
        Some(other) => {
            return Err(Error::InvariantViolation(format!(
                "torrent list is neither an object nor empty: {other}"
            )));
        }
    };

    torrents
        .iter()
        .map(|(hash, row)| {
            let fields = row.as_array().ok_or_else(|| {
                Error::InvariantViolation(format!("torrent {hash} is not a field list"))
            })?;
            Ok(ListedRow {
                hash: hash.clone(),
                is_open: field_number(hash, fields, FIELD_IS_OPEN)? != 0,
                completed_chunks: field_number(hash, fields, FIELD_COMPLETED_CHUNKS)?,
                size_chunks: field_number(hash, fields, FIELD_SIZE_CHUNKS)?,
                label: field_text(hash, fields, FIELD_LABEL)?,
                base_path: field_text(hash, fields, FIELD_BASE_PATH)?,
            })
        })
        .collect()
}

#[derive(Debug, Default)]
struct SessionCache {
    base_path_for_hash: HashMap<String, String>,
    path_for_filename: HashMap<String, String>,
    hash_for_filename: HashMap<String, String>,
}

/// ruTorrent seedbox hosted by PulsedMedia
pub struct PulsedMediaClient {
    settings: PulsedMediaConfig,
    download_dir: PathBuf,
    transport: Arc<dyn Transport>,
    http: reqwest::Client,
    base_url: Url,
    cache: Option<SessionCache>,
}

impl PulsedMediaClient {
    /// Configuration name
    pub const NAME: &'static str = "PulsedMedia";

    /// Create a client from its settings
    pub fn new(
        settings: PulsedMediaConfig,
        download_dir: PathBuf,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let base = match &settings.rutorrent_url {
            Some(url) => url.clone(),
            None => format!(
                "https://{}/user-{}/rutorrent/",
                settings.hostname,
                urlencoding::encode(&settings.login)
            ),
        };
        let base = if base.ends_with('/') {
            base
        } else {
            format!("{base}/")
        };
        let base_url = Url::parse(&base).map_err(|e| {
            Error::config(format!("invalid ruTorrent URL {base:?}: {e}"), "PulsedMedia.hostname")
        })?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()?;

        Ok(Self {
            settings,
            download_dir,
            transport,
            http,
            base_url,
            cache: None,
        })
    }

    /// Create a client from the `[PulsedMedia]` section
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let settings = config
            .pulsedmedia
            .clone()
            .ok_or_else(|| Error::config("section is missing", Self::NAME))?;
        Self::new(settings, config.download_dir().to_path_buf(), transport)
    }

    fn endpoint(&self, relative: &str) -> Result<Url> {
        self.base_url.join(relative).map_err(|e| {
            Error::config(
                format!("invalid ruTorrent endpoint {relative}: {e}"),
                "PulsedMedia.hostname",
            )
        })
    }

    fn ssh_host(&self) -> String {
        format!(
            "{}@{}",
            self.settings.login,
            self.settings.effective_ssh_hostname()
        )
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.http
            .post(url)
            .basic_auth(&self.settings.login, Some(&self.settings.password))
    }

    fn misconfigured(&self) -> Error {
        Error::Misconfiguration(format!(
            "Server address ({}) may be misconfigured",
            self.settings.hostname
        ))
    }

    fn cached_path(&self, filename: &str) -> Result<&str> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.path_for_filename.get(filename))
            .map(String::as_str)
            .ok_or_else(|| Error::CacheMiss(filename.to_string()))
    }

    /// Classify the HTTP status of a `httprpc` response and return its body
    ///
    /// 500 is a temporary malfunction, 404 means the ruTorrent URL is wrong and any
    /// other non-200 status violates the protocol.
    async fn check_status(
        &self,
        response: reqwest::Response,
        operation: &str,
    ) -> Result<Vec<u8>> {
        let status = response.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::TemporaryMalfunction(format!(
                "Server returned a temporary 500 status code: {text}"
            )));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(self.misconfigured());
        }
        if status != StatusCode::OK {
            return Err(Error::InvariantViolation(format!(
                "Non-OK status code while {operation}: {status}"
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload(&self, request: reqwest::RequestBuilder, payload: String) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            return Err(Error::TemporaryMalfunction(format!(
                "Server returned a temporary 500 status code: {text}"
            )));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(self.misconfigured());
        }
        if text.contains("addTorrentSuccess") {
            return Ok(());
        }
        if text.contains("addTorrentFailed") {
            return Err(Error::InvalidTorrent(payload));
        }
        Err(Error::InvariantViolation(format!(
            "unexpected upload response ({status}): {text}"
        )))
    }
}

#[async_trait]
impl SeedboxBackend for PulsedMediaClient {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn list_finished(&mut self) -> Result<Vec<(TorrentDescriptor, TorrentStatus)>> {
        let response = self
            .post(self.endpoint(LIST_ENDPOINT)?)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("mode=list")
            .send()
            .await?;

        let body = self
            .check_status(response, "retrieving finished torrents")
            .await?;
        let rows = parse_listing(&String::from_utf8_lossy(&body))?;

        let mut cache = SessionCache::default();
        for row in &rows {
            let filename = remote_basename(&row.base_path).to_string();
            cache
                .base_path_for_hash
                .insert(row.hash.clone(), row.base_path.clone());
            cache
                .path_for_filename
                .insert(filename.clone(), row.base_path.clone());
            cache.hash_for_filename.insert(filename, row.hash.clone());
        }
        self.cache = Some(cache);

        let label = self.settings.label_filter();
        let finished: Vec<_> = rows
            .iter()
            .filter(|row| row.is_finished(label))
            .map(|row| (TorrentDescriptor::new(&row.hash), row.status()))
            .collect();
        tracing::debug!(
            total = rows.len(),
            finished = finished.len(),
            "rutorrent listing parsed"
        );
        Ok(finished)
    }

    async fn resolve_filename(&mut self, descriptor: &TorrentDescriptor) -> Result<String> {
        self.cache
            .as_ref()
            .and_then(|cache| cache.base_path_for_hash.get(descriptor.as_str()))
            .map(|path| remote_basename(path).to_string())
            .ok_or_else(|| Error::CacheMiss(descriptor.to_string()))
    }

    async fn transfer(&mut self, filename: &str) -> Result<i32> {
        let source = format!("{}:{}", self.ssh_host(), self.cached_path(filename)?);
        self.transport.rsync(&source, &self.download_dir).await
    }

    async fn exists_remotely(&mut self, filename: &str) -> Result<bool> {
        let path = self.cached_path(filename)?.to_string();
        remote_test_minus_e(self.transport.as_ref(), &self.ssh_host(), &path).await
    }

    async fn remove_remote(&mut self, filename: &str) -> Result<()> {
        let hash = self
            .cache
            .as_ref()
            .and_then(|cache| cache.hash_for_filename.get(filename))
            .cloned()
            .ok_or_else(|| Error::CacheMiss(filename.to_string()))?;

        let erase = Multicall::new(&[
            ("d.custom5.set", vec![hash.as_str(), "1"]),
            ("d.delete_tied", vec![hash.as_str()]),
            ("d.erase", vec![hash.as_str()]),
        ]);
        let response = self
            .post(self.endpoint(LIST_ENDPOINT)?)
            .header(CONTENT_TYPE, "text/xml")
            .body(erase.body()?)
            .send()
            .await?;
        let body = self.check_status(response, "erasing a torrent").await?;

        let results = erase.results(body)?;
        for (method, result) in ["d.delete_tied", "d.erase"].into_iter().zip(&results[1..]) {
            if multicall::integer(result) != Some(0) {
                return Err(Error::InvariantViolation(format!(
                    "{method} returned {result:?}"
                )));
            }
        }
        tracing::debug!(filename, hash = %hash, "torrent erased from rutorrent");
        Ok(())
    }

    async fn upload_magnet_link(&mut self, uri: &str) -> Result<()> {
        let request = self
            .post(self.endpoint(UPLOAD_ENDPOINT)?)
            .form(&[("url", uri)]);
        self.upload(request, uri.to_string()).await
    }

    async fn upload_torrent(&mut self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("application/x-bittorrent")?;
        let form = reqwest::multipart::Form::new().part("torrent_file", part);

        let request = self.post(self.endpoint(UPLOAD_ENDPOINT)?).multipart(form);
        self.upload(request, file_name).await
    }
}
