//! Shared helpers for the end-to-end leech tests
//!
//! [`FakeSeedbox`] stands in for `ssh` and `rsync`: it keeps an in-memory set of
//! remote paths, answers `test -e` and `rm -rf`, and materializes rsync'ed names as
//! directories in the local destination.

#![allow(dead_code)]

use async_trait::async_trait;
use seedboxtools::transport::Transport;
use seedboxtools::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

/// In-memory seedbox reachable through the [`Transport`] trait
#[derive(Default)]
pub struct FakeSeedbox {
    remote_paths: Mutex<BTreeSet<String>>,
    outputs: Mutex<HashMap<String, String>>,
    rsync_codes: Mutex<HashMap<String, i32>>,
    commands: Mutex<Vec<Vec<String>>>,
}

impl FakeSeedbox {
    /// Seedbox holding `paths`
    pub fn with_paths(paths: &[&str]) -> Self {
        let seedbox = Self::default();
        seedbox
            .remote_paths
            .lock()
            .unwrap()
            .extend(paths.iter().map(|p| p.to_string()));
        seedbox
    }

    /// Answer any remote command containing `needle` with `stdout`
    pub fn answer(self, needle: &str, stdout: &str) -> Self {
        self.outputs
            .lock()
            .unwrap()
            .insert(needle.to_string(), stdout.to_string());
        self
    }

    /// Make the rsync of `remote_path` exit with `code` without copying anything
    pub fn rsync_fails(self, remote_path: &str, code: i32) -> Self {
        self.rsync_codes
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), code);
        self
    }

    /// Whether `path` still exists on the seedbox
    pub fn has(&self, path: &str) -> bool {
        self.remote_paths.lock().unwrap().contains(path)
    }

    /// Every command line run so far
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    /// Number of rsync invocations so far
    pub fn rsync_count(&self) -> usize {
        self.commands()
            .iter()
            .filter(|cmdline| cmdline.first().is_some_and(|c| c == "rsync"))
            .count()
    }

    fn record(&self, cmdline: &[String]) {
        self.commands.lock().unwrap().push(cmdline.to_vec());
    }
}

/// Undo the shell quoting of an `ssh` remote command (arguments contain no quotes)
pub fn unquote(remote: &str) -> Vec<String> {
    remote
        .trim_matches('\'')
        .split("' '")
        .map(str::to_string)
        .collect()
}

fn remote_command(cmdline: &[String]) -> Result<Vec<String>> {
    match cmdline {
        [ssh, .., quoted] if ssh == "ssh" => Ok(unquote(quoted)),
        _ => Err(Error::ExternalTool(format!("unexpected command {cmdline:?}"))),
    }
}

#[async_trait]
impl Transport for FakeSeedbox {
    async fn output(&self, cmdline: &[String]) -> Result<String> {
        self.record(cmdline);
        let remote = remote_command(cmdline)?.join(" ");
        let outputs = self.outputs.lock().unwrap();
        outputs
            .iter()
            .find(|(needle, _)| remote.contains(needle.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .ok_or(Error::CommandFailed {
                command: remote,
                code: 127,
            })
    }

    async fn passthru(&self, cmdline: &[String]) -> Result<i32> {
        self.record(cmdline);

        if cmdline.first().is_some_and(|c| c == "rsync") {
            let source = &cmdline[cmdline.len() - 2];
            let destination = Path::new(&cmdline[cmdline.len() - 1]);
            let (_, remote_path) = source.split_once(':').unwrap();
            if let Some(code) = self.rsync_codes.lock().unwrap().get(remote_path) {
                return Ok(*code);
            }
            if !self.has(remote_path) {
                return Ok(23);
            }
            let name = remote_path.rsplit('/').next().unwrap();
            let local = destination.join(name);
            std::fs::create_dir_all(&local).unwrap();
            std::fs::write(local.join("payload.bin"), b"payload").unwrap();
            return Ok(0);
        }

        let remote = remote_command(cmdline)?;
        match remote.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["test", "-e", path] => Ok(if self.has(path) { 0 } else { 1 }),
            ["rm", "-rf", path] => {
                self.remote_paths.lock().unwrap().remove(*path);
                Ok(0)
            }
            other => Err(Error::ExternalTool(format!("unexpected remote command {other:?}"))),
        }
    }
}
