//! Local and remote command execution
//!
//! Every backend talks to its seedbox through three primitives: run a command and
//! capture its output, run a command with inherited stdio and return its exit code,
//! and mirror a remote path with `rsync`. Remote commands are argument vectors that
//! are shell-quoted into a single string and handed to `ssh` in batch mode, so a
//! missing key fails immediately instead of prompting for a password.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// Options passed to every `rsync` invocation
pub const RSYNC_OPTS: &[&str] = &[
    "-rtlDvzP",
    "--chmod=go+rX",
    "--chmod=u+rwX",
    "--executability",
];

/// Quote one argument for a POSIX shell
///
/// ```
/// use seedboxtools::transport::shell_quote;
///
/// assert_eq!(shell_quote("plain"), "'plain'");
/// assert_eq!(shell_quote("it's"), r"'it'\''s'");
/// ```
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Quote a command line in list form for SSH usage
pub fn quote_cmdline<S: AsRef<str>>(cmdline: &[S]) -> String {
    cmdline
        .iter()
        .map(|arg| shell_quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the `ssh` argument vector running `cmdline` on `host`
pub fn ssh_cmdline<S: AsRef<str>>(host: &str, cmdline: &[S]) -> Vec<String> {
    vec![
        "ssh".to_string(),
        "-o".to_string(),
        "BatchMode yes".to_string(),
        "-o".to_string(),
        "ForwardX11 no".to_string(),
        host.to_string(),
        quote_cmdline(cmdline),
    ]
}

/// Build the `rsync` argument vector copying `source` into `destination`
pub fn rsync_cmdline(source: &str, destination: &Path) -> Vec<String> {
    let mut cmdline = vec!["rsync".to_string()];
    cmdline.extend(RSYNC_OPTS.iter().map(|o| o.to_string()));
    cmdline.push("--".to_string());
    cmdline.push(source.to_string());
    cmdline.push(destination.display().to_string());
    cmdline
}

/// Convert an exit status to a single integer
///
/// Normal exits keep their code; processes killed by a signal yield the negated
/// signal number.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Command execution used by the seedbox clients
///
/// Implementations run argument vectors; the provided methods build the `ssh` and
/// `rsync` command lines on top of the two required ones.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command and return its standard output
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] for a non-zero exit, [`Error::Interrupted`] when
    /// the command was killed by a signal, and [`Error::ExternalTool`] when it could not
    /// be started.
    async fn output(&self, cmdline: &[String]) -> Result<String>;

    /// Run a command with inherited stdio and return its exit code
    ///
    /// A command killed by a signal returns the negated signal number.
    async fn passthru(&self, cmdline: &[String]) -> Result<i32>;

    /// Run `cmdline` on `host` through `ssh` and return its standard output
    async fn ssh_output(&self, host: &str, cmdline: &[String]) -> Result<String> {
        self.output(&ssh_cmdline(host, cmdline)).await
    }

    /// Run `cmdline` on `host` through `ssh` and return its exit code
    async fn ssh_passthru(&self, host: &str, cmdline: &[String]) -> Result<i32> {
        self.passthru(&ssh_cmdline(host, cmdline)).await
    }

    /// Mirror `source` (`host:path`) into the local `destination` directory
    async fn rsync(&self, source: &str, destination: &Path) -> Result<i32> {
        self.passthru(&rsync_cmdline(source, destination)).await
    }
}

/// Transport spawning real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTransport;

impl SystemTransport {
    fn command(cmdline: &[String]) -> Result<Command> {
        let (program, args) = cmdline
            .split_first()
            .ok_or_else(|| Error::ExternalTool("empty command line".to_string()))?;
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        Ok(command)
    }
}

#[async_trait]
impl Transport for SystemTransport {
    async fn output(&self, cmdline: &[String]) -> Result<String> {
        let joined = cmdline.join(" ");
        tracing::debug!(command = %joined, "running command");

        let output = Self::command(cmdline)?
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute {}: {}", cmdline[0], e)))?;

        match exit_code_of(output.status) {
            0 => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            code if code < 0 => Err(Error::Interrupted(joined)),
            code => Err(Error::CommandFailed {
                command: joined,
                code,
            }),
        }
    }

    async fn passthru(&self, cmdline: &[String]) -> Result<i32> {
        tracing::debug!(command = %cmdline.join(" "), "running command");

        let status = Self::command(cmdline)?
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute {}: {}", cmdline[0], e)))?;

        Ok(exit_code_of(status))
    }
}
