//! Command line front ends
//!
//! `leechtorrents` downloads finished torrents (once, or forever with
//! `--run-every`) and `uploadtorrents` submits torrent files and magnet links.
//! Both read the same configuration file.

use crate::clients::{SeedboxBackend, SeedboxClient};
use crate::config::Config;
use crate::daemon::{self, Controller, DAEMON_LOG_FILE_NAME, LOCK_FILE_NAME};
use crate::error::{Error, Result, ToExitCode, exit_code};
use crate::leecher::{LeechOptions, Leecher};
use crate::report::Reporter;
use crate::transport::SystemTransport;
use crate::uploader::upload_all;
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Download finished torrents from a seedbox
#[derive(Debug, Parser)]
#[command(name = "leechtorrents", version, about)]
pub struct LeechArgs {
    /// Redirect standard output and standard error to this log file (relative to the download directory)
    #[arg(short = 'g', long, value_name = "FILE")]
    pub logfile: Option<PathBuf>,

    /// Daemonize after start; implies `--logfile .torrentleecher.log` unless given
    #[arg(short = 'D', long = "daemon")]
    pub daemon: bool,

    /// Run forever, starting a pass every SECONDS
    #[arg(short = 't', long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    pub run_every: Option<u64>,

    /// Remove downloaded torrents that are not seeding anymore
    #[arg(short = 'r', long)]
    pub remove_finished: bool,

    /// Run PROGRAM after each completed download, passing the downloaded name as first argument
    #[arg(short = 's', long, value_name = "PROGRAM")]
    pub run_processor_program: Option<PathBuf>,

    /// Lock the download directory
    #[arg(short = 'l', long, conflicts_with = "lock_homedir")]
    pub lock: bool,

    /// Lock the home directory instead
    #[arg(short = 'H', long)]
    pub lock_homedir: bool,

    /// Do not print anything, except for errors
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Configuration file (default: ~/.torrentleecher.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl LeechArgs {
    /// Lock file requested by `--lock` or `--lock-homedir`
    pub fn lock_path(&self, download_dir: &Path) -> Result<Option<PathBuf>> {
        if self.lock {
            return Ok(Some(download_dir.join(LOCK_FILE_NAME)));
        }
        if self.lock_homedir {
            let dirs = directories::BaseDirs::new()
                .ok_or_else(|| Error::config("cannot determine the home directory", "lock"))?;
            return Ok(Some(dirs.home_dir().join(LOCK_FILE_NAME)));
        }
        Ok(None)
    }

    /// Log file, resolved against the download directory
    pub fn log_path(&self, download_dir: &Path) -> Option<PathBuf> {
        match (&self.logfile, self.daemon) {
            (Some(file), _) => Some(download_dir.join(file)),
            (None, true) => Some(download_dir.join(DAEMON_LOG_FILE_NAME)),
            (None, false) => None,
        }
    }
}

/// Upload torrents and magnet links to the seedbox
#[derive(Debug, Parser)]
#[command(name = "uploadtorrents", version, about)]
pub struct UploadArgs {
    /// Show full error chains
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Configuration file (default: ~/.torrentleecher.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Torrent file or magnet link
    #[arg(value_name = "TORRENT", required = true, num_args = 1..)]
    pub torrents: Vec<String>,
}

/// Install the `fmt` subscriber on standard error
///
/// `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str, ansi: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(false),
        )
        .try_init();
    if let Err(e) = installed {
        eprintln!("failed to install tracing subscriber: {e}");
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    Config::load(&path)
}

/// Entry point of `leechtorrents`; returns the process exit code
pub fn leechtorrents(args: LeechArgs) -> i32 {
    let redirected = args.logfile.is_some() || args.daemon;
    init_logging(
        if args.quiet { "warn" } else { "info" },
        !redirected && std::io::stderr().is_terminal(),
    );

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "cannot load configuration, create ~/.torrentleecher.toml first");
            return e.exit_code();
        }
    };

    if let Err(e) = std::env::set_current_dir(config.download_dir()) {
        tracing::error!(dir = %config.download_dir().display(), error = %e, "cannot change to download directory");
        return exit_code::CHDIR;
    }
    let download_dir =
        std::env::current_dir().unwrap_or_else(|_| config.download_dir().to_path_buf());

    let processor_program = match &args.run_processor_program {
        Some(program) => match which::which(program) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                tracing::error!(program = %program.display(), error = %e, "program is not executable");
                return exit_code::INVALID_ARGUMENT;
            }
        },
        None => None,
    };

    let log_path = args.log_path(&download_dir);
    if let Some(log_path) = &log_path
        && let Err(e) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
    {
        tracing::error!(path = %log_path.display(), error = %e, "cannot open log file");
        return exit_code::NO_PERMISSION;
    }

    #[cfg(unix)]
    {
        if let Some(log_path) = &log_path {
            let detached = if args.daemon {
                daemon::daemonize(log_path)
            } else {
                daemon::redirect_output(log_path)
            };
            if let Err(e) = detached {
                tracing::error!(error = %e, "cannot redirect output to log file");
                return exit_code::NO_PERMISSION;
            }
        }
    }

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "cannot start async runtime");
            return exit_code::RUNTIME_ERROR;
        }
    };

    let options = LeechOptions {
        download_dir,
        remove_finished: args.remove_finished,
        processor_program,
    };
    runtime.block_on(run_leecher(args, config, options))
}

async fn run_leecher(args: LeechArgs, config: Config, options: LeechOptions) -> i32 {
    let cancel = CancellationToken::new();
    crate::spawn_signal_handler(cancel.clone());
    let reporter = Reporter::detect("leechtorrents", args.quiet);

    let _lock = match args.lock_path(&options.download_dir) {
        Ok(Some(path)) => match daemon::acquire_lock(&path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::error!(error = %e, "cannot acquire lock");
                reporter.error(&e.to_string());
                return e.exit_code();
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::error!(error = %e, "cannot determine lock file");
            return e.exit_code();
        }
    };

    let client = match SeedboxClient::from_config(&config, Arc::new(SystemTransport)) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "cannot set up seedbox client");
            reporter.error(&e.to_string());
            return e.exit_code();
        }
    };
    tracing::debug!(backend = client.name(), dir = %options.download_dir.display(), "seedbox client ready");

    let leecher = Leecher::new(client, options, reporter, cancel.clone());
    let run_every = args.run_every.map(Duration::from_secs);
    Controller::new(leecher, run_every, cancel).run().await
}

/// Entry point of `uploadtorrents`; returns the process exit code
pub fn uploadtorrents(args: UploadArgs) -> i32 {
    init_logging(
        if args.debug { "debug" } else { "info" },
        std::io::stderr().is_terminal(),
    );

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "cannot load configuration, create ~/.torrentleecher.toml first");
            return exit_code::NOT_CONFIGURED;
        }
    };

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "cannot start async runtime");
            return exit_code::RUNTIME_ERROR;
        }
    };
    runtime.block_on(async move {
        let reporter = Reporter::detect("uploadtorrents", false);
        match SeedboxClient::from_config(&config, Arc::new(SystemTransport)) {
            Ok(mut client) => upload_all(&mut client, &args.torrents, args.debug, &reporter).await,
            Err(e) => {
                tracing::error!(error = %e, "cannot set up seedbox client");
                e.exit_code()
            }
        }
    })
}
