//! Desktop notifications for the command line tools
//!
//! Log output goes through `tracing`. When a graphical session is available
//! (`DISPLAY` set and `notify-send` on `PATH`) the important messages are also
//! shown as desktop notifications. Quiet mode silences everything but errors.

use std::path::PathBuf;
use std::process::Stdio;

/// Summary line of every notification
const NOTIFICATION_TITLE: &str = "Seedbox tools";

/// Mirrors status messages and errors to desktop notifications
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    quiet: bool,
    app_name: String,
    notify_send: Option<PathBuf>,
}

impl Reporter {
    /// Reporter that never shows notifications
    pub fn silent() -> Self {
        Self::default()
    }

    /// Detect the graphical session for the program `app_name`
    pub fn detect(app_name: &str, quiet: bool) -> Self {
        let has_display = std::env::var_os("DISPLAY").is_some_and(|d| !d.is_empty());
        let notify_send = if has_display {
            which::which("notify-send").ok()
        } else {
            None
        };
        tracing::debug!(notifications = notify_send.is_some(), "reporter configured");
        Self {
            quiet,
            app_name: app_name.to_string(),
            notify_send,
        }
    }

    /// Whether status messages are suppressed
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Whether notifications are shown at all
    pub fn uses_notifications(&self) -> bool {
        self.notify_send.is_some()
    }

    /// Show a transient status notification
    pub fn message(&self, text: &str) {
        if !self.quiet {
            self.notify(text, true);
        }
    }

    /// Show a persistent error notification, even in quiet mode
    pub fn error(&self, text: &str) {
        self.notify(text, false);
    }

    /// Build the `notify-send` argument vector (without the program itself)
    pub(crate) fn notification_args(&self, text: &str, transient: bool) -> Vec<String> {
        let mut args = vec![
            "-a".to_string(),
            self.app_name.clone(),
            NOTIFICATION_TITLE.to_string(),
            capitalize(text),
        ];
        if transient {
            args.push("--hint=int:transient:1".to_string());
        }
        args
    }

    fn notify(&self, text: &str, transient: bool) {
        let Some(program) = self.notify_send.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let args = self.notification_args(text, transient);

        handle.spawn(async move {
            let status = tokio::process::Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) if !status.success() => {
                    tracing::debug!(code = ?status.code(), "notify-send failed");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "notify-send could not be started"),
            }
        });
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_notifications_carry_the_hint() {
        let reporter = Reporter {
            quiet: false,
            app_name: "leechtorrents".to_string(),
            notify_send: None,
        };
        assert_eq!(
            reporter.notification_args("download of x complete", true),
            vec![
                "-a",
                "leechtorrents",
                "Seedbox tools",
                "Download of x complete",
                "--hint=int:transient:1"
            ]
        );
        assert_eq!(reporter.notification_args("boom", false).len(), 4);
    }

    #[test]
    fn capitalize_handles_empty_and_unicode() {
        assert_eq!(capitalize(""), "");
        assert_eq!(capitalize("élan"), "Élan");
    }

    #[test]
    fn silent_reporter_never_notifies() {
        let reporter = Reporter::silent();
        assert!(!reporter.uses_notifications());
        reporter.message("nothing happens");
        reporter.error("nothing happens either");
    }
}
