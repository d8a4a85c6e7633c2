//! Terminal presentation of update events.

use std::time::Duration;

use hfl_updater::{UpdateEvent, UpdateOutcome};
use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner} [{bar:30}] {pos:>3}% {msg}";

/// Renders [`UpdateEvent`]s on a progress bar.
pub struct TerminalPresenter {
    bar: ProgressBar,
    /// Launch requests are printed because nothing else starts the program.
    report_launch_requests: bool,
}

impl TerminalPresenter {
    /// Creates a presenter drawing to stderr.
    #[must_use]
    pub fn new(report_launch_requests: bool) -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self::with_bar(bar, report_launch_requests)
    }

    /// Creates a presenter over an existing bar.
    #[must_use]
    pub fn with_bar(bar: ProgressBar, report_launch_requests: bool) -> Self {
        Self {
            bar,
            report_launch_requests,
        }
    }

    /// Applies one event to the bar.
    pub fn handle(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::Progress { percent, text } => {
                if let Some(percent) = percent {
                    self.bar.set_position(u64::from(*percent));
                }
                self.bar.set_message(text.clone());
            }
            UpdateEvent::LaunchFailed { .. } | UpdateEvent::SelfUpdateHandoff { .. } => {
                if let Some(line) = describe(event) {
                    self.bar.println(line);
                }
            }
            UpdateEvent::LaunchProgramRequested(_) | UpdateEvent::LaunchInstallerRequested(_) => {
                if self.report_launch_requests
                    && let Some(line) = describe(event)
                {
                    self.bar.println(line);
                }
            }
            UpdateEvent::Finished { success, message } => {
                if *success {
                    self.bar.finish_with_message(message.clone());
                } else {
                    self.bar.abandon_with_message(message.clone());
                }
            }
        }
    }

    /// Prints the closing summary.
    pub fn finish(&self, outcome: &UpdateOutcome) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
        if let Some(error) = &outcome.error {
            eprintln!("error: {}", error.user_message());
        } else if outcome.is_degraded() {
            eprintln!("warning: the update succeeded, but the program could not be started");
        }
    }
}

/// One-line description of events that deserve a line of their own.
#[must_use]
pub fn describe(event: &UpdateEvent) -> Option<String> {
    match event {
        UpdateEvent::LaunchProgramRequested(path) => {
            Some(format!("Start program: {}", path.display()))
        }
        UpdateEvent::LaunchInstallerRequested(path) => {
            Some(format!("Start installer: {}", path.display()))
        }
        UpdateEvent::LaunchFailed { path, reason } => Some(format!(
            "Could not start {}: {reason}",
            path.display()
        )),
        UpdateEvent::SelfUpdateHandoff { helper } => Some(format!(
            "Restarting to finish the launcher update ({})",
            helper.display()
        )),
        UpdateEvent::Progress { .. } | UpdateEvent::Finished { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(&UpdateEvent::LaunchInstallerRequested(PathBuf::from(
                "Setup_3.0.0.exe"
            ))),
            Some("Start installer: Setup_3.0.0.exe".to_string())
        );
        assert_eq!(
            describe(&UpdateEvent::LaunchFailed {
                path: PathBuf::from("app"),
                reason: "permission denied".to_string(),
            }),
            Some("Could not start app: permission denied".to_string())
        );
        assert_eq!(
            describe(&UpdateEvent::Progress {
                percent: Some(10),
                text: "Connecting".to_string(),
            }),
            None
        );
    }

    #[test]
    fn test_progress_moves_bar() {
        let presenter = TerminalPresenter::with_bar(ProgressBar::hidden(), false);
        presenter.handle(&UpdateEvent::Progress {
            percent: Some(40),
            text: "Checking for hotfixes".to_string(),
        });
        presenter.handle(&UpdateEvent::Progress {
            percent: None,
            text: "Verifying a.dll".to_string(),
        });

        assert_eq!(presenter.bar.position(), 40);
        assert_eq!(presenter.bar.message(), "Verifying a.dll");
    }

    #[test]
    fn test_finished_closes_bar() {
        let presenter = TerminalPresenter::with_bar(ProgressBar::hidden(), true);
        presenter.handle(&UpdateEvent::Finished {
            success: true,
            message: "Up to date".to_string(),
        });
        assert!(presenter.bar.is_finished());
    }
}
