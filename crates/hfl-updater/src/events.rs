//! Events emitted by an update run.

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

/// Stage of the update state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    /// Nothing has happened yet.
    #[default]
    Start,
    /// Requesting the manifest.
    FetchingManifest,
    /// Deciding whether the launcher replaces itself.
    SelfUpdateCheck,
    /// Comparing major versions.
    MajorUpdateCheck,
    /// Comparing patch versions.
    HotfixCheck,
    /// Downloading the artifact at this index of the pass.
    Downloading(usize),
    /// Applying the artifact at this index of the pass.
    Applying(usize),
    /// Starting the target program or installer.
    Launching,
    /// The run has finished.
    Terminal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::FetchingManifest => write!(f, "fetching manifest"),
            Self::SelfUpdateCheck => write!(f, "self-update check"),
            Self::MajorUpdateCheck => write!(f, "major update check"),
            Self::HotfixCheck => write!(f, "hotfix check"),
            Self::Downloading(i) => write!(f, "downloading file {}", i + 1),
            Self::Applying(i) => write!(f, "applying file {}", i + 1),
            Self::Launching => write!(f, "launching"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Notification from the update worker to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// Progress update. `percent` is `None` for text-only updates.
    Progress {
        /// Overall progress, 0 to 100.
        percent: Option<u8>,
        /// Status text.
        text: String,
    },
    /// The target program should be started.
    LaunchProgramRequested(PathBuf),
    /// A major release installer should be started.
    LaunchInstallerRequested(PathBuf),
    /// Starting a program failed; the update itself succeeded.
    LaunchFailed {
        /// Program that failed to start.
        path: PathBuf,
        /// Spawn error detail.
        reason: String,
    },
    /// The self-update helper is running; this process should exit now.
    SelfUpdateHandoff {
        /// Path of the helper script.
        helper: PathBuf,
    },
    /// The run has finished. Always the last event.
    Finished {
        /// Whether the update pass succeeded.
        success: bool,
        /// Final status text.
        message: String,
    },
}

/// Sending half of the event channel.
///
/// Progress percentages never go backwards: a smaller value than one already
/// sent is raised to the previous value. A dropped receiver is ignored.
#[derive(Debug)]
pub struct EventSink {
    sender: Option<Sender<UpdateEvent>>,
    last_percent: u8,
}

impl EventSink {
    /// Creates a sink that forwards to `sender`.
    #[must_use]
    pub fn new(sender: Sender<UpdateEvent>) -> Self {
        Self {
            sender: Some(sender),
            last_percent: 0,
        }
    }

    /// Creates a sink that discards every event.
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            sender: None,
            last_percent: 0,
        }
    }

    /// Highest percentage sent so far.
    #[must_use]
    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Sends a progress update at `percent`, clamped to be monotonic.
    pub fn progress(&mut self, percent: u8, text: impl Into<String>) {
        self.emit(UpdateEvent::Progress {
            percent: Some(percent),
            text: text.into(),
        });
    }

    /// Sends a text-only progress update.
    pub fn status(&mut self, text: impl Into<String>) {
        self.emit(UpdateEvent::Progress {
            percent: None,
            text: text.into(),
        });
    }

    /// Sends any event.
    pub fn emit(&mut self, mut event: UpdateEvent) {
        if let UpdateEvent::Progress {
            percent: Some(p), ..
        } = &mut event
        {
            *p = (*p).min(100).max(self.last_percent);
            self.last_percent = *p;
        }
        tracing::trace!("event: {:?}", event);
        let dropped = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(event).is_err());
        if dropped {
            tracing::debug!("Event receiver dropped; continuing without presenter");
            self.sender = None;
        }
    }
}
