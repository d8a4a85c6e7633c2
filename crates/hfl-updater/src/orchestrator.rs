//! The update decision state machine.
//!
//! One run walks these stages in a fixed order:
//!
//! ```text
//! Start -> FetchingManifest -> SelfUpdateCheck -> MajorUpdateCheck -> HotfixCheck
//!       -> Downloading(n) -> Applying(n) -> Launching -> Terminal
//! ```
//!
//! A newer launcher build short-circuits into a self-update handoff. A newer
//! major release downloads the installer and launches it. Otherwise the patch
//! files of a newer hotfix are downloaded, verified and applied in order, and
//! the target program is launched.
//!
//! Every outcome is reported as exactly one [`UpdateEvent::Finished`] followed
//! by the returned [`UpdateOutcome`]. Nothing is retried.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;

use crate::bootstrap::{SelfUpdateBootstrapper, SelfUpdateHandoff};
use crate::config::{LaunchPolicy, UpdaterSettings};
use crate::download::ArtifactDownloader;
use crate::error::{Result, UpdateError};
use crate::events::{EventSink, Stage, UpdateEvent};
use crate::launch::{DetachedLauncher, LaunchRequest, Launcher};
use crate::manifest::{ArtifactDescriptor, ManifestFetcher, UpdateManifest};
use crate::replace::AtomicReplacer;
use crate::state::LocalState;
use crate::transport::{HttpTransport, ReqwestTransport};

/// Name of the worker thread started by [`Orchestrator::spawn`].
pub const WORKER_THREAD_NAME: &str = "hfl-update";

/// Cooperative cancellation flag shared with the presentation layer.
///
/// Checked before the first network request and between patch files, never
/// in the middle of a file.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the run to stop at the next check.
    pub fn interrupt(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    /// Returns true once [`interrupt`](Self::interrupt) has been called.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// What the caller should do after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// The target program was (or should be) started.
    LaunchProgram(PathBuf),
    /// A major release installer was (or should be) started.
    LaunchInstaller(PathBuf),
    /// The self-update helper is running; exit the process immediately.
    SelfUpdateHandoff(PathBuf),
    /// Nothing; the run failed.
    None,
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Whether the update pass succeeded. True even when the final launch failed.
    pub succeeded: bool,
    /// Final status text.
    pub message: String,
    /// What happens next.
    pub follow_up: FollowUp,
    /// Set when the update succeeded but the program could not be started.
    pub launch_error: Option<String>,
    /// The failure, when `succeeded` is false.
    pub error: Option<UpdateError>,
    /// Stage the failure happened in.
    pub failed_at: Option<Stage>,
}

impl UpdateOutcome {
    fn failure(error: UpdateError, stage: Stage) -> Self {
        Self {
            succeeded: false,
            message: error.to_string(),
            follow_up: FollowUp::None,
            launch_error: None,
            error: Some(error),
            failed_at: Some(stage),
        }
    }

    /// Returns true when the process should exit for a self-update.
    #[must_use]
    pub fn is_handoff(&self) -> bool {
        matches!(self.follow_up, FollowUp::SelfUpdateHandoff(_))
    }

    /// Returns true when the update succeeded but the launch did not.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.succeeded && self.launch_error.is_some()
    }
}

/// Receiving side of a spawned run.
pub struct UpdateHandle {
    /// Events from the worker. Disconnects when the run is over.
    pub events: Receiver<UpdateEvent>,
    /// Cancellation flag for the run.
    pub interrupt: InterruptFlag,
    worker: JoinHandle<UpdateOutcome>,
}

impl UpdateHandle {
    /// Waits for the worker and returns its outcome.
    pub fn join(self) -> UpdateOutcome {
        self.worker.join().unwrap_or_else(|_| {
            tracing::error!("Update worker panicked");
            UpdateOutcome {
                succeeded: false,
                message: "update worker panicked".to_string(),
                follow_up: FollowUp::None,
                launch_error: None,
                error: None,
                failed_at: None,
            }
        })
    }
}

/// How a successful pass ends, before the launch stage.
enum Completion {
    Launch { path: PathBuf, installer: bool },
    Handoff(SelfUpdateHandoff),
}

/// Per-run bookkeeping: the event sink and the current stage.
struct Pass<'a> {
    events: &'a mut EventSink,
    stage: Stage,
}

impl Pass<'_> {
    fn enter(&mut self, stage: Stage) {
        tracing::debug!("Stage: {} -> {}", self.stage, stage);
        self.stage = stage;
    }
}

/// Drives one update run.
pub struct Orchestrator {
    settings: UpdaterSettings,
    transport: Arc<dyn HttpTransport>,
    launcher: Arc<dyn Launcher>,
    interrupt: InterruptFlag,
    launcher_version: String,
    relaunch_args: Vec<String>,
}

impl Orchestrator {
    /// Creates an orchestrator over the given transport and launcher.
    #[must_use]
    pub fn new(
        settings: UpdaterSettings,
        transport: Arc<dyn HttpTransport>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            settings,
            transport,
            launcher,
            interrupt: InterruptFlag::new(),
            launcher_version: crate::VERSION.to_string(),
            relaunch_args: Vec::new(),
        }
    }

    /// Creates an orchestrator with the `reqwest` transport and detached launcher.
    pub fn with_defaults(settings: UpdaterSettings) -> Result<Self> {
        let transport = ReqwestTransport::new(settings.timeout())
            .map_err(|e| UpdateError::Config(e.to_string()))?;
        Ok(Self::new(
            settings,
            Arc::new(transport),
            Arc::new(DetachedLauncher),
        ))
    }

    /// Uses `interrupt` as the cancellation flag for this run.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Version of the running launcher binary, compared against the
    /// server's launcher build. Defaults to this crate's version.
    #[must_use]
    pub fn with_launcher_version(mut self, version: impl Into<String>) -> Self {
        self.launcher_version = version.into();
        self
    }

    /// Arguments the launcher is restarted with after replacing itself.
    #[must_use]
    pub fn with_relaunch_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relaunch_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Settings of this run.
    #[must_use]
    pub fn settings(&self) -> &UpdaterSettings {
        &self.settings
    }

    /// The cancellation flag checked by this run.
    #[must_use]
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Runs on a dedicated worker thread.
    pub fn spawn(self) -> std::io::Result<UpdateHandle> {
        let (tx, rx) = mpsc::channel();
        let interrupt = self.interrupt_flag();
        let worker = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut events = EventSink::new(tx);
                self.run(&mut events)
            })?;

        Ok(UpdateHandle {
            events: rx,
            interrupt,
            worker,
        })
    }

    /// Runs the state machine on the current thread.
    pub fn run(&self, events: &mut EventSink) -> UpdateOutcome {
        let mut pass = Pass {
            events,
            stage: Stage::Start,
        };

        let outcome = match self.execute(&mut pass) {
            Ok(Completion::Handoff(handoff)) => {
                pass.events.progress(100, "Restarting to finish the launcher update");
                pass.events.emit(UpdateEvent::SelfUpdateHandoff {
                    helper: handoff.helper.clone(),
                });
                UpdateOutcome {
                    succeeded: true,
                    message: "Launcher update staged; restarting".to_string(),
                    follow_up: FollowUp::SelfUpdateHandoff(handoff.helper),
                    launch_error: None,
                    error: None,
                    failed_at: None,
                }
            }
            Ok(Completion::Launch { path, installer }) => self.launch(&mut pass, path, installer),
            Err(error) => {
                tracing::error!("Update failed during {}: {}", pass.stage, error);
                UpdateOutcome::failure(error, pass.stage)
            }
        };

        pass.enter(Stage::Terminal);
        pass.events.emit(UpdateEvent::Finished {
            success: outcome.succeeded,
            message: outcome.message.clone(),
        });
        outcome
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.is_set() {
            tracing::info!("Update interrupted");
            return Err(UpdateError::Interrupted);
        }
        Ok(())
    }

    fn downloader(&self) -> ArtifactDownloader {
        ArtifactDownloader::new(
            Arc::clone(&self.transport),
            &self.settings.base_url,
            self.settings.install_root.clone(),
        )
        .with_algorithm(self.settings.digest)
        .with_auth(self.settings.artifact_auth.clone())
    }

    fn execute(&self, pass: &mut Pass<'_>) -> Result<Completion> {
        let settings = &self.settings;
        let comparator = settings.comparator;

        self.check_interrupt()?;
        pass.enter(Stage::FetchingManifest);
        pass.events.progress(10, "Connecting to update server");
        let manifest =
            ManifestFetcher::new(Arc::clone(&self.transport)).fetch(&settings.base_url)?;

        pass.enter(Stage::SelfUpdateCheck);
        pass.events.progress(15, "Checking for launcher updates");
        if let (Some(self_settings), Some(info)) = (&settings.self_update, &manifest.self_update)
            && comparator.is_newer(
                &info.version,
                self_settings.running_version(&self.launcher_version),
            )?
        {
            tracing::info!(
                "Launcher {} available (running {})",
                info.version,
                self_settings.running_version(&self.launcher_version)
            );
            let downloader = self.downloader();
            let handoff = SelfUpdateBootstrapper::new(
                &downloader,
                &*self.launcher,
                self_settings,
            )
            .with_relaunch_args(&self.relaunch_args)
            .bootstrap_self_replace(info, pass.events)?;
            return Ok(Completion::Handoff(handoff));
        }

        pass.enter(Stage::MajorUpdateCheck);
        pass.events.progress(20, "Comparing versions");
        let major = comparator.compare(&manifest.latest_major_version, &settings.installed_version)?;
        tracing::info!(
            "Installed version {}, server version {}",
            settings.installed_version,
            manifest.latest_major_version
        );

        match major {
            Ordering::Greater => {
                pass.events.progress(
                    30,
                    format!("New version {} available", manifest.latest_major_version),
                );
                let path = self.install_major(pass, &manifest)?;
                return Ok(Completion::Launch {
                    path,
                    installer: true,
                });
            }
            Ordering::Less if !settings.hotfix_when_ahead => {
                tracing::info!("Installed version is ahead of the server; skipping hotfix check");
                return Ok(self.program_completion(&manifest));
            }
            _ => pass.events.progress(30, "Version is up to date"),
        }

        pass.enter(Stage::HotfixCheck);
        pass.events.progress(40, "Checking for hotfixes");
        if !manifest.has_patch_version() {
            tracing::info!("Server publishes no hotfix");
            return Ok(self.program_completion(&manifest));
        }

        let state = LocalState::new(settings.state_path());
        let local_patch = state.read(comparator)?;
        if !comparator.is_newer(&manifest.latest_patch_version, &local_patch)? {
            tracing::info!("Hotfix {} is already installed", local_patch);
            return Ok(self.program_completion(&manifest));
        }

        tracing::info!(
            "Applying hotfix {} over {} ({} file(s))",
            manifest.latest_patch_version,
            local_patch,
            manifest.patch_artifacts.len()
        );
        self.apply_patch(pass, &manifest.patch_artifacts)?;
        state.write(&manifest.latest_patch_version)?;
        pass.events.progress(
            100,
            format!("Hotfix {} installed", manifest.latest_patch_version),
        );

        Ok(self.program_completion(&manifest))
    }

    fn program_completion(&self, manifest: &UpdateManifest) -> Completion {
        Completion::Launch {
            path: self
                .settings
                .install_root
                .join(&manifest.target_program_path),
            installer: false,
        }
    }

    fn install_major(&self, pass: &mut Pass<'_>, manifest: &UpdateManifest) -> Result<PathBuf> {
        let name = self
            .settings
            .installer_artifact_name(&manifest.latest_major_version);
        let descriptor = ArtifactDescriptor::new(name, &manifest.major_artifact_digest);
        let downloader = self.downloader();

        pass.enter(Stage::Downloading(0));
        pass.events
            .progress(50, format!("Downloading installer {}", descriptor.name));
        let bytes = downloader.fetch_and_verify(&descriptor, pass.events)?;
        downloader.stage(&descriptor, &bytes)?;

        pass.enter(Stage::Applying(0));
        AtomicReplacer::new(&self.settings.install_root).apply(&descriptor)
    }

    fn apply_patch(&self, pass: &mut Pass<'_>, files: &[ArtifactDescriptor]) -> Result<()> {
        let downloader = self.downloader();
        let replacer = AtomicReplacer::new(&self.settings.install_root);
        let total = files.len();

        for (index, descriptor) in files.iter().enumerate() {
            self.check_interrupt()?;

            pass.enter(Stage::Downloading(index));
            pass.events.progress(
                file_percent(index, total),
                format!("Updating {} ({}/{})", descriptor.name, index + 1, total),
            );
            let bytes = downloader.fetch_and_verify(descriptor, pass.events)?;
            downloader.stage(descriptor, &bytes)?;

            pass.enter(Stage::Applying(index));
            replacer.apply(descriptor)?;
        }
        Ok(())
    }

    fn launch(&self, pass: &mut Pass<'_>, path: PathBuf, installer: bool) -> UpdateOutcome {
        pass.enter(Stage::Launching);
        let name = path.display().to_string();
        pass.events.progress(100, format!("Starting {name}"));

        let (request_event, message) = if installer {
            (
                UpdateEvent::LaunchInstallerRequested(path.clone()),
                "New version downloaded; starting installer",
            )
        } else {
            (
                UpdateEvent::LaunchProgramRequested(path.clone()),
                "Up to date",
            )
        };
        pass.events.emit(request_event);

        let mut launch_error = None;
        if self.settings.launch_policy == LaunchPolicy::Detached
            && let Err(e) = self.launcher.launch(&LaunchRequest::new(&path))
        {
            let reason = match &e {
                UpdateError::LaunchFailed { reason, .. } => reason.clone(),
                other => other.to_string(),
            };
            tracing::warn!("Update succeeded but {} could not be started: {}", name, reason);
            pass.events.emit(UpdateEvent::LaunchFailed {
                path: path.clone(),
                reason,
            });
            launch_error = Some(e.to_string());
        }

        let follow_up = if installer {
            FollowUp::LaunchInstaller(path)
        } else {
            FollowUp::LaunchProgram(path)
        };
        UpdateOutcome {
            succeeded: true,
            message: message.to_string(),
            follow_up,
            launch_error,
            error: None,
            failed_at: None,
        }
    }
}

/// Overall progress before file `index` of `total`: 40 to 100 in equal steps.
fn file_percent(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = 40 + index.min(total) * 60 / total;
    u8::try_from(percent).unwrap_or(100)
}
