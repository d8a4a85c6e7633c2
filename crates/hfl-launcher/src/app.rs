//! Settings resolution and the update run behind the binary.

use anyhow::{Context, Result};
use hfl_updater::{
    InterruptFlag, LaunchPolicy, Orchestrator, RunReport, UpdateOutcome, UpdaterSettings,
};

use crate::cli::Cli;
use crate::presenter::TerminalPresenter;

/// Loads the settings file and applies command-line overrides.
///
/// An explicit `--config` must exist; the default location may be absent.
pub fn resolve_settings(cli: &Cli) -> Result<UpdaterSettings> {
    let mut settings = match &cli.config {
        Some(path) => UpdaterSettings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => UpdaterSettings::load_or_default(&UpdaterSettings::config_path())
            .context("loading default settings")?,
    };

    if let Some(base_url) = &cli.base_url {
        settings.base_url.clone_from(base_url);
    }
    if let Some(dir) = &cli.install_dir {
        settings.install_root.clone_from(dir);
    }
    if let Some(comparator) = cli.comparator {
        settings.comparator = comparator.into();
    }
    if let Some(version) = &cli.installed_version {
        settings.installed_version.clone_from(version);
    }
    if cli.no_launch {
        settings.launch_policy = LaunchPolicy::Presenter;
    }

    settings.validate().context("invalid settings")?;
    Ok(settings)
}

/// Settings as TOML with credentials masked.
pub fn render_settings(settings: &UpdaterSettings) -> Result<String> {
    let mut shown = settings.clone();
    if let Some(auth) = shown.artifact_auth.as_mut() {
        auth.password = "********".to_string();
    }
    Ok(shown.to_toml()?)
}

/// Runs one update pass on a worker thread, rendering its events.
pub fn run_update(settings: UpdaterSettings) -> Result<UpdateOutcome> {
    let report_launch_requests = settings.launch_policy == LaunchPolicy::Presenter;
    let orchestrator = Orchestrator::with_defaults(settings)?
        .with_launcher_version(env!("CARGO_PKG_VERSION"))
        .with_relaunch_args(relaunch_args());
    let handle = orchestrator
        .spawn()
        .context("failed to start update worker")?;
    install_interrupt_handler(&handle.interrupt);

    let presenter = TerminalPresenter::new(report_launch_requests);
    for event in handle.events.iter() {
        presenter.handle(&event);
    }

    let outcome = handle.join();
    presenter.finish(&outcome);
    Ok(outcome)
}

/// Arguments of this process, passed on when the launcher restarts itself.
#[must_use]
pub fn relaunch_args() -> Vec<String> {
    std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

fn install_interrupt_handler(flag: &InterruptFlag) {
    let flag = flag.clone();
    if let Err(error) = ctrlc::set_handler(move || request_interrupt(&flag)) {
        tracing::warn!("Could not install Ctrl-C handler: {}", error);
    }
}

/// First Ctrl-C stops the run at the next file boundary; a second one exits.
fn request_interrupt(flag: &InterruptFlag) {
    if flag.is_set() {
        std::process::exit(130);
    }
    eprintln!("Stopping after the current file (press Ctrl-C again to quit now)");
    flag.interrupt();
}

/// Records the outcome under the install root. Failures are only logged.
pub fn write_report(settings: &UpdaterSettings, outcome: &UpdateOutcome) {
    let path = RunReport::default_path(&settings.install_root);
    if let Err(error) = RunReport::from_outcome(outcome).write_to(&path) {
        tracing::warn!("Could not write run report: {}", error);
    }
}

/// Process exit code for a finished run. A degraded launch still counts as success.
#[must_use]
pub fn exit_code(outcome: &UpdateOutcome) -> i32 {
    i32::from(!outcome.succeeded)
}
