//! Detached process launching.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[cfg(unix)]
use std::os::unix::process::CommandExt as _;
#[cfg(windows)]
use std::os::windows::process::CommandExt as _;

use crate::error::{Result, UpdateError};

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// A program to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Program path.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory; the program's directory when unset.
    pub working_dir: Option<PathBuf>,
}

impl LaunchRequest {
    /// Creates a request for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Request that runs a helper script with the platform shell.
    #[must_use]
    pub fn script(path: &Path) -> Self {
        let mut request = if cfg!(windows) {
            Self::new("cmd").arg("/c")
        } else {
            Self::new("sh")
        };
        request.args.push(path.to_string_lossy().into_owned());
        request.working_dir = path.parent().map(Path::to_path_buf);
        request
    }

    fn effective_working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref().or_else(|| {
            self.program
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
        })
    }
}

/// Starts programs without waiting for them.
pub trait Launcher: Send + Sync {
    /// Starts the program; returns once it has been spawned.
    fn launch(&self, request: &LaunchRequest) -> Result<()>;
}

/// Spawns fully detached processes that outlive the caller.
///
/// Standard streams go to null. On Unix the child gets its own process group;
/// on Windows it is detached from the console with no window.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<()> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = request.effective_working_dir() {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);

        tracing::info!("Launching {} {:?}", request.program.display(), request.args);
        cmd.spawn().map_err(|e| {
            tracing::error!("Failed to launch {}: {}", request.program.display(), e);
            UpdateError::LaunchFailed {
                path: request.program.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }
}
