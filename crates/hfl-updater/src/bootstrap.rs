//! Self-replacement of the running launcher.
//!
//! A running executable cannot overwrite its own image, so the new build is
//! staged as `self.tmp` beside it and a small helper script is started
//! detached. The script waits for this process to exit, moves the staged file
//! over the executable, relaunches it and deletes itself.
//!
//! The caller must exit promptly after [`SelfUpdateBootstrapper::bootstrap_self_replace`]
//! returns; this module never exits the process itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::SelfUpdateSettings;
use crate::download::{ArtifactDownloader, write_staged};
use crate::error::{Result, UpdateError};
use crate::events::EventSink;
use crate::launch::{LaunchRequest, Launcher};
use crate::manifest::{ArtifactDescriptor, SelfUpdateInfo};

/// File name of the staged launcher build.
pub const STAGED_SELF_NAME: &str = "self.tmp";

/// File name of the helper script on this platform.
#[cfg(windows)]
pub const HELPER_SCRIPT_NAME: &str = "self_update.bat";
/// File name of the helper script on this platform.
#[cfg(not(windows))]
pub const HELPER_SCRIPT_NAME: &str = "self_update.sh";

/// Result of a successful handoff; the process should exit now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfUpdateHandoff {
    /// Helper script that was started.
    pub helper: PathBuf,
    /// Staged replacement executable.
    pub staged: PathBuf,
    /// Executable that will be replaced.
    pub executable: PathBuf,
}

fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Double quotes for a batch argument. `%` is doubled so it is not expanded.
fn batch_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\"").replace('%', "%%"))
}

fn command_line(exe: String, args: &[String], quote: fn(&str) -> String) -> String {
    std::iter::once(exe)
        .chain(args.iter().map(String::as_str).map(quote))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders the POSIX shell helper.
///
/// `args` are passed to the relaunched executable unchanged.
#[must_use]
pub fn render_unix_script(
    executable: &Path,
    staged: &Path,
    args: &[String],
    delay: Duration,
) -> String {
    let exe = sh_quote(&executable.to_string_lossy());
    let staged = sh_quote(&staged.to_string_lossy());
    let relaunch = command_line(exe.clone(), args, sh_quote);
    format!(
        "#!/bin/sh\n\
         # Replace the launcher once it has exited\n\
         sleep {delay}\n\
         mv -f {staged} {exe}\n\
         chmod +x {exe}\n\
         {relaunch} >/dev/null 2>&1 &\n\
         rm -f -- \"$0\"\n",
        delay = delay.as_secs()
    )
}

/// Renders the Windows batch helper.
///
/// `ping -n N` waits roughly `N - 1` seconds and works on every Windows version.
#[must_use]
pub fn render_windows_script(
    executable: &Path,
    staged: &Path,
    args: &[String],
    delay: Duration,
) -> String {
    let exe = batch_quote(&executable.display().to_string());
    let relaunch = command_line(exe.clone(), args, batch_quote);
    format!(
        "@echo off\r\n\
         :: Replace the launcher once it has exited\r\n\
         ping -n {pings} 127.0.0.1 > nul\r\n\
         move /y {staged} {exe} > nul\r\n\
         start \"\" {relaunch}\r\n\
         del \"%~f0\"\r\n",
        pings = delay.as_secs() + 1,
        staged = batch_quote(&staged.display().to_string()),
    )
}

/// Renders the helper script for the current platform.
#[must_use]
pub fn render_helper_script(
    executable: &Path,
    staged: &Path,
    args: &[String],
    delay: Duration,
) -> String {
    if cfg!(windows) {
        render_windows_script(executable, staged, args, delay)
    } else {
        render_unix_script(executable, staged, args, delay)
    }
}

/// Stages a new launcher build and hands the swap to a helper process.
pub struct SelfUpdateBootstrapper<'a> {
    downloader: &'a ArtifactDownloader,
    launcher: &'a dyn Launcher,
    settings: &'a SelfUpdateSettings,
    relaunch_args: &'a [String],
}

impl<'a> SelfUpdateBootstrapper<'a> {
    /// Creates a bootstrapper.
    #[must_use]
    pub fn new(
        downloader: &'a ArtifactDownloader,
        launcher: &'a dyn Launcher,
        settings: &'a SelfUpdateSettings,
    ) -> Self {
        Self {
            downloader,
            launcher,
            settings,
            relaunch_args: &[],
        }
    }

    /// Arguments the replaced launcher is started with.
    #[must_use]
    pub fn with_relaunch_args(mut self, args: &'a [String]) -> Self {
        self.relaunch_args = args;
        self
    }

    /// Downloads, verifies and stages the new build, writes the helper script
    /// and starts it detached.
    ///
    /// Every failure is reported as [`UpdateError::SelfUpdateFailed`].
    pub fn bootstrap_self_replace(
        &self,
        info: &SelfUpdateInfo,
        events: &mut EventSink,
    ) -> Result<SelfUpdateHandoff> {
        self.run(info, events).map_err(|e| match e {
            UpdateError::SelfUpdateFailed(_) => e,
            other => UpdateError::SelfUpdateFailed(other.to_string()),
        })
    }

    fn run(&self, info: &SelfUpdateInfo, events: &mut EventSink) -> Result<SelfUpdateHandoff> {
        let executable = self.settings.executable_path()?;
        let dir = executable
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        tracing::info!("Downloading launcher {}", info.version);

        let descriptor = ArtifactDescriptor::new(&self.settings.artifact_name, &info.digest);
        let bytes = self.downloader.fetch_and_verify(&descriptor, events)?;

        let staged = dir.join(STAGED_SELF_NAME);
        write_staged(&staged, &bytes).map_err(UpdateError::SelfUpdateFailed)?;
        make_executable(&staged)?;

        let helper = dir.join(HELPER_SCRIPT_NAME);
        let script = render_helper_script(
            &executable,
            &staged,
            self.relaunch_args,
            self.settings.settle_delay(),
        );
        std::fs::write(&helper, script).map_err(|e| {
            UpdateError::SelfUpdateFailed(format!("failed to write {}: {e}", helper.display()))
        })?;
        tracing::info!("Created update script at: {}", helper.display());

        if let Err(e) = self.launcher.launch(&LaunchRequest::script(&helper)) {
            let _ = std::fs::remove_file(&helper);
            return Err(e);
        }

        tracing::info!("Update script launched; exiting for update");
        Ok(SelfUpdateHandoff {
            helper,
            staged,
            executable,
        })
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        UpdateError::SelfUpdateFailed(format!(
            "failed to set permissions on {}: {e}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::test_support::RecordingLauncher;
    use crate::transport::HttpResponse;
    use crate::transport::test_support::ScriptedTransport;
    use std::sync::Arc;

    const HELLO_MD5: &str = "65a8e27d8879283831b664bd8b7f0ad4";

    fn settings(dir: &Path) -> SelfUpdateSettings {
        SelfUpdateSettings {
            executable: Some(dir.join("launcher")),
            ..SelfUpdateSettings::new("launcher")
        }
    }

    fn info(digest: &str) -> SelfUpdateInfo {
        SelfUpdateInfo {
            version: "1.1.0".to_string(),
            digest: digest.to_string(),
        }
    }

    #[test]
    fn test_unix_script() {
        let args = vec!["--config".to_string(), "/etc/hfl/launcher.toml".to_string()];
        let script = render_unix_script(
            Path::new("/opt/hfl/launcher"),
            Path::new("/opt/hfl/self.tmp"),
            &args,
            Duration::from_secs(2),
        );
        insta::assert_snapshot!(script, @r#"
        #!/bin/sh
        # Replace the launcher once it has exited
        sleep 2
        mv -f '/opt/hfl/self.tmp' '/opt/hfl/launcher'
        chmod +x '/opt/hfl/launcher'
        '/opt/hfl/launcher' '--config' '/etc/hfl/launcher.toml' >/dev/null 2>&1 &
        rm -f -- "$0"
        "#);
    }

    #[test]
    fn test_windows_script() {
        let args = vec!["--base-url".to_string(), "http://updates.test/?a=%x".to_string()];
        let script = render_windows_script(
            Path::new(r"C:\HFL\launcher.exe"),
            Path::new(r"C:\HFL\self.tmp"),
            &args,
            Duration::from_secs(2),
        );
        assert!(script.starts_with("@echo off\r\n"));
        assert!(script.contains("ping -n 3 127.0.0.1 > nul"));
        assert!(script.contains(r#"move /y "C:\HFL\self.tmp" "C:\HFL\launcher.exe""#));
        assert!(script.contains(
            r#"start "" "C:\HFL\launcher.exe" "--base-url" "http://updates.test/?a=%%x""#
        ));
        assert!(script.ends_with("del \"%~f0\"\r\n"));
    }

    #[test]
    fn test_quotes_in_paths_are_escaped() {
        assert_eq!(sh_quote("/tmp/it's"), r"'/tmp/it'\''s'");
        assert_eq!(batch_quote(r#"say "hi""#), r#""say ""hi""""#);
    }

    #[test]
    fn test_handoff_stages_and_launches_helper() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default().route(
            "http://updates.test/updater/launcher",
            HttpResponse::new(200, "Hello, World!"),
        ));
        let downloader = ArtifactDownloader::new(transport, "http://updates.test", dir.path());
        let launcher = RecordingLauncher::default();
        let settings = settings(dir.path());

        let args = vec!["--install-dir".to_string(), "/srv/app".to_string()];

        let handoff = SelfUpdateBootstrapper::new(&downloader, &launcher, &settings)
            .with_relaunch_args(&args)
            .bootstrap_self_replace(&info(HELLO_MD5), &mut EventSink::disconnected())
            .unwrap();

        let script = std::fs::read_to_string(&handoff.helper).unwrap();
        assert!(script.contains("/srv/app"));
        assert_eq!(handoff.staged, dir.path().join("self.tmp"));
        assert_eq!(std::fs::read(&handoff.staged).unwrap(), b"Hello, World!");
        assert!(handoff.helper.exists());
        assert_eq!(
            launcher.launched(),
            vec![LaunchRequest::script(&handoff.helper)]
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&handoff.staged).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_bad_digest_is_self_update_failed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default().route(
            "http://updates.test/updater/launcher",
            HttpResponse::new(200, "corrupted"),
        ));
        let downloader = ArtifactDownloader::new(transport, "http://updates.test", dir.path());
        let launcher = RecordingLauncher::default();
        let settings = settings(dir.path());

        let err = SelfUpdateBootstrapper::new(&downloader, &launcher, &settings)
            .bootstrap_self_replace(&info(HELLO_MD5), &mut EventSink::disconnected())
            .unwrap_err();

        assert!(matches!(err, UpdateError::SelfUpdateFailed(ref m) if m.contains("integrity")));
        assert!(!dir.path().join(STAGED_SELF_NAME).exists());
        assert!(launcher.launched().is_empty());
    }

    #[test]
    fn test_helper_launch_failure_removes_script() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default().route(
            "http://updates.test/updater/launcher",
            HttpResponse::new(200, "Hello, World!"),
        ));
        let downloader = ArtifactDownloader::new(transport, "http://updates.test", dir.path());
        let launcher = RecordingLauncher::failing();
        let settings = settings(dir.path());

        let err = SelfUpdateBootstrapper::new(&downloader, &launcher, &settings)
            .bootstrap_self_replace(&info(HELLO_MD5), &mut EventSink::disconnected())
            .unwrap_err();

        assert!(matches!(err, UpdateError::SelfUpdateFailed(_)));
        assert!(!dir.path().join(HELPER_SCRIPT_NAME).exists());
    }
}
