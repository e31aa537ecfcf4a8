//! Process and URI launching.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use tracing::{info, warn};

use crate::error::{ItchError, Result};

pub trait Launcher: Send + Sync {
    /// Runs `executable` and blocks until it exits. The exit status is not an
    /// error: a game that crashes still counts as a played session.
    fn run_executable(&self, executable: &Path) -> Result<()>;

    /// Hands `uri` to the platform URI handler and returns immediately.
    fn open_uri(&self, uri: &str) -> Result<()>;
}

pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn run_executable(&self, executable: &Path) -> Result<()> {
        let mut command = Command::new(executable);
        if let Some(dir) = executable.parent() {
            command.current_dir(dir);
        }

        let status = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| ItchError::LaunchFailed {
                path: executable.to_path_buf(),
                source,
            })?;

        if status.success() {
            info!(executable = %executable.display(), "Game exited");
        } else {
            warn!(
                executable = %executable.display(),
                status = %status,
                "Game exited with failure status"
            );
        }
        Ok(())
    }

    fn open_uri(&self, uri: &str) -> Result<()> {
        let mut command = uri_command(uri);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let pid = spawn_reaped(&mut command).map_err(|err| ItchError::UriOpenFailed {
            uri: uri.to_string(),
            details: err.to_string(),
        })?;
        info!(uri, pid, "Opened URI");
        Ok(())
    }
}

/// Spawns `command` without waiting for it, and waits on a background thread
/// so the exited child never lingers as a zombie of the bridge process.
fn spawn_reaped(command: &mut Command) -> std::io::Result<u32> {
    let mut child = command.spawn()?;
    let pid = child.id();

    let reaper = thread::Builder::new()
        .name(format!("reap-{}", pid))
        .spawn(move || match child.wait() {
            Ok(status) if !status.success() => {
                warn!(pid, status = %status, "URI opener exited with failure status")
            }
            Ok(_) => {}
            Err(err) => warn!(pid, error = %err, "Failed to wait for URI opener"),
        });
    if let Err(err) = reaper {
        warn!(pid, error = %err, "Failed to spawn URI opener reaper");
    }

    Ok(pid)
}

#[cfg(target_os = "macos")]
fn uri_command(uri: &str) -> Command {
    let mut command = Command::new("open");
    command.arg(uri);
    command
}

#[cfg(target_os = "windows")]
fn uri_command(uri: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", uri]);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn uri_command(uri: &str) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(uri);
    command
}

/// `<scheme>://games/<id>`, handled by the itch client.
pub fn game_uri(scheme: &str, game_id: &str) -> String {
    format!("{}://games/{}", scheme, game_id)
}
