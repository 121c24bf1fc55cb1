//! Spawning plugin executables and reading their handshake.
//!
//! The plugin is started in its own directory with the handshake
//! environment set, stdin closed, and both output pipes captured. The first
//! line on stdout must be the announcement; it is parsed and verified
//! within the start timeout. Everything after it on stdout, and everything
//! on stderr, is forwarded to tracing.
//!
//! On any failure the child is killed and reaped before the error is
//! returned.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use tracing::debug;

use wflow_plugin_protocol::{Announcement, HandshakeConfig};

use crate::error::PluginError;

/// Tracing target for plugin process operations.
const PROCESS_TARGET: &str = "wflow_plugins::process";

/// A started plugin that has announced where it listens.
#[derive(Debug)]
pub struct SpawnedPlugin {
    /// Running child process.
    pub child: Child,
    /// Verified announcement.
    pub announcement: Announcement,
}

/// Spawns `executable` and waits for a valid announcement.
///
/// # Errors
///
/// Returns [`PluginError::ExecutableNotFound`] or
/// [`PluginError::SpawnFailed`] when the process cannot start,
/// [`PluginError::ExitedDuringHandshake`] when stdout closes first,
/// [`PluginError::HandshakeTimeout`] when nothing arrives in time, and
/// [`PluginError::Handshake`] when the line is malformed or incompatible.
pub fn spawn_plugin(
    name: &str,
    executable: &Path,
    directory: &Path,
    handshake: &HandshakeConfig,
    start_timeout: Duration,
) -> Result<SpawnedPlugin, PluginError> {
    let mut command = Command::new(executable);
    command
        .current_dir(directory)
        .envs(handshake.environment())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(
        target: PROCESS_TARGET,
        plugin = name,
        executable = %executable.display(),
        "spawning plugin process"
    );

    let mut child = command.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            PluginError::ExecutableNotFound {
                name: name.to_owned(),
                path: executable.to_path_buf(),
            }
        } else {
            PluginError::SpawnFailed {
                name: name.to_owned(),
                message: err.to_string(),
                source: Some(Arc::new(err)),
            }
        }
    })?;

    match await_announcement(name, &mut child, handshake, start_timeout) {
        Ok(announcement) => {
            debug!(
                target: PROCESS_TARGET,
                plugin = name,
                pid = child.id(),
                network = %announcement.network,
                address = %announcement.address,
                "plugin announced itself"
            );
            Ok(SpawnedPlugin {
                child,
                announcement,
            })
        }
        Err(error) => {
            reap(&mut child);
            Err(error)
        }
    }
}

/// Kills and waits for `child`, ignoring failures from an already exited
/// process.
pub(crate) fn reap(child: &mut Child) {
    drop(child.kill());
    drop(child.wait());
}

fn await_announcement(
    name: &str,
    child: &mut Child,
    handshake: &HandshakeConfig,
    start_timeout: Duration,
) -> Result<Announcement, PluginError> {
    let missing_pipe = |pipe: &str| PluginError::SpawnFailed {
        name: name.to_owned(),
        message: format!("failed to capture {pipe}"),
        source: None,
    };
    let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

    forward_lines(name, "stderr", stderr, None)?;
    let (sender, receiver) = mpsc::sync_channel(1);
    forward_lines(name, "stdout", stdout, Some(sender))?;

    match receiver.recv_timeout(start_timeout) {
        Ok(Some(line)) => {
            let announcement =
                Announcement::parse(&line).map_err(|source| PluginError::Handshake {
                    name: name.to_owned(),
                    source,
                })?;
            announcement
                .verify(handshake)
                .map_err(|source| PluginError::Handshake {
                    name: name.to_owned(),
                    source,
                })?;
            Ok(announcement)
        }
        Ok(None) | Err(RecvTimeoutError::Disconnected) => Err(PluginError::ExitedDuringHandshake {
            name: name.to_owned(),
        }),
        Err(RecvTimeoutError::Timeout) => Err(PluginError::HandshakeTimeout {
            name: name.to_owned(),
            timeout_ms: start_timeout.as_millis(),
        }),
    }
}

/// Reads `pipe` line by line on a background thread.
///
/// With a `first` sender the first line (or `None` at EOF) is handed over
/// instead of being logged.
fn forward_lines(
    name: &str,
    stream: &'static str,
    pipe: impl Read + Send + 'static,
    first: Option<SyncSender<Option<String>>>,
) -> Result<(), PluginError> {
    let plugin = name.to_owned();
    thread::Builder::new()
        .name(format!("plugin-{name}-{stream}"))
        .spawn(move || {
            let mut lines = BufReader::new(pipe).lines();
            if let Some(sender) = first {
                let line = lines.next().and_then(Result::ok);
                if sender.send(line).is_err() {
                    return;
                }
            }
            for line in lines.map_while(Result::ok) {
                debug!(target: PROCESS_TARGET, plugin = %plugin, stream, "{line}");
            }
        })
        .map(drop)
        .map_err(|err| PluginError::io(name, err))
}

#[cfg(test)]
mod tests;
