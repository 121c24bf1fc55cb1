//! Tests for spawning plugins and reading their announcement.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rstest::rstest;
use tempfile::TempDir;

use super::*;

/// Serialises script creation and spawning so no forked child inherits a
/// script that is still open for writing.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("plugin.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn spawn(body: &str, timeout: Duration) -> (TempDir, Result<SpawnedPlugin, PluginError>) {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let dir = TempDir::new().expect("tempdir");
    let executable = script(dir.path(), body);
    let result = spawn_plugin(
        "sample",
        &executable,
        dir.path(),
        &HandshakeConfig::default(),
        timeout,
    );
    (dir, result)
}

#[test]
fn valid_announcement_is_returned_with_the_running_child() {
    let (dir, result) = spawn(
        "echo \"1|1|unix|$(pwd)/plugin.sock|$WFLOW_PLUGIN_MAGIC_COOKIE\"\nsleep 30",
        Duration::from_secs(5),
    );
    let mut spawned = result.expect("spawn succeeds");

    let expected = dir
        .path()
        .canonicalize()
        .expect("canonical dir")
        .join("plugin.sock");
    assert_eq!(Path::new(&spawned.announcement.address), expected);
    assert!(spawned.child.try_wait().expect("poll").is_none());
    reap(&mut spawned.child);
}

#[rstest]
#[case::exits_silently("exit 0")]
#[case::prints_nothing_then_exits("echo oops 1>&2\nexit 3")]
fn exiting_before_announcing_is_reported(#[case] body: &str) {
    let (_dir, result) = spawn(body, Duration::from_secs(5));
    assert!(matches!(
        result.expect_err("must fail"),
        PluginError::ExitedDuringHandshake { .. }
    ));
}

#[test]
fn silence_past_the_start_timeout_is_reported() {
    let (_dir, result) = spawn("sleep 30", Duration::from_millis(200));
    let error = result.expect_err("must time out");
    assert!(
        matches!(error, PluginError::HandshakeTimeout { timeout_ms: 200, .. }),
        "unexpected error: {error}"
    );
}

#[rstest]
#[case::wrong_cookie("echo \"1|1|tcp|127.0.0.1:9|not-the-cookie\"\nsleep 30")]
#[case::wrong_version("echo \"1|7|tcp|127.0.0.1:9|$WFLOW_PLUGIN_MAGIC_COOKIE\"\nsleep 30")]
#[case::garbage("echo hello\nsleep 30")]
fn incompatible_announcements_are_rejected(#[case] body: &str) {
    let (_dir, result) = spawn(body, Duration::from_secs(5));
    assert!(matches!(
        result.expect_err("must fail"),
        PluginError::Handshake { .. }
    ));
}

#[test]
fn missing_executable_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let error = spawn_plugin(
        "sample",
        &dir.path().join("absent"),
        dir.path(),
        &HandshakeConfig::default(),
        Duration::from_secs(1),
    )
    .expect_err("must fail");
    assert!(matches!(error, PluginError::ExecutableNotFound { .. }));
}
