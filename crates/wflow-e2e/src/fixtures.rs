//! Plugins directory fixtures.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::echo::{MODULE_TYPE, SLEEP_STEP_TYPE, STEP_TYPE, TRIGGER_TYPE};

/// Installs `executable` as plugin `name` under `root` with a manifest
/// declaring `version` and the echo plugin's types.
///
/// The executable is copied to `<root>/<name>/<name>`, which is where the
/// host looks for it. Returns the plugin directory.
///
/// # Errors
///
/// Returns any I/O error raised while creating the directory, copying the
/// executable or writing `plugin.json`.
pub fn install_plugin(
    root: &Path,
    name: &str,
    version: &str,
    executable: &Path,
) -> io::Result<PathBuf> {
    let directory = root.join(name);
    fs::create_dir_all(&directory)?;
    fs::copy(executable, directory.join(name))?;
    write_manifest(&directory, name, version)?;
    Ok(directory)
}

/// Rewrites the manifest of an installed plugin.
///
/// # Errors
///
/// Returns the I/O error raised while writing `plugin.json`.
pub fn write_manifest(directory: &Path, name: &str, version: &str) -> io::Result<()> {
    let manifest = json!({
        "name": name,
        "version": version,
        "author": "wflow",
        "description": "echo plugin under test",
        "moduleTypes": [MODULE_TYPE],
        "stepTypes": [STEP_TYPE, SLEEP_STEP_TYPE],
        "triggerTypes": [TRIGGER_TYPE],
    });
    fs::write(directory.join("plugin.json"), manifest.to_string())
}
