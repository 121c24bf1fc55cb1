//! Plugin directory layout and discovery.
//!
//! A plugin lives in `<root>/<name>/` and consists of `plugin.json` plus an
//! executable named after the directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PluginError;

/// File name of the manifest inside a plugin directory.
pub const MANIFEST_FILE: &str = "plugin.json";

const DISCOVERY_TARGET: &str = "wflow_plugins::discovery";

/// Paths making up one plugin directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDirectoryEntry {
    name: String,
    directory: PathBuf,
    manifest_path: PathBuf,
    executable_path: PathBuf,
}

impl PluginDirectoryEntry {
    /// Computes the expected paths for plugin `name` under `root`.
    #[must_use]
    pub fn locate(root: &Path, name: &str) -> Self {
        let directory = root.join(name);
        Self {
            name: name.to_owned(),
            manifest_path: directory.join(MANIFEST_FILE),
            executable_path: directory.join(name),
            directory,
        }
    }

    /// Whether both the manifest and the executable are regular files.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.manifest_path.is_file() && self.executable_path.is_file()
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin directory, used as the process working directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of `plugin.json`.
    #[must_use]
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Path of the plugin executable.
    #[must_use]
    pub fn executable_path(&self) -> &Path {
        &self.executable_path
    }
}

/// Lists plugins under `root` that have both a manifest and an executable.
///
/// A missing `root` yields an empty list. Incomplete directories and plain
/// files are skipped. Names are sorted.
///
/// # Errors
///
/// Returns [`PluginError::Io`] when `root` exists but cannot be listed.
pub fn discover_plugins(root: &Path) -> Result<Vec<String>, PluginError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(PluginError::io("<discovery>", error)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_ok_and(|kind| kind.is_dir()) {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if PluginDirectoryEntry::locate(root, &name).is_complete() {
            names.push(name);
        } else {
            debug!(target: DISCOVERY_TARGET, plugin = %name, "skipping incomplete plugin directory");
        }
    }
    names.sort();
    Ok(names)
}
