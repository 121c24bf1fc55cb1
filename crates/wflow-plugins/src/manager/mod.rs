//! Process lifecycle management for external plugins.
//!
//! The [`PluginManager`] owns every running plugin. It locates plugin
//! directories under its root, validates manifests, asks a
//! [`PluginLauncher`] to start and connect the process, and keeps the
//! resulting [`ExternalPluginAdapter`] until the plugin is unloaded.
//!
//! One read-write lock guards the registry. Loads and unloads take it for
//! writing, so a plugin name never maps to two live processes; listings take
//! it for reading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::adapter::ExternalPluginAdapter;
use crate::discovery::{PluginDirectoryEntry, discover_plugins};
use crate::error::PluginError;
use crate::launcher::PluginLauncher;
use crate::manifest::PluginManifest;

const MANAGER_TARGET: &str = "wflow_plugins::manager";

type Registry = HashMap<String, Arc<ExternalPluginAdapter>>;

/// Loads, tracks and stops plugin processes.
pub struct PluginManager {
    plugins_dir: PathBuf,
    launcher: Arc<dyn PluginLauncher>,
    plugins: RwLock<Registry>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins_dir", &self.plugins_dir)
            .field("loaded", &self.loaded_plugins())
            .finish_non_exhaustive()
    }
}

impl PluginManager {
    /// Creates a manager for plugins under `plugins_dir`.
    #[must_use]
    pub fn new(plugins_dir: impl Into<PathBuf>, launcher: Arc<dyn PluginLauncher>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            launcher,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Root directory searched for plugins.
    #[must_use]
    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Names of installable plugins, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] when the root cannot be listed.
    pub fn available_plugins(&self) -> Result<Vec<String>, PluginError> {
        discover_plugins(&self.plugins_dir)
    }

    /// Starts plugin `name` and registers its adapter.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyLoaded`] without touching the running
    /// instance, or the process or transport error that stopped the load.
    /// A process started during a failed load is killed before returning.
    pub fn load_plugin(&self, name: &str) -> Result<Arc<ExternalPluginAdapter>, PluginError> {
        let mut plugins = self.write();
        if plugins.contains_key(name) {
            return Err(PluginError::AlreadyLoaded {
                name: name.to_owned(),
            });
        }

        let entry = self.locate(name)?;
        let manifest = PluginManifest::load(name, entry.manifest_path())?;
        manifest.validate()?;
        if !entry.executable_path().is_file() {
            return Err(PluginError::ExecutableNotFound {
                name: name.to_owned(),
                path: entry.executable_path().to_path_buf(),
            });
        }

        let client = self.launcher.launch(&entry, &manifest)?;
        let pid = client.pid();
        let adapter = Arc::new(ExternalPluginAdapter::new(manifest, client)?);
        plugins.insert(name.to_owned(), Arc::clone(&adapter));
        info!(
            target: MANAGER_TARGET,
            plugin = name,
            version = adapter.manifest().version(),
            pid = ?pid,
            "plugin loaded"
        );
        Ok(adapter)
    }

    /// Stops plugin `name`.
    ///
    /// In-flight calls to the plugin fail with a transport error.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] when no such plugin is running.
    pub fn unload_plugin(&self, name: &str) -> Result<(), PluginError> {
        let removed = self.write().remove(name);
        let Some(adapter) = removed else {
            return Err(PluginError::NotLoaded {
                name: name.to_owned(),
            });
        };
        adapter.client().kill();
        info!(target: MANAGER_TARGET, plugin = name, "plugin unloaded");
        Ok(())
    }

    /// Stops plugin `name` if it is running, then loads it again.
    ///
    /// # Errors
    ///
    /// Returns any error from the fresh load.
    pub fn reload_plugin(&self, name: &str) -> Result<Arc<ExternalPluginAdapter>, PluginError> {
        match self.unload_plugin(name) {
            Ok(()) | Err(PluginError::NotLoaded { .. }) => {}
            Err(error) => return Err(error),
        }
        self.load_plugin(name)
    }

    /// Names of running plugins, sorted.
    #[must_use]
    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether plugin `name` is running.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Adapter for plugin `name` while it is running.
    #[must_use]
    pub fn adapter(&self, name: &str) -> Option<Arc<ExternalPluginAdapter>> {
        self.read().get(name).cloned()
    }

    /// Stops every plugin and empties the registry.
    pub fn shutdown(&self) {
        let drained: Vec<(String, Arc<ExternalPluginAdapter>)> = self.write().drain().collect();
        for (name, adapter) in drained {
            debug!(target: MANAGER_TARGET, plugin = %name, "stopping plugin");
            adapter.client().kill();
        }
        info!(target: MANAGER_TARGET, "plugin manager shut down");
    }

    fn locate(&self, name: &str) -> Result<PluginDirectoryEntry, PluginError> {
        let not_found = || PluginError::NotFound {
            name: name.to_owned(),
            directory: self.plugins_dir.clone(),
        };
        if !is_plain_name(name) {
            warn!(target: MANAGER_TARGET, plugin = name, "rejecting plugin name");
            return Err(not_found());
        }
        let entry = PluginDirectoryEntry::locate(&self.plugins_dir, name);
        if entry.directory().is_dir() {
            Ok(entry)
        } else {
            Err(not_found())
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.plugins.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        let plugins = self.plugins.get_mut().unwrap_or_else(PoisonError::into_inner);
        for adapter in plugins.values() {
            adapter.client().kill();
        }
        plugins.clear();
    }
}

/// A name that maps to exactly one directory below the root.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
