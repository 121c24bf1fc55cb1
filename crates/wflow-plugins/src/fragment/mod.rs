//! Configuration fragments contributed by plugins.
//!
//! A plugin may ship a YAML fragment that is merged into the host
//! configuration before the engine builds its pipelines. Relative paths
//! stored under root-like keys (`root`, `*_root`, `*Root`) are rewritten to
//! live under the plugin directory so the fragment works wherever the plugin
//! is installed.

use std::cmp::Reverse;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::PluginError;

const FRAGMENT_TARGET: &str = "wflow_plugins::fragment";

/// Priority given to hooks that merge plugin fragments.
pub const PLUGIN_FRAGMENT_PRIORITY: i32 = 50;

/// Mutates the host configuration tree in place.
pub type ConfigTransformFn = Arc<dyn Fn(&mut Value) -> Result<(), PluginError> + Send + Sync>;

/// A named configuration transform applied before the engine starts.
#[derive(Clone)]
pub struct ConfigTransformHook {
    name: String,
    priority: i32,
    transform: ConfigTransformFn,
}

impl fmt::Debug for ConfigTransformHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigTransformHook")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl ConfigTransformHook {
    /// Creates a hook.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: i32, transform: ConfigTransformFn) -> Self {
        Self {
            name: name.into(),
            priority,
            transform,
        }
    }

    /// Hook name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hook priority. Higher runs first.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Applies the hook to `config`.
    ///
    /// # Errors
    ///
    /// Returns whatever the transform reports.
    pub fn apply(&self, config: &mut Value) -> Result<(), PluginError> {
        (self.transform)(config)
    }
}

/// Runs `hooks` against `config`, highest priority first.
///
/// Hooks with equal priority keep their relative order.
///
/// # Errors
///
/// Stops at and returns the first failing hook's error.
pub fn apply_hooks(hooks: &[ConfigTransformHook], config: &mut Value) -> Result<(), PluginError> {
    let mut ordered: Vec<&ConfigTransformHook> = hooks.iter().collect();
    ordered.sort_by_key(|hook| Reverse(hook.priority));
    for hook in ordered {
        debug!(target: FRAGMENT_TARGET, hook = hook.name(), priority = hook.priority, "applying config hook");
        hook.apply(config)?;
    }
    Ok(())
}

/// A parsed plugin fragment with its paths already rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFragment {
    plugin: String,
    tree: Value,
}

impl ConfigFragment {
    /// Parses `yaml` and rewrites relative root paths against `plugin_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Fragment`] when the YAML does not parse or the
    /// top level is not a mapping.
    pub fn parse(plugin: &str, yaml: &str, plugin_dir: &Path) -> Result<Self, PluginError> {
        let mut tree: Value = serde_yaml::from_str(yaml).map_err(|error| PluginError::Fragment {
            name: plugin.to_owned(),
            message: error.to_string(),
        })?;
        if !tree.is_object() {
            return Err(PluginError::Fragment {
                name: plugin.to_owned(),
                message: String::from("top level must be a mapping"),
            });
        }
        rewrite_paths(&mut tree, plugin_dir);
        Ok(Self {
            plugin: plugin.to_owned(),
            tree,
        })
    }

    /// The rewritten fragment tree.
    #[must_use]
    pub const fn tree(&self) -> &Value {
        &self.tree
    }

    /// Merges the fragment into `host`.
    ///
    /// Keys missing from the host are added. Nested mappings merge
    /// recursively and the host keeps its own scalars. Lists gain the
    /// fragment entries whose `name` the host list does not already have.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Fragment`] when `host` is neither null nor a
    /// mapping.
    pub fn merge_into(&self, host: &mut Value) -> Result<(), PluginError> {
        if host.is_null() {
            *host = Value::Object(serde_json::Map::new());
        }
        if !host.is_object() {
            return Err(PluginError::Fragment {
                name: self.plugin.clone(),
                message: String::from("host configuration is not a mapping"),
            });
        }
        merge_value(host, &self.tree);
        Ok(())
    }

    /// Wraps the fragment in a hook at [`PLUGIN_FRAGMENT_PRIORITY`].
    #[must_use]
    pub fn into_hook(self) -> ConfigTransformHook {
        let name = format!("plugin:{}", self.plugin);
        ConfigTransformHook::new(
            name,
            PLUGIN_FRAGMENT_PRIORITY,
            Arc::new(move |config: &mut Value| self.merge_into(config)),
        )
    }
}

fn is_root_key(key: &str) -> bool {
    key == "root" || key.ends_with("_root") || key.ends_with("Root")
}

fn is_relative_path(text: &str) -> bool {
    !text.is_empty()
        && !text.contains("{{")
        && !text.contains("://")
        && !Path::new(text).is_absolute()
}

fn rewrite_paths(value: &mut Value, plugin_dir: &Path) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                match entry {
                    Value::String(text) if is_root_key(key) && is_relative_path(text.as_str()) => {
                        *text = plugin_dir.join(text.as_str()).to_string_lossy().into_owned();
                    }
                    other => rewrite_paths(other, plugin_dir),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_paths(item, plugin_dir);
            }
        }
        _ => {}
    }
}

fn entry_name(value: &Value) -> Option<&str> {
    value.get("name").and_then(Value::as_str)
}

fn merge_value(host: &mut Value, fragment: &Value) {
    match (host, fragment) {
        (Value::Object(host_map), Value::Object(fragment_map)) => {
            for (key, incoming) in fragment_map {
                match host_map.get_mut(key) {
                    Some(existing) => merge_value(existing, incoming),
                    None => {
                        host_map.insert(key.clone(), incoming.clone());
                    }
                }
            }
        }
        (Value::Array(host_items), Value::Array(fragment_items)) => {
            for incoming in fragment_items {
                let duplicate = entry_name(incoming).is_some_and(|name| {
                    host_items.iter().any(|item| entry_name(item) == Some(name))
                });
                if !duplicate {
                    host_items.push(incoming.clone());
                }
            }
        }
        (existing, incoming) if existing.is_null() => *existing = incoming.clone(),
        _ => {}
    }
}

#[cfg(test)]
mod tests;
