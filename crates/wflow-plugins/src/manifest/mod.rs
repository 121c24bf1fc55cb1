//! Plugin manifest read from `plugin.json`.
//!
//! The manifest is the static description of a plugin on disk. The type
//! lists it declares are informational; the callable type lists always come
//! from the running plugin.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Static description of a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    name: String,
    version: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    module_types: Vec<String>,
    #[serde(default)]
    step_types: Vec<String>,
    #[serde(default)]
    trigger_types: Vec<String>,
}

impl PluginManifest {
    /// Creates a manifest with the required identity fields.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Sets the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the declared module types.
    #[must_use]
    pub fn with_module_types(mut self, types: Vec<String>) -> Self {
        self.module_types = types;
        self
    }

    /// Sets the declared step types.
    #[must_use]
    pub fn with_step_types(mut self, types: Vec<String>) -> Self {
        self.step_types = types;
        self
    }

    /// Sets the declared trigger types.
    #[must_use]
    pub fn with_trigger_types(mut self, types: Vec<String>) -> Self {
        self.trigger_types = types;
        self
    }

    /// Reads and parses a manifest file.
    ///
    /// `name` identifies the plugin in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] when the file cannot be read or
    /// parsed.
    pub fn load(name: &str, path: &Path) -> Result<Self, PluginError> {
        let text = fs::read_to_string(path).map_err(|error| PluginError::Manifest {
            name: name.to_owned(),
            message: format!("cannot read {}: {error}", path.display()),
        })?;
        serde_json::from_str(&text).map_err(|error| PluginError::Manifest {
            name: name.to_owned(),
            message: format!("cannot parse {}: {error}", path.display()),
        })
    }

    /// Checks required fields and type name syntax.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] describing the first problem.
    pub fn validate(&self) -> Result<(), PluginError> {
        let fail = |message: String| PluginError::Manifest {
            name: self.name.clone(),
            message,
        };
        if self.name.trim().is_empty() {
            return Err(fail(String::from("name must not be empty")));
        }
        if self.version.trim().is_empty() {
            return Err(fail(String::from("version must not be empty")));
        }
        let declared = [
            ("moduleTypes", &self.module_types),
            ("stepTypes", &self.step_types),
            ("triggerTypes", &self.trigger_types),
        ];
        for (field, types) in declared {
            if let Some(bad) = types.iter().find(|candidate| !is_valid_type_name(candidate)) {
                return Err(fail(format!("{field} contains invalid type name '{bad}'")));
            }
        }
        Ok(())
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Plugin author.
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Short description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared module types.
    #[must_use]
    pub fn module_types(&self) -> &[String] {
        &self.module_types
    }

    /// Declared step types.
    #[must_use]
    pub fn step_types(&self) -> &[String] {
        &self.step_types
    }

    /// Declared trigger types.
    #[must_use]
    pub fn trigger_types(&self) -> &[String] {
        &self.trigger_types
    }
}

/// Type names start with a letter and use letters, digits, `.`, `-`, `_`
/// or `/`.
fn is_valid_type_name(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/'))
}

#[cfg(test)]
mod tests;
