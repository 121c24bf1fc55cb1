//! Presents a loaded plugin in the shape the engine registry expects.
//!
//! Type lists and the engine manifest always come from the live plugin,
//! never from `plugin.json`, so a plugin can add types without touching its
//! manifest on disk. Factories issue one create call each and either return
//! a complete proxy or an error.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use wflow_plugin_protocol::messages::{ManifestInfo, ModuleSchema};

use crate::client::PluginClient;
use crate::engine::{Module, ModuleFactory, Step, StepFactory, Trigger, TriggerFactory, ValueMap};
use crate::error::PluginError;
use crate::fragment::{ConfigFragment, ConfigTransformHook};
use crate::manifest::PluginManifest;
use crate::proxy::{RemoteModule, RemoteStep, RemoteTrigger};
use crate::stub::PluginService;

/// What the engine learns about a plugin when registering it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineManifest {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Plugin author.
    pub author: String,
    /// Plugin description.
    pub description: String,
    /// Module types the plugin can create.
    pub module_types: Vec<String>,
    /// Step types the plugin can create.
    pub step_types: Vec<String>,
    /// Trigger types the plugin can create.
    pub trigger_types: Vec<String>,
}

/// A bundled plugin asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    /// Raw bytes.
    pub content: Vec<u8>,
    /// MIME type reported by the plugin.
    pub content_type: String,
}

/// Engine-facing wrapper around one [`PluginClient`].
#[derive(Debug)]
pub struct ExternalPluginAdapter {
    manifest: PluginManifest,
    live: ManifestInfo,
    client: PluginClient,
}

impl ExternalPluginAdapter {
    /// Wraps `client`, fetching the live manifest.
    ///
    /// On failure the client is dropped, which kills the plugin.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the manifest call fails.
    pub fn new(manifest: PluginManifest, client: PluginClient) -> Result<Self, PluginError> {
        let live = client
            .stub()
            .manifest()
            .map_err(|source| PluginError::transport("GetManifest", None, source))?;
        Ok(Self {
            manifest,
            live,
            client,
        })
    }

    /// Plugin name from the on-disk manifest.
    #[must_use]
    pub fn name(&self) -> &str {
        self.manifest.name()
    }

    /// Manifest read from `plugin.json`.
    #[must_use]
    pub const fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Underlying client.
    #[must_use]
    pub const fn client(&self) -> &PluginClient {
        &self.client
    }

    fn stub(&self) -> Arc<dyn PluginService> {
        self.client.stub()
    }

    /// Manifest as reported by the running plugin, with live type lists.
    ///
    /// # Errors
    ///
    /// Returns a transport error when a type list cannot be fetched.
    pub fn engine_manifest(&self) -> Result<EngineManifest, PluginError> {
        let stub = self.stub();
        Ok(EngineManifest {
            name: self.live.name.clone(),
            version: self.live.version.clone(),
            author: self.live.author.clone(),
            description: self.live.description.clone(),
            module_types: live_types("GetModuleTypes", stub.module_types())?,
            step_types: live_types("GetStepTypes", stub.step_types())?,
            trigger_types: live_types("GetTriggerTypes", stub.trigger_types())?,
        })
    }

    /// One factory per live module type.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the type list cannot be fetched.
    pub fn module_factories(&self) -> Result<BTreeMap<String, ModuleFactory>, PluginError> {
        let stub = self.stub();
        let types = live_types("GetModuleTypes", stub.module_types())?;
        Ok(types
            .into_iter()
            .map(|type_name| {
                let stub = Arc::clone(&stub);
                let key = type_name.clone();
                let factory: ModuleFactory = Arc::new(move |name: &str, config: &ValueMap| {
                    RemoteModule::create(Arc::clone(&stub), &type_name, name, config)
                        .map(|module| Box::new(module) as Box<dyn Module>)
                });
                (key, factory)
            })
            .collect())
    }

    /// One factory per live step type.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the type list cannot be fetched.
    pub fn step_factories(&self) -> Result<BTreeMap<String, StepFactory>, PluginError> {
        let stub = self.stub();
        let types = live_types("GetStepTypes", stub.step_types())?;
        Ok(types
            .into_iter()
            .map(|type_name| {
                let stub = Arc::clone(&stub);
                let key = type_name.clone();
                let factory: StepFactory = Arc::new(move |name: &str, config: &ValueMap| {
                    RemoteStep::create(Arc::clone(&stub), &type_name, name, config)
                        .map(|step| Box::new(step) as Box<dyn Step>)
                });
                (key, factory)
            })
            .collect())
    }

    /// One factory per live trigger type.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the type list cannot be fetched.
    pub fn trigger_factories(&self) -> Result<BTreeMap<String, TriggerFactory>, PluginError> {
        let stub = self.stub();
        let types = live_types("GetTriggerTypes", stub.trigger_types())?;
        Ok(types
            .into_iter()
            .map(|type_name| {
                let stub = Arc::clone(&stub);
                let key = type_name.clone();
                let factory: TriggerFactory = Arc::new(move |name: &str, config: &ValueMap| {
                    RemoteTrigger::create(Arc::clone(&stub), &type_name, name, config)
                        .map(|trigger| Box::new(trigger) as Box<dyn Trigger>)
                });
                (key, factory)
            })
            .collect())
    }

    /// Schemas the plugin publishes for its module types.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the call fails.
    pub fn module_schemas(&self) -> Result<Vec<ModuleSchema>, PluginError> {
        self.stub()
            .module_schemas()
            .map_err(|source| PluginError::transport("GetModuleSchemas", None, source))
    }

    /// Hooks merging the plugin's configuration fragment, if it has one.
    ///
    /// Relative paths are resolved against the directory the plugin reports,
    /// falling back to the directory it was loaded from.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the call fails and a fragment error
    /// when the YAML is invalid.
    pub fn config_transform_hooks(&self) -> Result<Vec<ConfigTransformHook>, PluginError> {
        let response = self
            .stub()
            .config_fragment()
            .map_err(|source| PluginError::transport("GetConfigFragment", None, source))?;
        if response.yaml_config.trim().is_empty() {
            return Ok(Vec::new());
        }
        let directory = if response.plugin_dir.is_empty() {
            self.client.directory().to_path_buf()
        } else {
            PathBuf::from(response.plugin_dir)
        };
        let fragment = ConfigFragment::parse(self.name(), &response.yaml_config, &directory)?;
        Ok(vec![fragment.into_hook()])
    }

    /// Fetches a bundled asset.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the call fails and an application
    /// error when the plugin reports one.
    pub fn asset(&self, path: &str) -> Result<Asset, PluginError> {
        let response = self
            .stub()
            .asset(path)
            .map_err(|source| PluginError::transport("GetAsset", None, source))?;
        if !response.error.is_empty() {
            return Err(PluginError::application("GetAsset", None, response.error));
        }
        Ok(Asset {
            content: response.content,
            content_type: response.content_type,
        })
    }
}

fn live_types(
    operation: &'static str,
    reply: Result<Vec<String>, wflow_plugin_protocol::RpcError>,
) -> Result<Vec<String>, PluginError> {
    reply.map_err(|source| PluginError::transport(operation, None, source))
}
