//! Host-side stand-ins for objects living in a plugin process.
//!
//! Each proxy holds an instance name, the opaque handle the plugin returned
//! from its create call, and the service stub. Every lifecycle call issues
//! one RPC carrying the handle. A failed call surfaces as
//! [`PluginError::Transport`]; a non-empty `error` in the reply surfaces as
//! [`PluginError::Application`].

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use wflow_plugin_protocol::messages::{ErrorResponse, HandleResponse};

use crate::engine::{Module, PipelineContext, Step, StepResult, Trigger, ValueMap};
use crate::error::PluginError;
use crate::stub::{PluginService, StepInvocation};
use crate::template::TemplateEngine;

const PROXY_TARGET: &str = "wflow_plugins::proxy";

/// Turns a create reply into a handle.
fn created(
    operation: &'static str,
    reply: Result<HandleResponse, wflow_plugin_protocol::RpcError>,
) -> Result<String, PluginError> {
    let reply = reply.map_err(|source| PluginError::transport(operation, None, source))?;
    if !reply.error.is_empty() {
        return Err(PluginError::application(operation, None, reply.error));
    }
    if reply.handle.is_empty() {
        return Err(PluginError::application(
            operation,
            None,
            "plugin returned an empty handle",
        ));
    }
    Ok(reply.handle)
}

/// Turns a lifecycle reply into a unit result.
fn completed(
    operation: &'static str,
    handle: &str,
    reply: Result<ErrorResponse, wflow_plugin_protocol::RpcError>,
) -> Result<(), PluginError> {
    let reply = reply.map_err(|source| PluginError::transport(operation, Some(handle), source))?;
    if reply.error.is_empty() {
        Ok(())
    } else {
        Err(PluginError::application(operation, Some(handle), reply.error))
    }
}

/// Proxy for a plugin module.
#[derive(Clone)]
pub struct RemoteModule {
    name: String,
    handle: String,
    stub: Arc<dyn PluginService>,
}

impl fmt::Debug for RemoteModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteModule")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl RemoteModule {
    /// Asks the plugin to create a module of `type_name` and wraps the handle.
    ///
    /// # Errors
    ///
    /// Fails without building a proxy when the call fails, the plugin
    /// reports an error, or the handle is empty.
    pub fn create(
        stub: Arc<dyn PluginService>,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<Self, PluginError> {
        let handle = created("CreateModule", stub.create_module(type_name, name, config))?;
        debug!(target: PROXY_TARGET, type_name, name, handle = %handle, "module created");
        Ok(Self {
            name: name.to_owned(),
            handle,
            stub,
        })
    }

    /// Opaque handle assigned by the plugin.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Invokes a named service method on the module.
    ///
    /// # Errors
    ///
    /// Returns a transport or application error.
    pub fn invoke(&self, method: &str, args: &ValueMap) -> Result<ValueMap, PluginError> {
        let reply = self
            .stub
            .invoke_service(&self.handle, method, args)
            .map_err(|source| {
                PluginError::transport("InvokeService", Some(self.handle.as_str()), source)
            })?;
        if reply.error.is_empty() {
            Ok(reply.result)
        } else {
            Err(PluginError::application(
                "InvokeService",
                Some(self.handle.as_str()),
                reply.error,
            ))
        }
    }
}

impl Module for RemoteModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self) -> Result<(), PluginError> {
        completed("InitModule", &self.handle, self.stub.init_module(&self.handle))
    }

    fn start(&self) -> Result<(), PluginError> {
        completed("StartModule", &self.handle, self.stub.start_module(&self.handle))
    }

    fn stop(&self) -> Result<(), PluginError> {
        completed("StopModule", &self.handle, self.stub.stop_module(&self.handle))
    }

    fn destroy(&self) -> Result<(), PluginError> {
        completed(
            "DestroyModule",
            &self.handle,
            self.stub.destroy_module(&self.handle),
        )
    }
}

/// Proxy for a plugin step.
///
/// The step keeps its configuration unresolved and resolves placeholders
/// against the pipeline context on every execution.
#[derive(Clone)]
pub struct RemoteStep {
    name: String,
    handle: String,
    config: ValueMap,
    templates: TemplateEngine,
    stub: Arc<dyn PluginService>,
}

impl fmt::Debug for RemoteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStep")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RemoteStep {
    /// Asks the plugin to create a step of `type_name` and wraps the handle.
    ///
    /// # Errors
    ///
    /// Fails without building a proxy when the call fails, the plugin
    /// reports an error, or the handle is empty.
    pub fn create(
        stub: Arc<dyn PluginService>,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<Self, PluginError> {
        let handle = created("CreateStep", stub.create_step(type_name, name, config))?;
        debug!(target: PROXY_TARGET, type_name, name, handle = %handle, "step created");
        Ok(Self {
            name: name.to_owned(),
            handle,
            config: config.clone(),
            templates: TemplateEngine::new(),
            stub,
        })
    }

    /// Opaque handle assigned by the plugin.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }
}

impl Step for RemoteStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, context: &PipelineContext) -> Result<StepResult, PluginError> {
        let config = self.templates.resolve_map(&self.config, context)?;
        let invocation = StepInvocation {
            handle: self.handle.clone(),
            config,
            context: context.clone(),
        };
        let reply = self
            .stub
            .execute_step(&invocation)
            .map_err(|source| {
                PluginError::transport("ExecuteStep", Some(self.handle.as_str()), source)
            })?;
        if !reply.error.is_empty() {
            return Err(PluginError::application(
                "ExecuteStep",
                Some(self.handle.as_str()),
                reply.error,
            ));
        }
        Ok(StepResult {
            output: reply.output,
            stop_pipeline: reply.stop_pipeline,
        })
    }

    fn destroy(&self) -> Result<(), PluginError> {
        completed("DestroyStep", &self.handle, self.stub.destroy_step(&self.handle))
    }
}

/// Proxy for a plugin trigger.
///
/// Triggers share the module lifecycle calls on the wire: configure maps to
/// `InitModule`, and start, stop and destroy map to their module
/// counterparts.
#[derive(Clone)]
pub struct RemoteTrigger {
    inner: RemoteModule,
}

impl fmt::Debug for RemoteTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrigger")
            .field("name", &self.inner.name)
            .field("handle", &self.inner.handle)
            .finish_non_exhaustive()
    }
}

impl RemoteTrigger {
    /// Asks the plugin to create a trigger of `type_name` and wraps the
    /// handle.
    ///
    /// # Errors
    ///
    /// Fails without building a proxy when the call fails, the plugin
    /// reports an error, or the handle is empty.
    pub fn create(
        stub: Arc<dyn PluginService>,
        type_name: &str,
        name: &str,
        config: &ValueMap,
    ) -> Result<Self, PluginError> {
        RemoteModule::create(stub, type_name, name, config).map(|inner| Self { inner })
    }

    /// Opaque handle assigned by the plugin.
    #[must_use]
    pub fn handle(&self) -> &str {
        self.inner.handle()
    }
}

impl Trigger for RemoteTrigger {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn configure(&self) -> Result<(), PluginError> {
        self.inner.init()
    }

    fn start(&self) -> Result<(), PluginError> {
        self.inner.start()
    }

    fn stop(&self) -> Result<(), PluginError> {
        self.inner.stop()
    }

    fn destroy(&self) -> Result<(), PluginError> {
        self.inner.destroy()
    }
}

#[cfg(test)]
mod tests;
