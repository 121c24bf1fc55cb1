//! HTTP management surface for operators and tools.
//!
//! Every response is a JSON envelope:
//!
//! ```json
//! {"status": "ok", "data": ...}
//! {"status": "error", "error": "plugin 'x' is not loaded"}
//! ```
//!
//! Manager calls block (a load spawns a process and waits for its
//! handshake), so handlers run them on the blocking thread pool.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;

use wflow_plugins::{ErrorLayer, PluginError, PluginManager, PluginManifest};

const API_TARGET: &str = "wflowd::api";

/// Outcome flag of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The operation succeeded.
    Ok,
    /// The operation failed; `error` says why.
    Error,
}

/// JSON body of every management response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope<T> {
    /// Outcome.
    pub status: Status,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    /// Successful envelope carrying `data`.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            status: Status::Ok,
            data: Some(data),
            error: None,
        }
    }

    /// Failed envelope carrying `error`.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Manifest summary returned by load and reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// Module types from the manifest.
    pub module_types: Vec<String>,
    /// Step types from the manifest.
    pub step_types: Vec<String>,
    /// Trigger types from the manifest.
    pub trigger_types: Vec<String>,
}

impl From<&PluginManifest> for PluginSummary {
    fn from(manifest: &PluginManifest) -> Self {
        Self {
            name: manifest.name().to_owned(),
            version: manifest.version().to_owned(),
            module_types: manifest.module_types().to_vec(),
            step_types: manifest.step_types().to_vec(),
            trigger_types: manifest.trigger_types().to_vec(),
        }
    }
}

/// Body of a successful unload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unloaded {
    /// Name of the stopped plugin.
    pub name: String,
}

#[derive(Clone)]
struct ApiState {
    manager: Arc<PluginManager>,
}

/// Builds the management router over `manager`.
#[must_use]
pub fn router(manager: Arc<PluginManager>) -> Router {
    Router::new()
        .route("/api/v1/plugins/available", get(available))
        .route("/api/v1/plugins/loaded", get(loaded))
        .route("/api/v1/plugins/{name}/load", post(load))
        .route("/api/v1/plugins/{name}/unload", post(unload))
        .route("/api/v1/plugins/{name}/reload", post(reload))
        .with_state(ApiState { manager })
}

async fn available(State(state): State<ApiState>) -> Response {
    run(move || state.manager.available_plugins()).await
}

async fn loaded(State(state): State<ApiState>) -> Response {
    run(move || Ok(state.manager.loaded_plugins())).await
}

async fn load(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    run(move || {
        let adapter = state.manager.load_plugin(&name)?;
        Ok(PluginSummary::from(adapter.manifest()))
    })
    .await
}

async fn unload(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    run(move || {
        state.manager.unload_plugin(&name)?;
        Ok(Unloaded { name })
    })
    .await
}

async fn reload(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    run(move || {
        let adapter = state.manager.reload_plugin(&name)?;
        Ok(PluginSummary::from(adapter.manifest()))
    })
    .await
}

async fn run<T, F>(operation: F) -> Response
where
    F: FnOnce() -> Result<T, PluginError> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(operation).await {
        Ok(Ok(data)) => (StatusCode::OK, Json(Envelope::ok(data))).into_response(),
        Ok(Err(error)) => {
            warn!(target: API_TARGET, %error, "management request failed");
            failure(status_for(&error), error.to_string())
        }
        Err(error) => failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("management task failed: {error}"),
        ),
    }
}

fn failure(status: StatusCode, message: String) -> Response {
    (status, Json(Envelope::<()>::error(message))).into_response()
}

/// HTTP status for a manager error.
#[must_use]
pub const fn status_for(error: &PluginError) -> StatusCode {
    match error {
        PluginError::NotFound { .. } => StatusCode::NOT_FOUND,
        PluginError::Manifest { .. } | PluginError::ExecutableNotFound { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => match error.layer() {
            ErrorLayer::Registry => StatusCode::CONFLICT,
            ErrorLayer::Process | ErrorLayer::Transport => StatusCode::BAD_GATEWAY,
            ErrorLayer::Application => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}
