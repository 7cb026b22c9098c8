//! Operation handlers and registration.

pub mod download;
pub mod experiment;
pub mod project;
pub mod storage;
pub mod system;
pub mod tree;
pub mod watch;

use marionette_core::{ExperimentId, ProjectId};
use serde_json::Value;

use crate::errors::DispatchError;
use crate::registry::MethodRegistry;

/// Register all operation handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    // Project
    registry.register("load_project_from_id", project::LoadFromIdHandler);
    registry.register("load_project_from_content", project::LoadFromContentHandler);
    registry.register("load_project_from_url", project::LoadFromUrlHandler);
    registry.register("persist_project", project::PersistHandler);
    registry.register("save_project_properties", project::SavePropertiesHandler);

    // Experiment
    registry.register("new_experiment", experiment::NewHandler);
    registry.register("load_experiment", experiment::LoadHandler);
    registry.register("run_experiment", experiment::RunHandler);
    registry.register("play_experiment", experiment::PlayHandler);
    registry.register("delete_experiment", experiment::DeleteHandler);
    registry.register("experiment_status", experiment::StatusHandler);
    registry.register("save_experiment_properties", experiment::SavePropertiesHandler);

    // Watch lists
    registry.register("set_watched_variables", watch::SetWatchedVariablesHandler);
    registry.register("clear_watched_variables", watch::ClearWatchedVariablesHandler);

    // Trees
    registry.register("get_model_tree", tree::GetModelTreeHandler);
    registry.register("get_simulation_tree", tree::GetSimulationTreeHandler);
    registry.register("set_parameters", tree::SetParametersHandler);
    registry.register("get_supported_outputs", tree::GetSupportedOutputsHandler);

    // Downloads
    registry.register("download_model", download::DownloadModelHandler);
    registry.register("download_results", download::DownloadResultsHandler);

    // Storage account
    registry.register("link_dropbox", storage::LinkHandler);
    registry.register("unlink_dropbox", storage::UnlinkHandler);
    registry.register("upload_model", storage::UploadModelHandler);
    registry.register("upload_results", storage::UploadResultsHandler);

    // System
    registry.register("get_version", system::GetVersionHandler);
    registry.register("get_script", system::GetScriptHandler);
    registry.register("idle_user", system::CloseHandler);
    registry.register("close", system::CloseHandler);
}

/// Registry with every operation registered.
pub fn default_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    register_all(&mut registry);
    registry
}

/// Extract a required parameter from the params object.
pub(crate) fn require_param<'a>(params: &'a Value, key: &str) -> Result<&'a Value, DispatchError> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| DispatchError::InvalidParams {
            message: format!("Missing required parameter: {key}"),
        })
}

/// Extract a required string parameter.
pub(crate) fn require_string_param(params: &Value, key: &str) -> Result<String, DispatchError> {
    require_param(params, key)?
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| DispatchError::InvalidParams {
            message: format!("Parameter '{key}' must be a string"),
        })
}

/// A bare string argument, or the named field of an object argument.
pub(crate) fn string_or_field(params: &Value, key: &str) -> Result<String, DispatchError> {
    match params {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        _ => require_string_param(params, key),
    }
}

/// Extract an optional string parameter.
pub(crate) fn optional_string_param(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

fn as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extract a numeric id; numeric strings are accepted.
pub(crate) fn require_id(params: &Value, key: &str) -> Result<u64, DispatchError> {
    as_id(require_param(params, key)?).ok_or_else(|| DispatchError::InvalidParams {
        message: format!("Parameter '{key}' must be a non-negative integer"),
    })
}

/// `projectId` parameter.
pub(crate) fn require_project_id(params: &Value) -> Result<ProjectId, DispatchError> {
    require_id(params, "projectId").map(ProjectId::new)
}

/// `experimentId` parameter.
pub(crate) fn require_experiment_id(params: &Value) -> Result<ExperimentId, DispatchError> {
    require_id(params, "experimentId").map(ExperimentId::new)
}

fn is_no_experiment(value: &Value) -> bool {
    let sentinel = marionette_core::model::active_experiment::NONE;
    match value {
        Value::Number(n) => n.as_i64() == Some(sentinel),
        Value::String(s) => s.trim().parse::<i64>().ok() == Some(sentinel),
        _ => false,
    }
}

/// Optional `experimentId`; absent, `null` and `-1` mean none.
pub(crate) fn optional_experiment_id(params: &Value) -> Result<Option<ExperimentId>, DispatchError> {
    match params.get("experimentId") {
        None | Some(Value::Null) => Ok(None),
        Some(v) if is_no_experiment(v) => Ok(None),
        Some(v) => as_id(v)
            .map(|id| Some(ExperimentId::new(id)))
            .ok_or_else(|| DispatchError::InvalidParams {
                message: "Parameter 'experimentId' must be an integer".into(),
            }),
    }
}

/// Key/value pairs of an object parameter; scalars are stringified.
///
/// A missing or `null` parameter is an empty set.
pub(crate) fn string_pairs(params: &Value, key: &str) -> Result<Vec<(String, String)>, DispatchError> {
    let object = match params.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(object)) => object,
        Some(_) => {
            return Err(DispatchError::InvalidParams {
                message: format!("Parameter '{key}' must be an object"),
            });
        }
    };
    object
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                Value::Number(_) | Value::Bool(_) => v.to_string(),
                _ => {
                    return Err(DispatchError::InvalidParams {
                        message: format!("Property '{k}' must be a string, number or boolean"),
                    });
                }
            };
            Ok((k.clone(), value))
        })
        .collect()
}
