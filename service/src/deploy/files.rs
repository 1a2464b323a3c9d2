//! In-container file updates

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::info;

use crate::deploy::docker;
use crate::errors::OrchestratorError;
use crate::exec::CommandExecutor;
use crate::models::job::{FileUpdate, FileUpdateMode, Stage};

fn update_failure(update: &FileUpdate, reason: String) -> OrchestratorError {
    OrchestratorError::StageFailed {
        stage: Stage::FilesUpdated,
        reason: format!("{}:{}: {}", update.container, update.path, reason),
    }
}

fn strategy(schema: Option<&Value>) -> Option<&str> {
    schema
        .and_then(|schema| schema.get("mergeStrategy"))
        .and_then(Value::as_str)
}

/// Sub-schema applying to `key` of an object
fn property_schema<'a>(schema: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    let schema = schema?;
    schema
        .get("properties")
        .and_then(|properties| properties.get(key))
        .or_else(|| schema.get("additionalProperties").filter(|v| v.is_object()))
}

/// Merge `patch` into `base`.
///
/// Without a schema objects merge key by key and anything else in `patch`
/// replaces the value in `base`. A schema picks a `mergeStrategy` per level
/// (`overwrite`, `discard`, `append`, `objectMerge`), with nested levels
/// described under `properties` or `additionalProperties`.
pub fn merge_json(base: &mut Value, patch: Value, schema: Option<&Value>) -> Result<(), String> {
    match strategy(schema) {
        Some("overwrite") => *base = patch,
        Some("discard") => {
            if base.is_null() {
                *base = patch;
            }
        }
        Some("append") => match (base, patch) {
            (Value::Array(base), Value::Array(patch)) => base.extend(patch),
            (base @ Value::Null, patch @ Value::Array(_)) => *base = patch,
            _ => return Err("append strategy needs arrays on both sides".to_string()),
        },
        None | Some("objectMerge") => match patch {
            Value::Object(patch) => {
                if !base.is_object() {
                    *base = Value::Object(Map::new());
                }
                if let Value::Object(base) = base {
                    for (key, value) in patch {
                        let sub = property_schema(schema, &key);
                        match base.get_mut(&key) {
                            Some(existing) => merge_json(existing, value, sub)?,
                            None if strategy(sub) == Some("discard") => {}
                            None => {
                                let mut slot = Value::Null;
                                merge_json(&mut slot, value, sub)?;
                                base.insert(key, slot);
                            }
                        }
                    }
                }
            }
            patch => *base = patch,
        },
        Some(other) => return Err(format!("unsupported merge strategy '{}'", other)),
    }
    Ok(())
}

/// Current JSON document; an empty file is an empty object
fn parse_current(current: &str) -> Result<Value, serde_json::Error> {
    if current.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(current)
}

async fn read_file(
    executor: &CommandExecutor,
    context: &str,
    update: &FileUpdate,
    timeout: Duration,
) -> Result<String, OrchestratorError> {
    let output = executor
        .docker(context, docker::exec_read(&update.container, &update.path), None, timeout)
        .await?;
    if !output.is_success() {
        return Err(update_failure(update, output.describe_failure()));
    }
    Ok(output.stdout)
}

/// Content to write for `update`, merging with the current file when asked
async fn render(
    executor: &CommandExecutor,
    context: &str,
    update: &FileUpdate,
    timeout: Duration,
) -> Result<String, OrchestratorError> {
    match update.mode {
        FileUpdateMode::Replace => Ok(update.content.clone()),
        FileUpdateMode::MergeJson => {
            let patch: Value = serde_json::from_str(&update.content)
                .map_err(|e| update_failure(update, format!("patch is not valid JSON: {}", e)))?;

            let current = read_file(executor, context, update, timeout).await?;
            let mut document = parse_current(&current).map_err(|e| {
                update_failure(update, format!("existing file is not valid JSON: {}", e))
            })?;

            merge_json(&mut document, patch, update.merge_schema.as_ref())
                .map_err(|e| update_failure(update, e))?;
            Ok(serde_json::to_string_pretty(&document)?)
        }
    }
}

/// Push one file update into its container
pub async fn apply(
    executor: &CommandExecutor,
    context: &str,
    update: &FileUpdate,
    timeout: Duration,
) -> Result<String, OrchestratorError> {
    let content = render(executor, context, update, timeout).await?;

    let output = executor
        .docker(
            context,
            docker::exec_write(&update.container, &update.path),
            Some(content),
            timeout,
        )
        .await?;
    if !output.is_success() {
        return Err(update_failure(update, output.describe_failure()));
    }

    info!("[{}] Updated {} in {}", context, update.path, update.container);
    Ok(format!("{}:{}", update.container, update.path))
}
