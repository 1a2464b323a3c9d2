//! Compose document handling

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::errors::OrchestratorError;
use crate::models::job::MountFile;

/// Check that `spec` is a YAML mapping with a non-empty `services` mapping.
///
/// Returns the service names in document order.
pub fn validate(spec: &str) -> Result<Vec<String>, OrchestratorError> {
    let document: Value = serde_yaml::from_str(spec)
        .map_err(|e| OrchestratorError::ParseError(format!("compose spec is not valid YAML: {}", e)))?;

    let root = document
        .as_mapping()
        .ok_or_else(|| OrchestratorError::ParseError("compose spec must be a mapping".to_string()))?;

    let services = root
        .get("services")
        .ok_or_else(|| OrchestratorError::ParseError("compose spec has no 'services' section".to_string()))?
        .as_mapping()
        .ok_or_else(|| OrchestratorError::ParseError("'services' must be a mapping".to_string()))?;

    if services.is_empty() {
        return Err(OrchestratorError::ParseError(
            "compose spec defines no services".to_string(),
        ));
    }

    services
        .keys()
        .map(|key| {
            key.as_str().map(str::to_string).ok_or_else(|| {
                OrchestratorError::ParseError(format!("invalid service name: {:?}", key))
            })
        })
        .collect()
}

/// Replace every mount placeholder in `spec` with its host source path
pub fn apply_mounts(
    spec: &str,
    mounts: &BTreeMap<String, MountFile>,
) -> Result<String, OrchestratorError> {
    let mut rendered = spec.to_string();
    for (placeholder, mount) in mounts {
        if placeholder.is_empty() || !rendered.contains(placeholder.as_str()) {
            return Err(OrchestratorError::ParseError(format!(
                "mount placeholder '{}' not found in compose spec",
                placeholder
            )));
        }
        if !mount.source.starts_with('/') {
            return Err(OrchestratorError::ParseError(format!(
                "mount source must be an absolute path: '{}'",
                mount.source
            )));
        }
        rendered = rendered.replace(placeholder.as_str(), &mount.source);
    }
    Ok(rendered)
}

/// Compose project name for a context: lowercase, `[a-z0-9_-]`
pub fn project_name(context: &str) -> String {
    let name: String = context
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    match name.chars().next() {
        Some(first) if first.is_ascii_alphanumeric() => name,
        _ => format!("ctx{}", name),
    }
}
