//! Host list loading
//!
//! The host list is a comma-delimited file with the header
//! `name,address,ssh_port,user,credential`. Blank lines and lines starting
//! with `#` are ignored. A credential of the form `key:<path>` names a private
//! key file, anything else is a password.

use std::path::Path;

use tracing::info;

use crate::errors::OrchestratorError;
use crate::models::context::{Credential, Endpoint};
use crate::registry::ContextRegistry;

const HEADER: [&str; 5] = ["name", "address", "ssh_port", "user", "credential"];

/// One host-list record
#[derive(Debug)]
pub struct HostRecord {
    pub name: String,
    pub endpoint: Endpoint,
    pub credential: Credential,
}

fn parse_error(line_no: usize, reason: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::ConfigError(format!("host list line {}: {}", line_no, reason))
}

fn parse_record(line_no: usize, line: &str) -> Result<HostRecord, OrchestratorError> {
    // The credential is last so it may itself contain commas
    let fields: Vec<&str> = line.splitn(HEADER.len(), ',').collect();
    if fields.len() != HEADER.len() {
        return Err(parse_error(
            line_no,
            format!("expected {} fields, found {}", HEADER.len(), fields.len()),
        ));
    }

    let name = fields[0].trim();
    let address = fields[1].trim();
    let user = fields[3].trim();
    let credential = fields[4].trim();

    let ssh_port: u16 = fields[2]
        .trim()
        .parse()
        .map_err(|_| parse_error(line_no, format!("invalid ssh_port '{}'", fields[2].trim())))?;

    for (field, value) in [("name", name), ("address", address), ("user", user)] {
        if value.is_empty() {
            return Err(parse_error(line_no, format!("empty {}", field)));
        }
    }
    if credential.is_empty() {
        return Err(parse_error(line_no, "empty credential"));
    }

    Ok(HostRecord {
        name: name.to_string(),
        endpoint: Endpoint::new(address, ssh_port, user),
        credential: Credential::parse(credential),
    })
}

fn is_header(line: &str) -> bool {
    let fields: Vec<String> = line.split(',').map(|f| f.trim().to_lowercase()).collect();
    fields.iter().map(String::as_str).eq(HEADER.iter().copied())
}

/// Parse host-list text, preserving record order
pub fn parse_host_list(text: &str) -> Result<Vec<HostRecord>, OrchestratorError> {
    let mut records = Vec::new();
    let mut seen_header = false;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_start();
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        if !seen_header && is_header(line) {
            seen_header = true;
            continue;
        }
        seen_header = true;
        records.push(parse_record(idx + 1, line)?);
    }

    Ok(records)
}

/// Read and parse a host-list file
pub async fn load_host_list(path: &Path) -> Result<Vec<HostRecord>, OrchestratorError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        OrchestratorError::ConfigError(format!("cannot read host list {}: {}", path.display(), e))
    })?;
    let records = parse_host_list(&text)?;
    info!("Loaded {} host(s) from {}", records.len(), path.display());
    Ok(records)
}

/// Register every record, stopping at the first invalid or duplicate name
pub fn register_hosts(
    registry: &ContextRegistry,
    records: Vec<HostRecord>,
) -> Result<Vec<String>, OrchestratorError> {
    records
        .into_iter()
        .map(|record| {
            registry
                .register(&record.name, record.endpoint, record.credential)
                .map(|ctx| ctx.name)
        })
        .collect()
}
