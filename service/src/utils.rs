//! Utility functions

use std::process::Stdio;
use std::time::Duration;

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Version information for the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Linear backoff options
#[derive(Debug, Clone)]
pub struct BackoffOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base_delay * attempt`
pub fn calc_linear_backoff(options: &BackoffOptions, attempt: u32) -> Duration {
    options
        .base_delay
        .saturating_mul(attempt.max(1))
        .min(options.max_delay)
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Quote a string for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '@' | '+' | '='))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Binaries the service shells out to
const REQUIRED_BINARIES: &[(&str, &[&str])] = &[
    ("docker", &["--version"]),
    ("ssh", &["-V"]),
    ("ssh-keygen", &["-?"]),
    ("ssh-copy-id", &["-h"]),
    ("sshpass", &["-V"]),
];

/// Check that every external tool is callable and print the results
pub async fn run_diagnostic() {
    let version = version_info();
    println!(
        "{} {} ({}, built {})",
        "dockfleet".bold(),
        version.version,
        version.git_hash,
        version.build_time
    );

    let mut missing = 0;
    for (binary, args) in REQUIRED_BINARIES {
        // Help/version flags exit non-zero on some tools; spawning is what matters
        let found = Command::new(binary)
            .args(*args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok();

        if found {
            println!("  {} {}", "ok".green(), binary);
        } else {
            missing += 1;
            println!("  {} {} (not found on PATH)", "missing".red(), binary);
        }
    }

    if missing == 0 {
        println!("{}", "All required tools are available".green());
    } else {
        println!("{}", format!("{} required tool(s) missing", missing).yellow());
    }
}
