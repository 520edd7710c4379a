//! Storage endpoint and service credential resolution.
//!
//! Two values are required: the storage endpoint URL and the service-role
//! credential. Each is looked up in the process environment first, then in
//! each configured env file in order. The first non-empty match wins per key.
//!
//! Env files are read as `KEY=VALUE` lines (comments and surrounding quotes
//! stripped). A second pass accepts the older "heading" layout where a label
//! line such as `Project URL` is followed by the value on the next line; it
//! only fills keys the first pass did not find.
//!
//! Resolved values never appear in `Debug` output or log lines.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENDPOINT_KEY: &str = "SUPABASE_URL";
pub const SERVICE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";

/// Env files consulted after the process environment, in order.
pub const DEFAULT_ENV_FILES: &[&str] = &[
    "supabase/.deploy.env",
    ".env",
    ".env.local",
    ".env.development",
    ".env.production",
];

/// Heading labels (lower-case substrings) and the key they fill.
const HEADINGS: &[(&str, &str)] = &[
    ("project url", ENDPOINT_KEY),
    ("service role key", SERVICE_KEY),
];

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error(
        "missing required credentials: {} (resolve order: process environment -> {})",
        .keys.join(", "),
        .searched.join(" -> ")
    )]
    Missing {
        keys: Vec<String>,
        searched: Vec<String>,
    },
}

/// Endpoint plus bearer credential for the object store.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub endpoint: String,
    service_key: String,
}

impl StorageCredentials {
    pub fn new(endpoint: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            service_key: service_key.into(),
        }
    }

    pub fn service_key(&self) -> &str {
        &self.service_key
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("endpoint", &self.endpoint)
            .field("service_key", &"<redacted>")
            .finish()
    }
}

/// Parse an env file body. Later `KEY=VALUE` lines override earlier ones.
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let lines: Vec<&str> = content.lines().collect();

    for raw in &lines {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if !key.is_empty() && !value.is_empty() {
            out.insert(key.to_string(), value.to_string());
        }
    }

    for (i, raw) in lines.iter().enumerate() {
        let label = raw.trim().to_lowercase();
        if label.is_empty() || label.starts_with('#') {
            continue;
        }
        let Some(next) = lines.get(i + 1).map(|l| l.trim()) else {
            continue;
        };
        if next.is_empty() {
            continue;
        }
        for (heading, key) in HEADINGS {
            if label.contains(heading) && !out.contains_key(*key) {
                out.insert((*key).to_string(), next.to_string());
            }
        }
    }

    out
}

/// Resolve credentials from the process environment and `env_files`.
pub fn resolve_credentials(env_files: &[PathBuf]) -> Result<StorageCredentials, CredentialsError> {
    resolve_credentials_with(|key| std::env::var(key).ok(), env_files)
}

/// Resolve credentials with an injectable environment lookup.
pub fn resolve_credentials_with(
    lookup: impl Fn(&str) -> Option<String>,
    env_files: &[PathBuf],
) -> Result<StorageCredentials, CredentialsError> {
    let required = [ENDPOINT_KEY, SERVICE_KEY];
    let mut resolved: HashMap<&str, String> = HashMap::new();

    for key in required {
        if let Some(value) = lookup(key).map(|v| v.trim().to_string())
            && !value.is_empty()
        {
            resolved.insert(key, value);
        }
    }

    for path in env_files {
        if required.iter().all(|k| resolved.contains_key(k)) {
            break;
        }
        let Some(values) = read_env_file(path) else {
            continue;
        };
        for key in required {
            if resolved.contains_key(key) {
                continue;
            }
            if let Some(value) = values.get(key).map(|v| v.trim())
                && !value.is_empty()
            {
                tracing::debug!(key, file = %path.display(), "credential resolved from env file");
                resolved.insert(key, value.to_string());
            }
        }
    }

    match (resolved.remove(ENDPOINT_KEY), resolved.remove(SERVICE_KEY)) {
        (Some(endpoint), Some(key)) => Ok(StorageCredentials::new(endpoint, key)),
        (endpoint, key) => {
            let mut keys = Vec::new();
            if endpoint.is_none() {
                keys.push(ENDPOINT_KEY.to_string());
            }
            if key.is_none() {
                keys.push(SERVICE_KEY.to_string());
            }
            Err(CredentialsError::Missing {
                keys,
                searched: env_files.iter().map(|p| p.display().to_string()).collect(),
            })
        }
    }
}

fn read_env_file(path: &Path) -> Option<HashMap<String, String>> {
    std::fs::read_to_string(path)
        .ok()
        .map(|content| parse_env_file(&content))
}
