//! Configuration from the environment and credential files
//!
//! Two sources, mirroring how the archive has always been driven: a `.env`
//! file supplies the school host and the browser session, and an
//! `api-creds.json` file supplies the consumer key/secret for the signed
//! bulk API.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

use crate::api::oauth::Credentials;

/// Environment variable names, as copied out of a logged-in browser session
const ENV_HOST: &str = "HOST";
const ENV_SESSION_ID: &str = "SESS_ID";
const ENV_CSRF_KEY: &str = "CSRF_KEY";
const ENV_CSRF_TOKEN: &str = "CSRF_TOKEN";
const ENV_USER_ID: &str = "UID";
const ENV_API_BASE: &str = "API_BASE";

/// File holding the API consumer key and secret
const CREDS_FILE: &str = "api-creds.json";

/// Errors from loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing or empty
    #[error("missing required environment variable {0} (set it in .env)")]
    MissingVar(&'static str),

    /// No credential file was found in any searched location
    #[error("no api-creds.json found (searched {0})")]
    MissingCredentials(String),

    /// Credential file I/O failure
    #[error("failed to read credentials: {0}")]
    CredentialsIo(#[from] std::io::Error),

    /// Credential file did not parse as `{"key": ..., "secret": ...}`
    #[error("failed to parse credentials: {0}")]
    CredentialsParse(#[from] serde_json::Error),
}

/// Resolved configuration for one invocation
#[derive(Debug, Clone)]
pub struct Config {
    /// School host name, e.g. `district.schoolsite.com`
    pub host: String,
    /// Value of the session cookie for the school host
    pub session_id: String,
    /// CSRF key/token pair sent with school-host requests, when present
    pub csrf: Option<(String, String)>,
    /// Numeric user id; the archive flow falls back to `/v1/users/me`
    pub user_id: Option<u64>,
    /// Base URL of the signed bulk API
    pub api_base: String,
}

impl Config {
    /// Loads configuration from the process environment
    ///
    /// `main` applies the `.env` file first, so variables can come from
    /// either place; already-exported variables win.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = require(ENV_HOST)?;
        let session_id = require(ENV_SESSION_ID)?;
        let csrf = match (lookup(ENV_CSRF_KEY), lookup(ENV_CSRF_TOKEN)) {
            (Some(key), Some(token)) => Some((key, token)),
            _ => None,
        };
        let user_id = lookup(ENV_USER_ID).and_then(|value| value.parse().ok());
        let api_base = lookup(ENV_API_BASE).unwrap_or_else(|| default_api_base(&host));
        Ok(Self {
            host,
            session_id,
            csrf,
            user_id,
            api_base,
        })
    }
}

fn lookup(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    lookup(name).ok_or(ConfigError::MissingVar(name))
}

/// Derives the vendor API base from the school host
///
/// The bulk endpoint lives on `api.` + the vendor domain, not on the
/// school's subdomain, so `district.schoolsite.com` maps to
/// `https://api.schoolsite.com/v1`.
fn default_api_base(host: &str) -> String {
    let domain = if host.split('.').count() > 2 {
        host.split_once('.').map(|(_, rest)| rest).unwrap_or(host)
    } else {
        host
    };
    format!("https://api.{}/v1", domain)
}

/// Loads the API consumer credentials
///
/// Search order: the explicit path when given (and only that), then
/// `./api-creds.json`, then the tool's config directory
/// (`~/.config/lmsarchive/api-creds.json` on Linux).
pub fn load_credentials(explicit: Option<&Path>) -> Result<Credentials, ConfigError> {
    let candidates = credential_candidates(explicit);
    for candidate in &candidates {
        if candidate.exists() {
            let text = fs::read_to_string(candidate)?;
            return Ok(serde_json::from_str(&text)?);
        }
    }
    let searched = candidates
        .iter()
        .map(|candidate| candidate.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(ConfigError::MissingCredentials(searched))
}

fn credential_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => {
            let mut candidates = vec![PathBuf::from(CREDS_FILE)];
            if let Some(dirs) = ProjectDirs::from("", "", "lmsarchive") {
                candidates.push(dirs.config_dir().join(CREDS_FILE));
            }
            candidates
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
