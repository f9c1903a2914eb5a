//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The API token is wrapped in secrecy::SecretString to prevent log leaks.
//! Job-specific knobs live in the TOML [`policy::Policy`].

pub mod policy;
pub mod secrets;

use crate::adapter::retry::RetryPolicy;
use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    /// Helpdesk host, e.g. `acme.zendesk.com`.
    pub host: String,
    pub email: String,
    pub api_token: SecretString,
    /// Log writes instead of sending them. Defaults to on.
    pub dry_run: bool,
    /// Upper bound on write actions in one run.
    pub max_actions: usize,
    pub page_size: u32,
    pub retry: RetryPolicy,
    pub policy_file: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In CI, the workflow's secrets provide the vars.
    pub fn from_env() -> Result<Self> {
        let host = sanitize_host(&required_var("SUBDOMAIN")?)?;
        let max_actions = match std::env::var("MAX_ACTIONS") {
            Ok(_) => parse_var("MAX_ACTIONS", 50usize)?,
            Err(_) => parse_var("MAX_MERGES", 50usize)?,
        };
        let base_delay: f64 = parse_var("RETRY_BASE_DELAY", 0.8)?;
        if !base_delay.is_finite() || base_delay < 0.0 {
            return Err(Error::Config(format!(
                "RETRY_BASE_DELAY must be a non-negative number of seconds, got {base_delay}"
            )));
        }
        let page_size: u32 = parse_var("PAGE_SIZE", 100)?;
        if page_size == 0 {
            return Err(Error::Config("PAGE_SIZE must be greater than zero".to_string()));
        }

        Ok(Self {
            host,
            email: required_var("EMAIL")?,
            api_token: SecretString::from(required_var("API_TOKEN")?),
            dry_run: bool_var("DRY_RUN", true)?,
            max_actions,
            page_size,
            retry: RetryPolicy {
                max_attempts: parse_var("RETRY_MAX", 5u32)?,
                base_delay: Duration::from_secs_f64(base_delay),
                ..RetryPolicy::default()
            },
            policy_file: std::env::var("POLICY_FILE").ok().map(PathBuf::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn base_url(&self) -> String {
        format!("https://{}", self.host)
    }
}

/// Turn whatever the operator put in `SUBDOMAIN` into a bare host.
///
/// `acme` becomes `acme.zendesk.com`; scheme, path and case are stripped from
/// anything that already looks like a host.
pub fn sanitize_host(value: &str) -> Result<String> {
    let mut v = value.trim().to_lowercase();
    if let Some((_, rest)) = v.split_once("://") {
        v = rest.to_string();
    }
    let v = v.split('/').next().unwrap_or_default();
    if v.is_empty() {
        return Err(Error::Config("SUBDOMAIN is empty".to_string()));
    }
    if v.contains('.') {
        Ok(v.to_string())
    } else {
        Ok(format!("{v}.zendesk.com"))
    }
}

fn required_var(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Config(format!("environment variable {name} is empty")));
    }
    Ok(value.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(Error::Config(format!("invalid {name}={other:?}: expected true or false"))),
        },
        Err(_) => Ok(default),
    }
}
