use std::env;
use std::time::Duration;

use crate::client_ip::DEFAULT_TRUSTED_HEADER;
use crate::normalize::{NormalizerPolicy, DEFAULT_MAX_EVENT_AGE_SECS};
use crate::upstream::{Credentials, DEFAULT_API_BASE, DEFAULT_API_VERSION};

/// Application configuration parsed from environment variables
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub pixel_id: String,
    pub access_token: String,
    pub api_base: String,
    pub api_version: String,
    pub upstream_timeout: Duration,

    // Sandbox
    pub test_mode: bool,
    pub test_event_code: Option<String>,

    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub extra_event_names: Vec<String>,
    pub max_event_age_secs: i64,
    pub trusted_ip_header: String,

    pub development: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8095".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let pixel_id = required("META_PIXEL_ID")?;
        let access_token = required("META_ACCESS_TOKEN")?;
        let api_base = env::var("META_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let api_version =
            env::var("META_API_VERSION").unwrap_or_else(|_| DEFAULT_API_VERSION.to_string());

        let timeout_ms: u64 = env::var("UPSTREAM_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| "UPSTREAM_TIMEOUT_MS must be a number of milliseconds".to_string())?;

        let test_mode = env::var("META_TEST_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|_| "META_TEST_MODE must be true or false".to_string())?;
        let test_event_code = env::var("META_TEST_EVENT_CODE")
            .ok()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if test_mode && test_event_code.is_none() {
            return Err("META_TEST_EVENT_CODE must be set when META_TEST_MODE=true".to_string());
        }

        let max_event_age_secs: i64 = env::var("MAX_EVENT_AGE_SECS")
            .unwrap_or_else(|_| DEFAULT_MAX_EVENT_AGE_SECS.to_string())
            .parse()
            .map_err(|_| "MAX_EVENT_AGE_SECS must be a number of seconds".to_string())?;
        if max_event_age_secs <= 0 {
            return Err("MAX_EVENT_AGE_SECS must be positive".to_string());
        }

        let trusted_ip_header = env::var("TRUSTED_IP_HEADER")
            .unwrap_or_else(|_| DEFAULT_TRUSTED_HEADER.to_string())
            .to_ascii_lowercase();

        let development = env::var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        Ok(Config {
            host,
            port,
            pixel_id,
            access_token,
            api_base,
            api_version,
            upstream_timeout: Duration::from_millis(timeout_ms),
            test_mode,
            test_event_code,
            allowed_origins: list("ALLOWED_ORIGINS"),
            extra_event_names: list("EXTRA_EVENT_NAMES"),
            max_event_age_secs,
            trusted_ip_header,
            development,
        })
    }

    /// Credentials as the forwarder sees them; the test code only applies
    /// in test mode.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            pixel_id: self.pixel_id.clone(),
            access_token: self.access_token.clone(),
            test_event_code: if self.test_mode {
                self.test_event_code.clone()
            } else {
                None
            },
        }
    }

    pub fn normalizer_policy(&self) -> NormalizerPolicy {
        NormalizerPolicy {
            extra_event_names: self.extra_event_names.clone(),
            max_event_age_secs: self.max_event_age_secs,
            trusted_ip_header: self.trusted_ip_header.clone(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("pixel_id", &self.pixel_id)
            .field("access_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("api_version", &self.api_version)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("test_mode", &self.test_mode)
            .field("test_event_code", &self.test_event_code)
            .field("allowed_origins", &self.allowed_origins)
            .field("extra_event_names", &self.extra_event_names)
            .field("max_event_age_secs", &self.max_event_age_secs)
            .field("trusted_ip_header", &self.trusted_ip_header)
            .field("development", &self.development)
            .finish()
    }
}

fn required(name: &str) -> Result<String, String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("{name} must be set"))
}

fn list(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
