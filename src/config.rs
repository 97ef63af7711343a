//! Runtime configuration.
//!
//! Resolution order, lowest to highest priority:
//! 1. Built-in defaults
//! 2. `.env` file (dotenvy)
//! 3. Process environment
//! 4. CLI flags (binaries pass their parsed values through `with_*` overrides)

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use reqwest::Url;

use crate::error::{PortalError, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:11111";
pub const DEFAULT_SHARE_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_SESSION_PATH: &str = ".portal_session";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:11111";
pub const DEFAULT_DATA_PATH: &str = "portal_data";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Client-side settings shared by the CLI and anything embedding the core.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub api_url: Url,
    pub share_base_url: Url,
    pub session_path: PathBuf,
    pub log_json: bool,
    pub log_dir: Option<PathBuf>,
}

impl PortalConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            api_url: parse_url(
                "PORTAL_API_URL",
                &env::var("PORTAL_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into()),
            )?,
            share_base_url: parse_url(
                "PORTAL_SHARE_BASE_URL",
                &env::var("PORTAL_SHARE_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_SHARE_BASE_URL.into()),
            )?,
            session_path: env::var("PORTAL_SESSION_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SESSION_PATH)),
            log_json: env_flag("PORTAL_LOG_JSON"),
            log_dir: env::var("PORTAL_LOG_DIR").ok().map(PathBuf::from),
        })
    }

    pub fn with_api_url(mut self, url: Option<&str>) -> Result<Self> {
        if let Some(url) = url {
            self.api_url = parse_url("--url", url)?;
        }
        Ok(self)
    }

    pub fn with_session_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.session_path = path;
        }
        self
    }
}

/// Settings for the reference backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub bind_addr: SocketAddr,
    pub data_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    /// Deterministic second-factor code. Development and tests only.
    pub fixed_code: Option<String>,
    pub log_json: bool,
    pub log_dir: Option<PathBuf>,
}

impl BackendConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let bind_addr = env::var("PORTAL_BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.into())
            .parse()
            .map_err(|e| PortalError::Validation(format!("PORTAL_BIND_ADDR: {e}")))?;
        let token_ttl_secs = match env::var("PORTAL_TOKEN_TTL_SECS") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| PortalError::Validation(format!("PORTAL_TOKEN_TTL_SECS: {e}")))?,
            Err(_) => DEFAULT_TOKEN_TTL_SECS,
        };
        let jwt_secret = match env::var("PORTAL_JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) => {
                tracing::warn!("PORTAL_JWT_SECRET not set, using a per-process random secret");
                uuid::Uuid::new_v4().to_string()
            }
        };
        Ok(Self {
            bind_addr,
            data_path: env::var("PORTAL_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_PATH)),
            jwt_secret,
            token_ttl_secs,
            fixed_code: env::var("PORTAL_FIXED_CODE").ok(),
            log_json: env_flag("PORTAL_LOG_JSON"),
            log_dir: env::var("PORTAL_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

fn parse_url(source: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| PortalError::Validation(format!("{source}: invalid URL {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_override_wins() {
        let config = PortalConfig {
            api_url: Url::parse(DEFAULT_API_URL).unwrap(),
            share_base_url: Url::parse(DEFAULT_SHARE_BASE_URL).unwrap(),
            session_path: PathBuf::from(DEFAULT_SESSION_PATH),
            log_json: false,
            log_dir: None,
        };
        let config = config.with_api_url(Some("http://10.0.0.5:8080")).unwrap();
        assert_eq!(config.api_url.as_str(), "http://10.0.0.5:8080/");
    }

    #[test]
    fn test_bad_url_is_a_validation_error() {
        let err = parse_url("--url", "not a url").unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }
}
