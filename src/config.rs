use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Custom tokens are rejected by the identity provider past one hour.
pub const MAX_TOKEN_TTL_SECONDS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("either SERVICE_ACCOUNT_PATH or TOKEN_SECRET must be set")]
    MissingSigningKey,
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub service_account_path: Option<PathBuf>,
    pub secret: Option<String>,
    pub issuer: String,
    pub audience: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// When absent the service keeps users in process memory.
    pub database_url: Option<String>,
    pub token: TokenConfig,
    pub cors_allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub expose_error_details: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't have to touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = TokenConfig {
            service_account_path: get("SERVICE_ACCOUNT_PATH").map(PathBuf::from),
            secret: get("TOKEN_SECRET"),
            issuer: get("TOKEN_ISSUER").unwrap_or_else(|| "authgate".into()),
            audience: get("TOKEN_AUDIENCE").unwrap_or_else(|| "authgate-clients".into()),
            ttl_seconds: parse_or(
                "TOKEN_TTL_SECONDS",
                get("TOKEN_TTL_SECONDS"),
                MAX_TOKEN_TTL_SECONDS,
            )?
            .min(MAX_TOKEN_TTL_SECONDS),
        };
        if token.service_account_path.is_none() && token.secret.is_none() {
            return Err(ConfigError::MissingSigningKey);
        }

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["http://localhost:5173".to_string()]);

        Ok(Self {
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("APP_PORT", get("APP_PORT"), 8000)?,
            database_url: get("DATABASE_URL"),
            token,
            cors_allowed_origins,
            request_timeout_secs: parse_or(
                "REQUEST_TIMEOUT_SECS",
                get("REQUEST_TIMEOUT_SECS"),
                30,
            )?,
            rate_limit_per_minute: parse_or(
                "RATE_LIMIT_PER_MINUTE",
                get("RATE_LIMIT_PER_MINUTE"),
                100,
            )?,
            expose_error_details: parse_or("APP_EXPOSE_ERRORS", get("APP_EXPOSE_ERRORS"), false)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}
