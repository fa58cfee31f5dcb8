use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Deserialize;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::auth::claims::CustomClaims;
use crate::config::{ConfigError, TokenConfig};

/// Audience the identity provider expects on custom tokens minted by a service account.
pub const IDENTITY_TOOLKIT_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("uid must be non-empty and at most 128 characters")]
    InvalidUid,
    #[error("failed to read service account: {0}")]
    ServiceAccount(String),
    #[error("invalid signing key: {0}")]
    Key(String),
    #[error("failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// Mints an opaque signed token asserting a user identity.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self, uid: &str) -> Result<String, TokenError>;
}

/// Subset of a service account credentials file needed for signing.
#[derive(Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
}

impl ServiceAccount {
    pub fn from_file(path: &Path) -> Result<Self, TokenError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TokenError::ServiceAccount(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| TokenError::ServiceAccount(e.to_string()))
    }
}

/// Signs custom tokens locally, RS256 with a service account key or HS256
/// with a shared secret.
#[derive(Clone)]
pub struct CustomTokenIssuer {
    encoding: EncodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    /// `Some` for service-account tokens, where `sub` names the signer.
    signer_subject: Option<String>,
    ttl: Duration,
}

impl CustomTokenIssuer {
    pub fn from_service_account(sa: ServiceAccount, ttl: Duration) -> Result<Self, TokenError> {
        let encoding = EncodingKey::from_rsa_pem(sa.private_key.as_bytes())
            .map_err(|e| TokenError::Key(e.to_string()))?;
        Ok(Self {
            encoding,
            algorithm: Algorithm::RS256,
            issuer: sa.client_email.clone(),
            audience: IDENTITY_TOOLKIT_AUDIENCE.to_string(),
            signer_subject: Some(sa.client_email),
            ttl,
        })
    }

    pub fn from_secret(secret: &str, issuer: &str, audience: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            signer_subject: None,
            ttl,
        }
    }

    /// Service account takes precedence over the shared secret.
    pub fn from_config(cfg: &TokenConfig) -> anyhow::Result<Self> {
        let ttl = Duration::from_secs(cfg.ttl_seconds);
        if let Some(path) = &cfg.service_account_path {
            let sa = ServiceAccount::from_file(path)?;
            return Ok(Self::from_service_account(sa, ttl)?);
        }
        match &cfg.secret {
            Some(secret) => Ok(Self::from_secret(secret, &cfg.issuer, &cfg.audience, ttl)),
            None => Err(ConfigError::MissingSigningKey.into()),
        }
    }

    pub fn sign(&self, uid: &str) -> Result<String, TokenError> {
        if uid.is_empty() || uid.chars().count() > 128 {
            return Err(TokenError::InvalidUid);
        }
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = CustomClaims {
            iss: self.issuer.clone(),
            sub: self
                .signer_subject
                .clone()
                .unwrap_or_else(|| uid.to_string()),
            aud: self.audience.clone(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            uid: uid.to_string(),
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)?;
        debug!(uid = %uid, alg = ?self.algorithm, "custom token signed");
        Ok(token)
    }
}

#[async_trait]
impl TokenIssuer for CustomTokenIssuer {
    async fn issue_token(&self, uid: &str) -> Result<String, TokenError> {
        self.sign(uid)
    }
}
