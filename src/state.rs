use std::sync::Arc;
use std::time::Duration;

use crate::auth::token::{CustomTokenIssuer, TokenIssuer};
use crate::config::AppConfig;
use crate::db::PgCredentialStore;
use crate::rate_limit::RateLimiter;
use crate::storage::{CredentialStore, MemoryCredentialStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub issuer: Arc<dyn TokenIssuer>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = match &config.database_url {
            Some(url) => {
                let pg = PgCredentialStore::connect(url).await?;
                if let Err(e) = pg.migrate().await {
                    tracing::warn!(error = %e, "migration failed; continuing");
                }
                Arc::new(pg) as Arc<dyn CredentialStore>
            }
            None => {
                tracing::warn!(
                    "DATABASE_URL not set; users are kept in memory and lost on restart"
                );
                Arc::new(MemoryCredentialStore::new()) as Arc<dyn CredentialStore>
            }
        };

        let issuer =
            Arc::new(CustomTokenIssuer::from_config(&config.token)?) as Arc<dyn TokenIssuer>;

        Ok(Self::from_parts(config, store, issuer))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_per_minute,
            Duration::from_secs(60),
        ));
        Self {
            config,
            store,
            issuer,
            limiter,
        }
    }

    /// State backed by an in-memory store and an HS256 issuer.
    #[cfg(test)]
    pub fn fake() -> Self {
        let config = Arc::new(test_config());
        let issuer = Arc::new(
            CustomTokenIssuer::from_config(&config.token).expect("secret issuer"),
        ) as Arc<dyn TokenIssuer>;
        Self::from_parts(config, Arc::new(MemoryCredentialStore::new()), issuer)
    }
}

#[cfg(test)]
pub fn test_config() -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "TOKEN_SECRET" => Some("test-secret".into()),
        "TOKEN_ISSUER" => Some("test-issuer".into()),
        "TOKEN_AUDIENCE" => Some("test-aud".into()),
        _ => None,
    })
    .expect("test config")
}
