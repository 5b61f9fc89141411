use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::auth::{
    jwt::JwtKeys,
    memory::MemoryUserStore,
    password::Argon2Hasher,
    repo::PgUserStore,
    services::AuthService,
    store::UserStore,
};
use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn UserStore> = if config.database.is_memory() {
            warn!("DATABASE_URL is memory://; users are kept in process and lost on restart");
            Arc::new(MemoryUserStore::new())
        } else {
            let pool = db::connect(&config.database).await?;
            db::migrate(&pool).await?;
            info!(
                max_connections = config.database.max_connections,
                "database pool ready"
            );
            Arc::new(PgUserStore::new(pool))
        };

        let hasher = Argon2Hasher::from_config(&config.argon2).context("argon2 parameters")?;
        let issuer = JwtKeys::from_config(&config.jwt);
        let auth = AuthService::new(store, Arc::new(hasher), Arc::new(issuer));

        Ok(Self {
            config: Arc::new(config),
            auth,
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{Argon2Config, DatabaseConfig, JwtConfig};

        let jwt = JwtConfig {
            secret: "test".into(),
            issuer: "test".into(),
            audience: "test".into(),
            ttl_minutes: 5,
            refresh_ttl_minutes: 60,
        };
        let auth = AuthService::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(crate::auth::password::fast_hasher()),
            Arc::new(JwtKeys::from_config(&jwt)),
        );
        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            request_timeout_secs: 5,
            database: DatabaseConfig {
                url: "memory://".into(),
                max_connections: 1,
                acquire_timeout_secs: 1,
            },
            jwt,
            argon2: Argon2Config::default(),
        });
        Self { config, auth }
    }
}
