use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("JWT_REFRESH_TTL_MINUTES ({refresh}) must exceed JWT_TTL_MINUTES ({access})")]
    RefreshTtl { access: i64, refresh: i64 },
    #[error("{name} must be between 1 and 525600 minutes, got {value}")]
    TtlRange { name: &'static str, value: i64 },
}

/// Upper bound for either token lifetime: one year.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Argon2id cost parameters. `None` keeps the argon2 crate default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Argon2Config {
    pub memory_kib: Option<u32>,
    pub iterations: Option<u32>,
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    /// `memory://` keeps users in process instead of Postgres.
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub argon2: Argon2Config,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let database = DatabaseConfig {
            url: env.required("DATABASE_URL")?,
            max_connections: env.parsed_or("DATABASE_MAX_CONNECTIONS", 10)?,
            acquire_timeout_secs: env.parsed_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?,
        };

        let jwt = JwtConfig {
            secret: env.required("JWT_SECRET")?,
            issuer: env.or("JWT_ISSUER", "identity"),
            audience: env.or("JWT_AUDIENCE", "identity-users"),
            ttl_minutes: env.parsed_or("JWT_TTL_MINUTES", 60)?,
            refresh_ttl_minutes: env.parsed_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        jwt.check_ttls()?;

        let argon2 = Argon2Config {
            memory_kib: env.parsed_opt("ARGON2_MEMORY_KIB")?,
            iterations: env.parsed_opt("ARGON2_ITERATIONS")?,
            parallelism: env.parsed_opt("ARGON2_PARALLELISM")?,
        };

        Ok(Self {
            host: env.or("APP_HOST", "0.0.0.0"),
            port: env.parsed_or("APP_PORT", 8080)?,
            request_timeout_secs: env.parsed_or("REQUEST_TIMEOUT_SECS", 30)?,
            database,
            jwt,
            argon2,
        })
    }
}

impl JwtConfig {
    fn check_ttls(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("JWT_TTL_MINUTES", self.ttl_minutes),
            ("JWT_REFRESH_TTL_MINUTES", self.refresh_ttl_minutes),
        ] {
            if !(1..=MAX_TTL_MINUTES).contains(&value) {
                return Err(ConfigError::TtlRange { name, value });
            }
        }
        if self.refresh_ttl_minutes <= self.ttl_minutes {
            return Err(ConfigError::RefreshTtl {
                access: self.ttl_minutes,
                refresh: self.refresh_ttl_minutes,
            });
        }
        Ok(())
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        (self.0)(name).ok_or(ConfigError::Missing(name))
    }

    fn or(&self, name: &str, default: &str) -> String {
        (self.0)(name).unwrap_or_else(|| default.to_owned())
    }

    fn parsed_opt<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        match (self.0)(name) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { name, value }),
            None => Ok(None),
        }
    }

    fn parsed_or<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.parsed_opt(name)?.unwrap_or(default))
    }
}
