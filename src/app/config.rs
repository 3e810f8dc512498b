//! Environment-driven configuration.

use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use bcrypt::DEFAULT_COST;
use chrono::TimeDelta;
use tracing::info;

use crate::{
    carts::engine::DEFAULT_CONFLICT_ATTEMPTS,
    sessions::{DEFAULT_SESSION_TTL_SECS, default_session_ttl},
};

const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageBackend,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub carts: CartsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown storage backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub secure: bool,
    /// Lifetime of a session and of its cookie.
    pub ttl: TimeDelta,
    /// How often expired sessions are purged.
    pub purge_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CartsConfig {
    /// Total attempts for a cart unit of work that keeps conflicting.
    pub conflict_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
    /// Base URL that activation links in emails point at.
    pub public_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 3000,
            },
            storage: StorageBackend::Postgres,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
            },
            session: SessionConfig {
                cookie_name: "storefront_session".into(),
                secure: false,
                ttl: default_session_ttl(),
                purge_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS),
            },
            carts: CartsConfig {
                conflict_attempts: DEFAULT_CONFLICT_ATTEMPTS,
            },
            auth: AuthConfig {
                bcrypt_cost: DEFAULT_COST,
                public_url: "http://localhost:3000".into(),
            },
        }
    }
}

/// Reads the configuration from the process environment.
pub fn load() -> Result<Config> {
    from_lookup(|key| env::var(key).ok())
}

/// Builds a configuration from an arbitrary key lookup.
pub fn from_lookup<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let storage: StorageBackend = parse_or(&lookup, "STOREFRONT_STORAGE", defaults.storage)?;

    let database_url = lookup("DATABASE_URL").unwrap_or_default();
    if storage == StorageBackend::Postgres && database_url.is_empty() {
        bail!("DATABASE_URL must be set when STOREFRONT_STORAGE is postgres");
    }

    let conflict_attempts: u32 = parse_or(
        &lookup,
        "STOREFRONT_CART_RETRIES",
        defaults.carts.conflict_attempts,
    )?;
    if conflict_attempts == 0 {
        bail!("STOREFRONT_CART_RETRIES must be at least 1");
    }

    let bcrypt_cost: u32 = parse_or(&lookup, "STOREFRONT_BCRYPT_COST", defaults.auth.bcrypt_cost)?;
    if !(4..=31).contains(&bcrypt_cost) {
        bail!("STOREFRONT_BCRYPT_COST must be between 4 and 31");
    }

    let ttl_secs: i64 = parse_or(
        &lookup,
        "STOREFRONT_SESSION_TTL_SECS",
        DEFAULT_SESSION_TTL_SECS,
    )?;
    if ttl_secs < 60 {
        bail!("STOREFRONT_SESSION_TTL_SECS must be at least 60");
    }
    let ttl = TimeDelta::try_seconds(ttl_secs)
        .ok_or_else(|| anyhow!("STOREFRONT_SESSION_TTL_SECS is out of range"))?;

    let purge_secs: u64 = parse_or(
        &lookup,
        "STOREFRONT_SESSION_PURGE_SECS",
        DEFAULT_PURGE_INTERVAL_SECS,
    )?;
    if purge_secs == 0 {
        bail!("STOREFRONT_SESSION_PURGE_SECS must be at least 1");
    }

    Ok(Config {
        server: ServerConfig {
            host: lookup("STOREFRONT_HOST").unwrap_or(defaults.server.host),
            port: parse_or(&lookup, "STOREFRONT_PORT", defaults.server.port)?,
        },
        storage,
        database: DatabaseConfig {
            url: database_url,
            max_connections: parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database.max_connections,
            )?,
        },
        session: SessionConfig {
            cookie_name: lookup("STOREFRONT_SESSION_COOKIE")
                .unwrap_or(defaults.session.cookie_name),
            secure: parse_or(&lookup, "STOREFRONT_SECURE_COOKIES", defaults.session.secure)?,
            ttl,
            purge_interval: Duration::from_secs(purge_secs),
        },
        carts: CartsConfig { conflict_attempts },
        auth: AuthConfig {
            bcrypt_cost,
            public_url: lookup("STOREFRONT_PUBLIC_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.auth.public_url),
        },
    })
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("Invalid {key} value `{raw}`")),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Postgres => f.write_str("postgres"),
            StorageBackend::Memory => f.write_str("memory"),
        }
    }
}
