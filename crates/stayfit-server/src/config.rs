use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Server settings, read from `STAYFIT_*` environment variables.
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub handshake_timeout: Duration,
    pub token_ttl: chrono::Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = var("STAYFIT_JWT_SECRET", "dev-secret-change-me");
        let db_path = PathBuf::from(var("STAYFIT_DB_PATH", "stayfit.db"));
        let host = var("STAYFIT_HOST", "0.0.0.0");
        let port: u16 = var("STAYFIT_PORT", "5000")
            .parse()
            .context("STAYFIT_PORT must be a port number")?;
        let handshake_secs: u64 = var("STAYFIT_HANDSHAKE_TIMEOUT_SECS", "10")
            .parse()
            .context("STAYFIT_HANDSHAKE_TIMEOUT_SECS must be a whole number")?;
        let ttl_days: i64 = var("STAYFIT_TOKEN_TTL_DAYS", "7")
            .parse()
            .context("STAYFIT_TOKEN_TTL_DAYS must be a whole number")?;

        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            handshake_timeout: Duration::from_secs(handshake_secs),
            token_ttl: chrono::Duration::days(ttl_days),
        })
    }
}

fn var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}
