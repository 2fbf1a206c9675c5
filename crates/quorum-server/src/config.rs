use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing::info;

/// Secrets that ship in sample `.env` files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "secret", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("QUORUM_JWT_SECRET").context("QUORUM_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("QUORUM_JWT_SECRET is a placeholder, set a real secret");
        }

        Ok(Self {
            host: try_load(&lookup, "QUORUM_HOST", "0.0.0.0")?,
            port: try_load(&lookup, "QUORUM_PORT", "3000")?,
            db_path: try_load(&lookup, "QUORUM_DB_PATH", "quorum.db")?,
            jwt_secret,
        })
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid {key} value {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[("QUORUM_JWT_SECRET", "s3cr3t-for-tests")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("quorum.db"));
    }

    #[test]
    fn missing_or_placeholder_secret_is_refused() {
        assert!(load(&[]).is_err());
        assert!(load(&[("QUORUM_JWT_SECRET", "changeme")]).is_err());
        assert!(load(&[("QUORUM_JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = load(&[("QUORUM_JWT_SECRET", "s3cr3t-for-tests"), ("QUORUM_PORT", "http")]);
        assert!(result.is_err());
    }
}
