use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub gateway_url: String,
    pub gateway_api_key: String,
    pub workflow_url: String,
    pub status_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| -> anyhow::Result<String> {
            match var(key) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => bail!("{key} must be set"),
            }
        };

        let jwt_secret = var("WADMIN_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("WADMIN_JWT_SECRET is unset or still a placeholder");
        }

        let host = var("WADMIN_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("WADMIN_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("WADMIN_PORT is not a valid port")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("WADMIN_HOST is not a valid address")?;

        let status_secs: u64 = var("WADMIN_STATUS_INTERVAL_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30)
            .max(1);

        Ok(Self {
            addr,
            db_path: var("WADMIN_DB_PATH")
                .unwrap_or_else(|| "wadmin.db".into())
                .into(),
            jwt_secret,
            gateway_url: required("WADMIN_GATEWAY_URL")?,
            gateway_api_key: required("WADMIN_GATEWAY_API_KEY")?,
            workflow_url: required("WADMIN_WORKFLOW_URL")?,
            status_interval: Duration::from_secs(status_secs),
        })
    }
}
