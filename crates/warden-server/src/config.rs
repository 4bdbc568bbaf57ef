use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
    "secret",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("WARDEN_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("WARDEN_JWT_SECRET is unset or still a placeholder");
        }

        let host = lookup("WARDEN_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("WARDEN_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("WARDEN_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let db_path = lookup("WARDEN_DB_PATH").unwrap_or_else(|| "warden.db".into()).into();

        Ok(Self {
            addr,
            db_path,
            jwt_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_secret() {
        let cfg = config(&[("WARDEN_JWT_SECRET", "a-real-secret-value")]).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("warden.db"));
    }

    #[test]
    fn placeholder_secrets_rejected() {
        assert!(config(&[]).is_err());
        assert!(config(&[("WARDEN_JWT_SECRET", "   ")]).is_err());
        assert!(config(&[("WARDEN_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = config(&[("WARDEN_JWT_SECRET", "a-real-secret-value"), ("WARDEN_PORT", "http")]);
        assert!(err.is_err());

        let cfg = config(&[
            ("WARDEN_JWT_SECRET", "a-real-secret-value"),
            ("WARDEN_HOST", "127.0.0.1"),
            ("WARDEN_PORT", "8080"),
        ])
        .unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:8080".parse().unwrap());
    }
}
