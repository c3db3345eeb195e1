//! Server configuration from `SEATD_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::model::Ms;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("both SEATD_TLS_CERT and SEATD_TLS_KEY must be set, or neither")]
    PartialTls,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Cleartext password every client must present.
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    /// Prometheus exporter port; `None` disables metrics.
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Reserved holds older than this are expired; `None` keeps them forever.
    pub reserved_ttl_ms: Option<Ms>,
}

impl Config {
    /// Load configuration from the process environment, after an optional
    /// `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let tls_cert = var("SEATD_TLS_CERT");
        let tls_key = var("SEATD_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }

        Ok(Self {
            bind: var("SEATD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&var, "SEATD_PORT")?.unwrap_or(5433),
            data_dir: var("SEATD_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: var("SEATD_PASSWORD").unwrap_or_else(|| "seatd".into()),
            max_connections: parse(&var, "SEATD_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parse(&var, "SEATD_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parse(&var, "SEATD_METRICS_PORT")?,
            tls_cert,
            tls_key,
            reserved_ttl_ms: parse(&var, "SEATD_RESERVED_TTL_MS")?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError> {
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.password, "seatd");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.reserved_ttl_ms, None);
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("SEATD_PORT", "6543"),
            ("SEATD_BIND", "127.0.0.1"),
            ("SEATD_METRICS_PORT", "9000"),
            ("SEATD_RESERVED_TTL_MS", "900000"),
        ])
        .unwrap();
        assert_eq!(c.listen_addr(), "127.0.0.1:6543");
        assert_eq!(c.metrics_port, Some(9000));
        assert_eq!(c.reserved_ttl_ms, Some(900_000));
    }

    #[test]
    fn malformed_value_is_an_error() {
        let err = config(&[("SEATD_MAX_CONNECTIONS", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SEATD_MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn tls_needs_both_files() {
        assert!(matches!(config(&[("SEATD_TLS_CERT", "cert.pem")]), Err(ConfigError::PartialTls)));
        let c = config(&[("SEATD_TLS_CERT", "cert.pem"), ("SEATD_TLS_KEY", "key.pem")]).unwrap();
        assert_eq!(c.tls_key.as_deref(), Some("key.pem"));
    }
}
