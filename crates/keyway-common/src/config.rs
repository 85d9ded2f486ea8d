//! Process configuration
//!
//! Values come from the environment through the [`EnvConfig`] trait so tests
//! never touch global process state. CLI flags are layered on top by the
//! binary.

use std::net::SocketAddr;
use std::time::Duration;

use crate::{Error, Result};

/// Default bind address for the HTTP transport
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default lifetime of a cached `DescribeCluster` result
pub const DEFAULT_CLUSTER_CACHE_TTL: Duration = Duration::from_secs(300);

/// Trait for reading Keyway's environment variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvConfig: Send + Sync {
    /// Read a variable, returning `None` when unset or empty
    fn var(&self, key: &str) -> Option<String>;
}

/// Default implementation that reads from the process environment
#[derive(Clone, Default)]
pub struct OsEnvConfig;

impl EnvConfig for OsEnvConfig {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Resolved Keyway configuration
#[derive(Clone, Debug, PartialEq)]
pub struct KeywayConfig {
    /// AWS region for STS presigning and SDK clients; `None` defers to the
    /// SDK's own region chain
    pub region: Option<String>,
    /// Cluster whose metadata is resolved at startup to warm the cache
    pub prewarm_cluster: Option<String>,
    /// Cache entry lifetime; `None` keeps entries until replaced
    pub cluster_cache_ttl: Option<Duration>,
    /// Bind address for `serve`
    pub listen_addr: SocketAddr,
}

impl KeywayConfig {
    /// Build configuration from environment variables
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `AWS_REGION` / `AWS_DEFAULT_REGION` | signing and client region |
    /// | `KEYWAY_CLUSTER_NAME` / `CLUSTER_NAME` | cluster to prewarm |
    /// | `KEYWAY_CLUSTER_CACHE_TTL_SECS` | cache TTL, `0` disables expiry |
    /// | `KEYWAY_LISTEN_ADDR` | HTTP bind address |
    pub fn from_env(env: &dyn EnvConfig) -> Result<Self> {
        let region = env
            .var("AWS_REGION")
            .or_else(|| env.var("AWS_DEFAULT_REGION"));

        let prewarm_cluster = env
            .var("KEYWAY_CLUSTER_NAME")
            .or_else(|| env.var("CLUSTER_NAME"));

        let cluster_cache_ttl = match env.var("KEYWAY_CLUSTER_CACHE_TTL_SECS") {
            None => Some(DEFAULT_CLUSTER_CACHE_TTL),
            Some(raw) => parse_ttl(&raw)?,
        };

        let listen_addr = env
            .var("KEYWAY_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = parse_listen_addr(&listen_addr)?;

        Ok(Self {
            region,
            prewarm_cluster,
            cluster_cache_ttl,
            listen_addr,
        })
    }
}

/// Parse a TTL in whole seconds; `0` means entries never expire
pub fn parse_ttl(raw: &str) -> Result<Option<Duration>> {
    let secs: u64 = raw.trim().parse().map_err(|_| {
        Error::config(format!(
            "KEYWAY_CLUSTER_CACHE_TTL_SECS must be a whole number of seconds, got '{}'",
            raw
        ))
    })?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Parse a socket address for the HTTP listener
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr> {
    raw.trim()
        .parse()
        .map_err(|e| Error::config(format!("invalid listen address '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(vars: &[(&str, &str)]) -> MockEnvConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut mock = MockEnvConfig::new();
        mock.expect_var()
            .returning(move |key| vars.get(key).cloned());
        mock
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = KeywayConfig::from_env(&env_with(&[])).unwrap();
        assert_eq!(config.region, None);
        assert_eq!(config.prewarm_cluster, None);
        assert_eq!(config.cluster_cache_ttl, Some(DEFAULT_CLUSTER_CACHE_TTL));
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR.parse().unwrap());
    }

    #[test]
    fn test_region_falls_back_to_default_region() {
        let config =
            KeywayConfig::from_env(&env_with(&[("AWS_DEFAULT_REGION", "eu-west-1")])).unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));

        let config = KeywayConfig::from_env(&env_with(&[
            ("AWS_REGION", "us-east-2"),
            ("AWS_DEFAULT_REGION", "eu-west-1"),
        ]))
        .unwrap();
        assert_eq!(config.region.as_deref(), Some("us-east-2"));
    }

    #[test]
    fn test_legacy_cluster_name_variable() {
        let config = KeywayConfig::from_env(&env_with(&[("CLUSTER_NAME", "prod")])).unwrap();
        assert_eq!(config.prewarm_cluster.as_deref(), Some("prod"));
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let config =
            KeywayConfig::from_env(&env_with(&[("KEYWAY_CLUSTER_CACHE_TTL_SECS", "0")])).unwrap();
        assert_eq!(config.cluster_cache_ttl, None);
    }

    #[test]
    fn test_invalid_ttl_is_config_error() {
        let err = KeywayConfig::from_env(&env_with(&[("KEYWAY_CLUSTER_CACHE_TTL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn test_invalid_listen_addr_is_config_error() {
        let err =
            KeywayConfig::from_env(&env_with(&[("KEYWAY_LISTEN_ADDR", "localhost")])).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
