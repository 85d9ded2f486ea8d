//! Common types for Keyway: errors, cluster metadata, cache, configuration

#![deny(missing_docs)]

pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod telemetry;

pub use cache::{ClusterCache, InMemoryClusterCache};
pub use cluster::ClusterInfo;
pub use config::{EnvConfig, KeywayConfig, OsEnvConfig};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager and `managed-by` label value for objects Keyway creates
pub const KEYWAY_MANAGER: &str = "keyway";

/// Label key marking objects created by Keyway
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
