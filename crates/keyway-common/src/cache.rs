//! Cluster metadata cache
//!
//! The cache only ever saves a `DescribeCluster` round-trip. Entries are
//! replaced wholesale (last write wins) and any resolved value is an equally
//! valid substitute for another, so no coordination beyond the map's own
//! sharding is needed.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[cfg(test)]
use mockall::automock;

use crate::ClusterInfo;

/// Storage for resolved cluster metadata keyed by cluster name
#[cfg_attr(test, automock)]
pub trait ClusterCache: Send + Sync {
    /// Look up a cluster, returning `None` on a miss or an expired entry
    fn get(&self, cluster_name: &str) -> Option<ClusterInfo>;

    /// Store (or replace) the metadata for a cluster
    fn set(&self, cluster_name: &str, info: ClusterInfo);

    /// Drop the entry for a cluster
    fn invalidate(&self, cluster_name: &str);
}

#[derive(Clone, Debug)]
struct CachedCluster {
    info: ClusterInfo,
    stored_at: Instant,
}

/// In-process cache backed by a concurrent map
///
/// With a TTL, entries older than the TTL are treated as misses so rotated
/// endpoints are eventually picked up.
#[derive(Debug, Default)]
pub struct InMemoryClusterCache {
    entries: DashMap<String, CachedCluster>,
    ttl: Option<Duration>,
}

impl InMemoryClusterCache {
    /// Create a cache whose entries never expire
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Some(ttl),
        }
    }

    fn is_fresh(&self, entry: &CachedCluster) -> bool {
        match self.ttl {
            Some(ttl) => entry.stored_at.elapsed() < ttl,
            None => true,
        }
    }
}

impl ClusterCache for InMemoryClusterCache {
    fn get(&self, cluster_name: &str) -> Option<ClusterInfo> {
        let entry = self.entries.get(cluster_name)?;
        if self.is_fresh(&entry) {
            Some(entry.info.clone())
        } else {
            None
        }
    }

    fn set(&self, cluster_name: &str, info: ClusterInfo) {
        self.entries.insert(
            cluster_name.to_string(),
            CachedCluster {
                info,
                stored_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, cluster_name: &str) {
        self.entries.remove(cluster_name);
    }
}
