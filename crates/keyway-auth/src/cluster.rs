//! Cluster metadata resolution
//!
//! Resolves the API endpoint and CA bundle for an EKS cluster. Results are
//! kept in an injected [`ClusterCache`]; a cache hit skips `DescribeCluster`
//! but [`ClusterMetadataResolver::refresh`] always goes back to EKS so
//! rotated endpoints can replace stale entries.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_eks::error::DisplayErrorContext;
use aws_sdk_eks::operation::describe_cluster::DescribeClusterError;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use keyway_common::{ClusterCache, ClusterInfo, Error, Result};

/// Raw cluster fields as returned by the control plane
///
/// Every field is optional on the wire; [`ClusterMetadataResolver`] decides
/// which absences are fatal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DescribedCluster {
    /// Cluster name
    pub name: Option<String>,
    /// API server endpoint
    pub endpoint: Option<String>,
    /// Base64-encoded CA bundle
    pub ca_data: Option<String>,
}

/// Trait abstracting the cluster description API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterDescriber: Send + Sync {
    /// Describe a cluster, returning `None` if it does not exist
    async fn describe_cluster(&self, cluster_name: &str) -> Result<Option<DescribedCluster>>;
}

/// [`ClusterDescriber`] backed by EKS `DescribeCluster`
#[derive(Clone, Debug)]
pub struct EksClusterDescriber {
    client: aws_sdk_eks::Client,
}

impl EksClusterDescriber {
    /// Wrap an EKS client
    pub fn new(client: aws_sdk_eks::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterDescriber for EksClusterDescriber {
    async fn describe_cluster(&self, cluster_name: &str) -> Result<Option<DescribedCluster>> {
        match self.client.describe_cluster().name(cluster_name).send().await {
            Ok(out) => Ok(out.cluster().map(|cluster| DescribedCluster {
                name: cluster.name().map(str::to_string),
                endpoint: cluster.endpoint().map(str::to_string),
                ca_data: cluster
                    .certificate_authority()
                    .and_then(|ca| ca.data())
                    .map(str::to_string),
            })),
            Err(e) => missing_cluster(e.into_service_error()),
        }
    }
}

fn missing_cluster(error: DescribeClusterError) -> Result<Option<DescribedCluster>> {
    if error.is_resource_not_found_exception() {
        Ok(None)
    } else {
        Err(Error::upstream(
            "eks",
            "DescribeCluster",
            DisplayErrorContext(&error).to_string(),
        ))
    }
}

/// Resolves and caches [`ClusterInfo`] by cluster name
#[derive(Clone)]
pub struct ClusterMetadataResolver {
    describer: Arc<dyn ClusterDescriber>,
    cache: Arc<dyn ClusterCache>,
}

impl ClusterMetadataResolver {
    /// Create a resolver over a describer and a cache
    pub fn new(describer: Arc<dyn ClusterDescriber>, cache: Arc<dyn ClusterCache>) -> Self {
        Self { describer, cache }
    }

    /// Return cluster metadata, from the cache when it holds a fresh entry
    pub async fn resolve(&self, cluster_name: &str) -> Result<ClusterInfo> {
        if let Some(info) = self.cache.get(cluster_name) {
            debug!(cluster = %cluster_name, "cluster metadata cache hit");
            return Ok(info);
        }
        self.refresh(cluster_name).await
    }

    /// Describe the cluster and replace any cached entry
    #[instrument(skip(self))]
    pub async fn refresh(&self, cluster_name: &str) -> Result<ClusterInfo> {
        let described = self
            .describer
            .describe_cluster(cluster_name)
            .await?
            .ok_or_else(|| Error::not_found("cluster", cluster_name))?;

        let info = into_cluster_info(cluster_name, described)?;
        info!(cluster = %cluster_name, endpoint = %info.endpoint, "resolved cluster metadata");
        self.cache.set(cluster_name, info.clone());
        Ok(info)
    }

    /// Drop the cached entry for a cluster
    pub fn invalidate(&self, cluster_name: &str) {
        self.cache.invalidate(cluster_name);
    }
}

fn into_cluster_info(requested: &str, described: DescribedCluster) -> Result<ClusterInfo> {
    let endpoint = described.endpoint.filter(|e| !e.is_empty()).ok_or_else(|| {
        Error::not_found("cluster endpoint", requested)
    })?;
    let cluster_name = described.name.filter(|n| !n.is_empty()).ok_or_else(|| {
        Error::not_found("cluster name", requested)
    })?;

    if described.ca_data.is_none() {
        warn!(cluster = %requested, "cluster has no certificate authority data, using system roots");
    }

    Ok(ClusterInfo {
        cluster_name,
        endpoint,
        ca_data: described.ca_data,
    })
}
