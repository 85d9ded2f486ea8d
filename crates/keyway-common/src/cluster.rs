//! Cluster connection metadata

use serde::{Deserialize, Serialize};

/// Connection metadata for an EKS cluster's Kubernetes API server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Cluster name as known to EKS
    pub cluster_name: String,
    /// API server URL (e.g., "https://ABCD.gr7.us-west-2.eks.amazonaws.com")
    pub endpoint: String,
    /// Base64-encoded PEM certificate authority bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_data: Option<String>,
}

impl ClusterInfo {
    /// Create cluster metadata
    pub fn new(
        cluster_name: impl Into<String>,
        endpoint: impl Into<String>,
        ca_data: Option<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            endpoint: endpoint.into(),
            ca_data,
        }
    }
}
