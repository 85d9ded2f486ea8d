//! Cluster authentication for Keyway
//!
//! Turns a cluster name into a live Kubernetes client: cluster metadata comes
//! from EKS (cached), and the credential is a short-lived bearer token derived
//! from the process's ambient AWS credentials.

#![deny(missing_docs)]

pub mod cluster;
pub mod kube_client;
pub mod token;

pub use cluster::{ClusterDescriber, ClusterMetadataResolver, DescribedCluster, EksClusterDescriber};
pub use kube_client::{client_for, kube_config};
pub use token::{presign_token, BearerToken, StsTokenMinter, TokenMinter, TOKEN_PREFIX};
