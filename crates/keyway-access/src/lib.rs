//! Access reconciliation for Keyway
//!
//! Orchestrators for the two workflows Keyway exposes:
//!
//! - **Access entries**: register a principal with a cluster and associate
//!   an access policy scoped to the cluster or a set of namespaces.
//! - **Pod identity associations**: bind a namespace/service account pair
//!   to an IAM role, provisioning the role and the Kubernetes objects when
//!   they are missing.
//!
//! Every external API sits behind a trait so the orchestrators can be
//! exercised without AWS or a cluster; [`aws`] holds the SDK adapters.

#![deny(missing_docs)]

pub mod access_entry;
pub mod aws;
pub mod connector;
pub mod pod_identity;
pub mod reconcile;
pub mod role;
pub mod scope;

pub use access_entry::{
    AccessEntryApi, AccessEntryOrchestrator, AccessPolicyGrant, AssociatedPolicy,
    AssociatedPolicyRecord,
};
pub use aws::{EksAccessClient, IamRoleClient};
pub use connector::{ClusterConnector, EksClusterConnector};
pub use pod_identity::{
    AssociationRecord, CreateAssociation, PodIdentityApi, PodIdentityAssociation,
    PodIdentityOrchestrator,
};
pub use reconcile::{
    EnsureReport, KubeResources, KubeResourcesImpl, ReconcileOutcome, ResourceReconciler,
};
pub use role::{IamApi, IamRole, RoleProvisioner};
pub use scope::AccessScope;
