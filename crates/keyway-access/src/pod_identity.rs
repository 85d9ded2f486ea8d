//! Pod identity association orchestration
//!
//! Binds a namespace/service account pair to an IAM role. Creation composes
//! the role provisioner and the resource reconciler before the association
//! call; a reconciliation failure does not stop the association.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use keyway_common::{Error, Result};

use crate::reconcile::{KubeResources, ReconcileOutcome, ResourceReconciler};
use crate::role::RoleProvisioner;

const CREATE_OPERATION: &str = "create-pod-identity-association";

/// A pod identity association as reported by EKS
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssociationRecord {
    /// Cluster name
    pub cluster_name: Option<String>,
    /// Namespace of the bound service account
    pub namespace: Option<String>,
    /// Bound service account
    pub service_account: Option<String>,
    /// Role assumed by pods using the service account
    pub role_arn: Option<String>,
    /// Association ARN
    pub association_arn: Option<String>,
    /// Association ID
    pub association_id: Option<String>,
    /// Resource tags
    pub tags: HashMap<String, String>,
    /// Creation time (RFC 3339)
    pub created_at: Option<String>,
    /// Last modification time (RFC 3339)
    pub modified_at: Option<String>,
    /// Owning resource, set for associations managed by add-ons
    pub owner_arn: Option<String>,
}

/// A pod identity association with tags, timestamps and owner removed
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentityAssociation {
    /// Cluster name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    /// Namespace of the bound service account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Bound service account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Role assumed by pods using the service account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Association ARN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub association_arn: Option<String>,
    /// Association ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub association_id: Option<String>,
}

impl From<AssociationRecord> for PodIdentityAssociation {
    fn from(record: AssociationRecord) -> Self {
        Self {
            cluster_name: record.cluster_name,
            namespace: record.namespace,
            service_account: record.service_account,
            role_arn: record.role_arn,
            association_arn: record.association_arn,
            association_id: record.association_id,
        }
    }
}

/// A request to bind a workload identity to a role
#[derive(Clone, Debug, PartialEq)]
pub struct CreateAssociation {
    /// Target cluster
    pub cluster_name: String,
    /// Namespace of the service account
    pub namespace: String,
    /// Service account name
    pub service_account: String,
    /// Existing role to bind; a role is provisioned when absent
    pub role_arn: Option<String>,
}

/// Trait abstracting the EKS pod identity association APIs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodIdentityApi: Send + Sync {
    /// Create an association, returning it when EKS reports one
    async fn create_association(
        &self,
        cluster_name: &str,
        namespace: &str,
        service_account: &str,
        role_arn: &str,
    ) -> Result<Option<AssociationRecord>>;

    /// Describe an association, returning `None` when it does not exist
    async fn describe_association(
        &self,
        cluster_name: &str,
        association_id: &str,
    ) -> Result<Option<AssociationRecord>>;

    /// Delete an association
    async fn delete_association(&self, cluster_name: &str, association_id: &str) -> Result<()>;
}

/// Creates, inspects and removes pod identity associations
#[derive(Clone)]
pub struct PodIdentityOrchestrator {
    api: Arc<dyn PodIdentityApi>,
    roles: RoleProvisioner,
}

impl PodIdentityOrchestrator {
    /// Create an orchestrator over the association API and role provisioner
    pub fn new(api: Arc<dyn PodIdentityApi>, roles: RoleProvisioner) -> Self {
        Self { api, roles }
    }

    /// Bind a workload identity to a role, creating whatever is missing
    ///
    /// Steps taken before a failed association call are reported through
    /// `PartialCompletion`.
    #[instrument(skip(self, kube, request), fields(cluster = %request.cluster_name, namespace = %request.namespace, service_account = %request.service_account))]
    pub async fn create(
        &self,
        kube: &dyn KubeResources,
        request: &CreateAssociation,
    ) -> Result<PodIdentityAssociation> {
        if request.namespace.trim().is_empty() {
            return Err(Error::missing_field(CREATE_OPERATION, "namespace"));
        }
        if request.service_account.trim().is_empty() {
            return Err(Error::missing_field(CREATE_OPERATION, "serviceAccount"));
        }

        let mut completed = Vec::new();

        let role_arn = match &request.role_arn {
            Some(arn) => arn.clone(),
            None => {
                let arn = self.roles.provision(&request.service_account).await?;
                completed.push(format!("role created: {}", arn));
                arn
            }
        };

        match ResourceReconciler::new(kube)
            .reconcile(&request.namespace, &request.service_account)
            .await
        {
            ReconcileOutcome::Ensured(report) => {
                if report.namespace_created {
                    completed.push(format!("namespace created: {}", request.namespace));
                }
                if report.service_account_created {
                    completed.push(format!(
                        "service account created: {}/{}",
                        request.namespace, request.service_account
                    ));
                }
            }
            ReconcileOutcome::Failed(e) => {
                warn!(error = %e, "continuing without namespace/service account reconciliation");
                completed.push(format!("reconciliation failed: {}", e));
            }
        }

        let created = self
            .api
            .create_association(
                &request.cluster_name,
                &request.namespace,
                &request.service_account,
                &role_arn,
            )
            .await
            .and_then(|record| {
                record.ok_or_else(|| {
                    Error::upstream(
                        "eks",
                        "CreatePodIdentityAssociation",
                        "response contained no association",
                    )
                })
            });

        match created {
            Ok(record) => {
                info!(association = ?record.association_id, role = %role_arn, "created pod identity association");
                Ok(record.into())
            }
            Err(e) if completed.is_empty() => Err(e),
            Err(e) => Err(Error::partial(CREATE_OPERATION, completed, e)),
        }
    }

    /// Describe an association
    #[instrument(skip(self))]
    pub async fn describe(
        &self,
        cluster_name: &str,
        association_id: &str,
    ) -> Result<PodIdentityAssociation> {
        self.api
            .describe_association(cluster_name, association_id)
            .await?
            .map(PodIdentityAssociation::from)
            .ok_or_else(|| Error::not_found("pod identity association", association_id))
    }

    /// Delete an association
    #[instrument(skip(self))]
    pub async fn delete(&self, cluster_name: &str, association_id: &str) -> Result<()> {
        self.api
            .delete_association(cluster_name, association_id)
            .await?;
        info!("deleted pod identity association");
        Ok(())
    }
}
