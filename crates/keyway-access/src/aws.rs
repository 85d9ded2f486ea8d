//! AWS SDK adapters for the access and role traits

use std::future::Future;

use async_trait::async_trait;
use aws_sdk_eks::operation::describe_pod_identity_association::DescribePodIdentityAssociationError;
use aws_sdk_eks::primitives::{DateTime, DateTimeFormat};
use aws_sdk_eks::types::{self as eks_types, AccessScopeType};
use tracing::debug;

use keyway_common::{Error, Result};

use crate::access_entry::{AccessEntryApi, AssociatedPolicyRecord};
use crate::pod_identity::{AssociationRecord, PodIdentityApi};
use crate::role::{IamApi, IamRole};
use crate::scope::AccessScope;

fn eks_error<E>(operation: &str, err: E) -> Error
where
    E: std::error::Error + 'static,
{
    Error::upstream(
        "eks",
        operation,
        aws_sdk_eks::error::DisplayErrorContext(err).to_string(),
    )
}

fn timestamp(value: Option<&DateTime>) -> Option<String> {
    value.and_then(|t| t.fmt(DateTimeFormat::DateTime).ok())
}

fn to_sdk_scope(scope: &AccessScope) -> eks_types::AccessScope {
    match scope {
        AccessScope::Cluster => eks_types::AccessScope::builder()
            .r#type(AccessScopeType::Cluster)
            .build(),
        AccessScope::Namespace { namespaces } => eks_types::AccessScope::builder()
            .r#type(AccessScopeType::Namespace)
            .set_namespaces(Some(namespaces.clone()))
            .build(),
    }
}

fn from_sdk_scope(scope: Option<&eks_types::AccessScope>) -> AccessScope {
    match scope {
        Some(s) if s.r#type() == Some(&AccessScopeType::Namespace) => {
            AccessScope::from_namespaces(s.namespaces())
        }
        _ => AccessScope::Cluster,
    }
}

fn from_sdk_association(a: &eks_types::PodIdentityAssociation) -> AssociationRecord {
    AssociationRecord {
        cluster_name: a.cluster_name().map(str::to_string),
        namespace: a.namespace().map(str::to_string),
        service_account: a.service_account().map(str::to_string),
        role_arn: a.role_arn().map(str::to_string),
        association_arn: a.association_arn().map(str::to_string),
        association_id: a.association_id().map(str::to_string),
        tags: a.tags().cloned().unwrap_or_default(),
        created_at: timestamp(a.created_at()),
        modified_at: timestamp(a.modified_at()),
        owner_arn: a.owner_arn().map(str::to_string),
    }
}

/// One page of a paginated listing
struct Page<T> {
    items: Vec<T>,
    next_token: Option<String>,
}

/// Fetch pages until the service stops returning a continuation token
async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut next_token = None;
    loop {
        let page = fetch(next_token.take()).await?;
        items.extend(page.items);
        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => return Ok(items),
        }
    }
}

fn missing_association(
    error: DescribePodIdentityAssociationError,
) -> Result<Option<AssociationRecord>> {
    if error.is_resource_not_found_exception() {
        Ok(None)
    } else {
        Err(eks_error("DescribePodIdentityAssociation", error))
    }
}

/// EKS adapter for access entries and pod identity associations
#[derive(Clone, Debug)]
pub struct EksAccessClient {
    client: aws_sdk_eks::Client,
}

impl EksAccessClient {
    /// Wrap an EKS client
    pub fn new(client: aws_sdk_eks::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccessEntryApi for EksAccessClient {
    async fn create_access_entry(
        &self,
        cluster_name: &str,
        principal_arn: &str,
    ) -> Result<Option<String>> {
        let out = self
            .client
            .create_access_entry()
            .cluster_name(cluster_name)
            .principal_arn(principal_arn)
            .send()
            .await
            .map_err(|e| eks_error("CreateAccessEntry", e))?;
        Ok(out
            .access_entry()
            .and_then(|entry| entry.access_entry_arn())
            .map(str::to_string))
    }

    async fn associate_access_policy(
        &self,
        cluster_name: &str,
        principal_arn: &str,
        policy_arn: &str,
        scope: &AccessScope,
    ) -> Result<()> {
        self.client
            .associate_access_policy()
            .cluster_name(cluster_name)
            .principal_arn(principal_arn)
            .policy_arn(policy_arn)
            .access_scope(to_sdk_scope(scope))
            .send()
            .await
            .map_err(|e| eks_error("AssociateAccessPolicy", e))?;
        Ok(())
    }

    async fn list_associated_access_policies(
        &self,
        cluster_name: &str,
        principal_arn: &str,
    ) -> Result<Vec<AssociatedPolicyRecord>> {
        collect_pages(|next_token| async move {
            if next_token.is_some() {
                debug!(cluster = %cluster_name, "fetching next page of associated policies");
            }
            let out = self
                .client
                .list_associated_access_policies()
                .cluster_name(cluster_name)
                .principal_arn(principal_arn)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| eks_error("ListAssociatedAccessPolicies", e))?;

            Ok::<_, Error>(Page {
                items: out
                    .associated_access_policies()
                    .iter()
                    .map(|p| AssociatedPolicyRecord {
                        policy_arn: p.policy_arn().unwrap_or_default().to_string(),
                        access_scope: from_sdk_scope(p.access_scope()),
                        associated_at: timestamp(p.associated_at()),
                        modified_at: timestamp(p.modified_at()),
                    })
                    .collect(),
                next_token: out.next_token().map(str::to_string),
            })
        })
        .await
    }

    async fn delete_access_entry(&self, cluster_name: &str, principal_arn: &str) -> Result<()> {
        self.client
            .delete_access_entry()
            .cluster_name(cluster_name)
            .principal_arn(principal_arn)
            .send()
            .await
            .map_err(|e| eks_error("DeleteAccessEntry", e))?;
        Ok(())
    }

    async fn disassociate_access_policy(
        &self,
        cluster_name: &str,
        principal_arn: &str,
        policy_arn: &str,
    ) -> Result<()> {
        self.client
            .disassociate_access_policy()
            .cluster_name(cluster_name)
            .principal_arn(principal_arn)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| eks_error("DisassociateAccessPolicy", e))?;
        Ok(())
    }
}

#[async_trait]
impl PodIdentityApi for EksAccessClient {
    async fn create_association(
        &self,
        cluster_name: &str,
        namespace: &str,
        service_account: &str,
        role_arn: &str,
    ) -> Result<Option<AssociationRecord>> {
        let out = self
            .client
            .create_pod_identity_association()
            .cluster_name(cluster_name)
            .namespace(namespace)
            .service_account(service_account)
            .role_arn(role_arn)
            .send()
            .await
            .map_err(|e| eks_error("CreatePodIdentityAssociation", e))?;
        Ok(out.association().map(from_sdk_association))
    }

    async fn describe_association(
        &self,
        cluster_name: &str,
        association_id: &str,
    ) -> Result<Option<AssociationRecord>> {
        match self
            .client
            .describe_pod_identity_association()
            .cluster_name(cluster_name)
            .association_id(association_id)
            .send()
            .await
        {
            Ok(out) => Ok(out.association().map(from_sdk_association)),
            Err(e) => missing_association(e.into_service_error()),
        }
    }

    async fn delete_association(&self, cluster_name: &str, association_id: &str) -> Result<()> {
        self.client
            .delete_pod_identity_association()
            .cluster_name(cluster_name)
            .association_id(association_id)
            .send()
            .await
            .map_err(|e| eks_error("DeletePodIdentityAssociation", e))?;
        Ok(())
    }
}

/// IAM adapter for role creation
#[derive(Clone, Debug)]
pub struct IamRoleClient {
    client: aws_sdk_iam::Client,
}

impl IamRoleClient {
    /// Wrap an IAM client
    pub fn new(client: aws_sdk_iam::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IamApi for IamRoleClient {
    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<Option<IamRole>> {
        let out = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
            .map_err(|e| {
                Error::upstream(
                    "iam",
                    "CreateRole",
                    aws_sdk_iam::error::DisplayErrorContext(e).to_string(),
                )
            })?;
        Ok(out.role().map(|role| IamRole {
            role_name: role.role_name().to_string(),
            arn: role.arn().to_string(),
        }))
    }
}
