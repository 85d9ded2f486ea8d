//! Access entry orchestration
//!
//! An access entry lets a principal authenticate to a cluster; an associated
//! access policy decides what it may do there. Creating a grant is two calls
//! with no compensating rollback: when the policy association fails the entry
//! stays behind and the caller sees a `PartialCompletion` it can repair with
//! describe/attach/delete.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use keyway_common::{Error, Result};

use crate::scope::AccessScope;

const CREATE_OPERATION: &str = "create-access-entry";
const ATTACH_OPERATION: &str = "attach-access-policy";

/// An associated access policy as reported by EKS
#[derive(Clone, Debug, PartialEq)]
pub struct AssociatedPolicyRecord {
    /// Policy ARN
    pub policy_arn: String,
    /// Where the policy applies
    pub access_scope: AccessScope,
    /// When the policy was associated (RFC 3339)
    pub associated_at: Option<String>,
    /// When the association last changed (RFC 3339)
    pub modified_at: Option<String>,
}

/// An associated access policy with volatile timestamps removed
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatedPolicy {
    /// Policy ARN
    pub policy_arn: String,
    /// Where the policy applies
    pub access_scope: AccessScope,
}

impl From<AssociatedPolicyRecord> for AssociatedPolicy {
    fn from(record: AssociatedPolicyRecord) -> Self {
        Self {
            policy_arn: record.policy_arn,
            access_scope: record.access_scope,
        }
    }
}

/// A request to grant `policy_arn` to `principal_arn` on a cluster
#[derive(Clone, Debug, PartialEq)]
pub struct AccessPolicyGrant {
    /// Target cluster
    pub cluster_name: String,
    /// IAM principal being granted access
    pub principal_arn: String,
    /// Access policy to associate
    pub policy_arn: String,
    /// Where the policy applies
    pub scope: AccessScope,
}

/// Trait abstracting the EKS access entry and access policy APIs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessEntryApi: Send + Sync {
    /// Create an access entry, returning its ARN when EKS reports one
    async fn create_access_entry(
        &self,
        cluster_name: &str,
        principal_arn: &str,
    ) -> Result<Option<String>>;

    /// Associate an access policy with an access entry
    async fn associate_access_policy(
        &self,
        cluster_name: &str,
        principal_arn: &str,
        policy_arn: &str,
        scope: &AccessScope,
    ) -> Result<()>;

    /// List every access policy associated with an access entry
    async fn list_associated_access_policies(
        &self,
        cluster_name: &str,
        principal_arn: &str,
    ) -> Result<Vec<AssociatedPolicyRecord>>;

    /// Delete an access entry and, with it, its policy associations
    async fn delete_access_entry(&self, cluster_name: &str, principal_arn: &str) -> Result<()>;

    /// Remove one policy association from an access entry
    async fn disassociate_access_policy(
        &self,
        cluster_name: &str,
        principal_arn: &str,
        policy_arn: &str,
    ) -> Result<()>;
}

/// Validate that a principal looks like an IAM ARN
pub fn validate_principal_arn(operation: &str, principal_arn: &str) -> Result<()> {
    let mut parts = principal_arn.splitn(6, ':');
    let well_formed = parts.next() == Some("arn")
        && parts.next().is_some_and(|partition| !partition.is_empty())
        && parts.next() == Some("iam")
        && parts.next().is_some()
        && parts.next().is_some_and(|account| !account.is_empty())
        && parts.next().is_some_and(|resource| !resource.is_empty());

    if well_formed {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            operation,
            "principalArn",
            format!("'{}' is not an IAM principal ARN", principal_arn),
        ))
    }
}

/// Creates, inspects and removes access entries and their policies
#[derive(Clone)]
pub struct AccessEntryOrchestrator {
    api: Arc<dyn AccessEntryApi>,
}

impl AccessEntryOrchestrator {
    /// Create an orchestrator over the EKS access APIs
    pub fn new(api: Arc<dyn AccessEntryApi>) -> Self {
        Self { api }
    }

    /// Create an access entry and associate a policy with it
    ///
    /// Returns the access entry ARN when EKS reports one.
    #[instrument(skip(self), fields(cluster = %grant.cluster_name, principal = %grant.principal_arn))]
    pub async fn create(&self, grant: &AccessPolicyGrant) -> Result<Option<String>> {
        validate_principal_arn(CREATE_OPERATION, &grant.principal_arn)?;

        let entry_arn = self
            .api
            .create_access_entry(&grant.cluster_name, &grant.principal_arn)
            .await?;
        info!(access_entry = ?entry_arn, "created access entry");

        if let Err(e) = self.associate(grant).await {
            warn!(
                policy = %grant.policy_arn,
                error = %e,
                "access entry created but policy association failed, entry left in place"
            );
            return Err(Error::partial(
                CREATE_OPERATION,
                vec![format!("access entry created for {}", grant.principal_arn)],
                e,
            ));
        }

        Ok(entry_arn)
    }

    /// List the policies associated with an access entry, without timestamps
    #[instrument(skip(self))]
    pub async fn describe(
        &self,
        cluster_name: &str,
        principal_arn: &str,
    ) -> Result<Vec<AssociatedPolicy>> {
        let records = self
            .api
            .list_associated_access_policies(cluster_name, principal_arn)
            .await?;
        Ok(records.into_iter().map(AssociatedPolicy::from).collect())
    }

    /// Delete an access entry
    #[instrument(skip(self))]
    pub async fn delete(&self, cluster_name: &str, principal_arn: &str) -> Result<()> {
        self.api
            .delete_access_entry(cluster_name, principal_arn)
            .await?;
        info!("deleted access entry");
        Ok(())
    }

    /// Associate a policy with an existing access entry
    #[instrument(skip(self), fields(cluster = %grant.cluster_name, principal = %grant.principal_arn))]
    pub async fn attach(&self, grant: &AccessPolicyGrant) -> Result<()> {
        validate_principal_arn(ATTACH_OPERATION, &grant.principal_arn)?;
        self.associate(grant).await
    }

    /// Remove a policy from an access entry; the policy ARN alone identifies it
    #[instrument(skip(self))]
    pub async fn detach(
        &self,
        cluster_name: &str,
        principal_arn: &str,
        policy_arn: &str,
    ) -> Result<()> {
        self.api
            .disassociate_access_policy(cluster_name, principal_arn, policy_arn)
            .await?;
        info!("disassociated access policy");
        Ok(())
    }

    async fn associate(&self, grant: &AccessPolicyGrant) -> Result<()> {
        self.api
            .associate_access_policy(
                &grant.cluster_name,
                &grant.principal_arn,
                &grant.policy_arn,
                &grant.scope,
            )
            .await?;
        info!(
            policy = %grant.policy_arn,
            scope = grant.scope.type_name(),
            "associated access policy"
        );
        Ok(())
    }
}
