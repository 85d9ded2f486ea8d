//! Request routing
//!
//! Dispatches a parsed operation to its orchestrator and shapes the outcome
//! into the response envelope. Nothing escapes as a transport error: every
//! failure becomes a 400 envelope.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use keyway_access::{AccessEntryOrchestrator, ClusterConnector, PodIdentityOrchestrator};
use keyway_common::Result;

use crate::request::{AgentEvent, Operation, ParsedRequest};
use crate::response::{
    AgentResponse, ATTACH_ACCESS_POLICY_MESSAGE, CREATE_ACCESS_ENTRY_BODY,
    DELETE_ACCESS_ENTRY_MESSAGE, DELETE_ACCESS_POLICY_MESSAGE, DELETE_POD_IDENTITY_MESSAGE,
};

/// Routes operation events to orchestrators
#[derive(Clone)]
pub struct RequestRouter {
    connector: Arc<dyn ClusterConnector>,
    access: AccessEntryOrchestrator,
    pod_identity: PodIdentityOrchestrator,
}

impl RequestRouter {
    /// Create a router
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        access: AccessEntryOrchestrator,
        pod_identity: PodIdentityOrchestrator,
    ) -> Self {
        Self {
            connector,
            access,
            pod_identity,
        }
    }

    /// Handle one event
    #[instrument(skip(self, event), fields(api_path = %event.api_path, action_group = %event.action_group))]
    pub async fn handle(&self, event: &AgentEvent) -> AgentResponse {
        let operation = match ParsedRequest::parse(event) {
            ParsedRequest::Known(operation) => operation,
            ParsedRequest::Unknown(path) => {
                warn!(api_path = %path, "unknown operation");
                return AgentResponse::unknown_operation(event);
            }
            ParsedRequest::Invalid(e) => {
                warn!(error = %e, "rejected request");
                return AgentResponse::failure(event, &e);
            }
        };

        match self.dispatch(&operation).await {
            Ok(body) => {
                info!(operation = operation.name(), cluster = %operation.cluster_name(), "operation succeeded");
                AgentResponse::success(event, body)
            }
            Err(e) => {
                warn!(
                    operation = operation.name(),
                    cluster = %operation.cluster_name(),
                    partial = e.is_partial(),
                    error = %e,
                    "operation failed"
                );
                AgentResponse::failure(event, &e)
            }
        }
    }

    async fn dispatch(&self, operation: &Operation) -> Result<String> {
        // Every operation needs a reachable cluster, even those that only
        // call EKS.
        let kube = self.connector.connect(operation.cluster_name()).await?;

        match operation {
            Operation::CreateAccessEntry(grant) => {
                self.access.create(grant).await?;
                Ok(CREATE_ACCESS_ENTRY_BODY.to_string())
            }
            Operation::DescribeAccessEntry(target) => {
                let policies = self
                    .access
                    .describe(&target.cluster_name, &target.principal_arn)
                    .await?;
                Ok(serde_json::to_string(&policies)?)
            }
            Operation::DeleteAccessEntry(target) => {
                self.access
                    .delete(&target.cluster_name, &target.principal_arn)
                    .await?;
                Ok(DELETE_ACCESS_ENTRY_MESSAGE.to_string())
            }
            Operation::AttachAccessPolicy(grant) => {
                self.access.attach(grant).await?;
                Ok(ATTACH_ACCESS_POLICY_MESSAGE.to_string())
            }
            Operation::DeleteAccessPolicy(target) => {
                self.access
                    .detach(
                        &target.cluster_name,
                        &target.principal_arn,
                        &target.policy_arn,
                    )
                    .await?;
                Ok(DELETE_ACCESS_POLICY_MESSAGE.to_string())
            }
            Operation::CreatePodIdentityAssociation(request) => {
                let association = self.pod_identity.create(kube.as_ref(), request).await?;
                Ok(serde_json::to_string(&association)?)
            }
            Operation::DescribePodIdentityAssociation(target) => {
                let association = self
                    .pod_identity
                    .describe(&target.cluster_name, &target.association_id)
                    .await?;
                Ok(serde_json::to_string(&association)?)
            }
            Operation::DeletePodIdentityAssociation(target) => {
                self.pod_identity
                    .delete(&target.cluster_name, &target.association_id)
                    .await?;
                Ok(DELETE_POD_IDENTITY_MESSAGE.to_string())
            }
        }
    }
}
