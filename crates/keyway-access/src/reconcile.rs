//! Namespace and service account reconciliation
//!
//! Ensures the workload identity a pod identity association binds to exists
//! in the cluster. Objects are only ever created, never updated or deleted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use keyway_common::{Error, Result, KEYWAY_MANAGER, LABEL_MANAGED_BY};

/// Trait abstracting the namespace and service account APIs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeResources: Send + Sync {
    /// Names of every namespace in the cluster
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Create a namespace
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Names of every service account in a namespace
    async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<String>>;

    /// Create a service account in a namespace
    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`KubeResources`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeResourcesImpl {
    client: Client,
}

impl KubeResourcesImpl {
    /// Wrap a client authenticated against the target cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn managed_meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(BTreeMap::from([(
            LABEL_MANAGED_BY.to_string(),
            KEYWAY_MANAGER.to_string(),
        )])),
        ..Default::default()
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(KEYWAY_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl KubeResources for KubeResourcesImpl {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: managed_meta(name, None),
            ..Default::default()
        };
        api.create(&post_params(), &ns).await?;
        Ok(())
    }

    async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<String>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|sa| sa.metadata.name)
            .collect())
    }

    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let sa = ServiceAccount {
            metadata: managed_meta(name, Some(namespace)),
            ..Default::default()
        };
        api.create(&post_params(), &sa).await?;
        Ok(())
    }
}

/// What [`ResourceReconciler::ensure`] had to create
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnsureReport {
    /// The namespace did not exist and was created
    pub namespace_created: bool,
    /// The service account did not exist and was created
    pub service_account_created: bool,
}

/// Result of a reconciliation, returned as data so the caller decides
/// whether to continue
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Both objects exist now
    Ensured(EnsureReport),
    /// Reconciliation stopped at the contained error
    Failed(Error),
}

/// Ensures a namespace and service account exist
pub struct ResourceReconciler<'a> {
    kube: &'a dyn KubeResources,
}

impl<'a> ResourceReconciler<'a> {
    /// Create a reconciler over a cluster's resource API
    pub fn new(kube: &'a dyn KubeResources) -> Self {
        Self { kube }
    }

    /// Create the namespace and service account when they are absent
    ///
    /// A freshly created namespace cannot hold the service account yet, so
    /// the service account list is skipped in that case.
    #[instrument(skip(self))]
    pub async fn ensure(&self, namespace: &str, service_account: &str) -> Result<EnsureReport> {
        let mut report = EnsureReport::default();

        let namespaces = self.kube.list_namespaces().await?;
        if !namespaces.iter().any(|ns| ns == namespace) {
            self.kube.create_namespace(namespace).await?;
            info!(namespace = %namespace, "created namespace");
            report.namespace_created = true;
        } else {
            debug!(namespace = %namespace, "namespace exists");
        }

        let sa_exists = if report.namespace_created {
            false
        } else {
            self.kube
                .list_service_accounts(namespace)
                .await?
                .iter()
                .any(|sa| sa == service_account)
        };

        if sa_exists {
            debug!(namespace = %namespace, service_account = %service_account, "service account exists");
        } else {
            self.kube
                .create_service_account(namespace, service_account)
                .await?;
            info!(namespace = %namespace, service_account = %service_account, "created service account");
            report.service_account_created = true;
        }

        Ok(report)
    }

    /// Run [`ensure`](Self::ensure), reporting failure as data
    pub async fn reconcile(&self, namespace: &str, service_account: &str) -> ReconcileOutcome {
        match self.ensure(namespace, service_account).await {
            Ok(report) => ReconcileOutcome::Ensured(report),
            Err(e) => {
                warn!(namespace = %namespace, service_account = %service_account, error = %e, "reconciliation failed");
                ReconcileOutcome::Failed(e)
            }
        }
    }
}
