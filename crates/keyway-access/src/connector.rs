//! Live cluster connections
//!
//! Connecting resolves cluster metadata, mints a bearer token and builds a
//! kube client. Clients are built per request because tokens live for 200 s.
//!
//! Cached metadata can outlive the endpoint it describes. A session whose API
//! server cannot be reached re-describes the cluster and retries the call
//! once against the fresh endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

#[cfg(test)]
use mockall::automock;

use keyway_auth::{client_for, BearerToken, ClusterMetadataResolver, TokenMinter};
use keyway_common::{ClusterInfo, Error, Result};

use crate::reconcile::{KubeResources, KubeResourcesImpl};

/// Trait producing an authenticated view of a cluster's resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connect to the named cluster
    async fn connect(&self, cluster_name: &str) -> Result<Arc<dyn KubeResources>>;
}

type ResourcesBuilder =
    dyn Fn(&ClusterInfo, &BearerToken) -> Result<Arc<dyn KubeResources>> + Send + Sync;

fn kube_resources(info: &ClusterInfo, token: &BearerToken) -> Result<Arc<dyn KubeResources>> {
    Ok(Arc::new(KubeResourcesImpl::new(client_for(info, token)?)))
}

/// [`ClusterConnector`] for EKS clusters
#[derive(Clone)]
pub struct EksClusterConnector {
    resolver: ClusterMetadataResolver,
    minter: Arc<dyn TokenMinter>,
    build: Arc<ResourcesBuilder>,
}

impl EksClusterConnector {
    /// Create a connector over a metadata resolver and token minter
    pub fn new(resolver: ClusterMetadataResolver, minter: Arc<dyn TokenMinter>) -> Self {
        Self {
            resolver,
            minter,
            build: Arc::new(kube_resources),
        }
    }

    /// Resolve cluster metadata ahead of the first request
    pub async fn prewarm(&self, cluster_name: &str) -> Result<()> {
        self.resolver.resolve(cluster_name).await.map(|_| ())
    }
}

#[async_trait]
impl ClusterConnector for EksClusterConnector {
    #[instrument(skip(self))]
    async fn connect(&self, cluster_name: &str) -> Result<Arc<dyn KubeResources>> {
        let info = self.resolver.resolve(cluster_name).await?;
        let token = self.minter.mint(&info.cluster_name).await?;

        let (resources, refreshed) = match (self.build)(&info, &token) {
            Ok(resources) => (resources, false),
            Err(e) => {
                warn!(error = %e, "client from cached metadata failed, refreshing");
                let info = self.resolver.refresh(cluster_name).await?;
                ((self.build)(&info, &token)?, true)
            }
        };

        Ok(Arc::new(ClusterSession {
            connector: self.clone(),
            cluster_name: cluster_name.to_string(),
            token: RwLock::new(token),
            resources: RwLock::new(resources),
            reconnected: AtomicBool::new(refreshed),
        }))
    }
}

/// Resources of one cluster for the lifetime of a request
struct ClusterSession {
    connector: EksClusterConnector,
    cluster_name: String,
    token: RwLock<BearerToken>,
    resources: RwLock<Arc<dyn KubeResources>>,
    // Metadata is re-described at most once per session
    reconnected: AtomicBool,
}

impl ClusterSession {
    async fn current(&self) -> Arc<dyn KubeResources> {
        self.resources.read().await.clone()
    }

    fn should_reconnect(&self, error: &Error) -> bool {
        error.is_transport() && !self.reconnected.swap(true, Ordering::SeqCst)
    }

    /// Re-describe the cluster and rebuild the client against it
    async fn reconnect(&self, cause: &Error) -> Result<Arc<dyn KubeResources>> {
        warn!(cluster = %self.cluster_name, error = %cause, "cluster API unreachable, re-describing cluster");
        let resolver = &self.connector.resolver;
        let info = match resolver.refresh(&self.cluster_name).await {
            Ok(info) => info,
            Err(e) => {
                // The cached endpoint is known to be unreachable
                resolver.invalidate(&self.cluster_name);
                return Err(e);
            }
        };

        let current = self.token.read().await.clone();
        let token = if current.is_expired() {
            let fresh = self.connector.minter.mint(&info.cluster_name).await?;
            *self.token.write().await = fresh.clone();
            fresh
        } else {
            current
        };

        let resources = (self.connector.build)(&info, &token)?;
        *self.resources.write().await = resources.clone();
        Ok(resources)
    }
}

#[async_trait]
impl KubeResources for ClusterSession {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        match self.current().await.list_namespaces().await {
            Err(e) if self.should_reconnect(&e) => {
                self.reconnect(&e).await?.list_namespaces().await
            }
            result => result,
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        match self.current().await.create_namespace(name).await {
            Err(e) if self.should_reconnect(&e) => {
                self.reconnect(&e).await?.create_namespace(name).await
            }
            result => result,
        }
    }

    async fn list_service_accounts(&self, namespace: &str) -> Result<Vec<String>> {
        match self.current().await.list_service_accounts(namespace).await {
            Err(e) if self.should_reconnect(&e) => {
                self.reconnect(&e).await?.list_service_accounts(namespace).await
            }
            result => result,
        }
    }

    async fn create_service_account(&self, namespace: &str, name: &str) -> Result<()> {
        match self.current().await.create_service_account(namespace, name).await {
            Err(e) if self.should_reconnect(&e) => {
                self.reconnect(&e)
                    .await?
                    .create_service_account(namespace, name)
                    .await
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::Credentials;
    use keyway_auth::{presign_token, ClusterDescriber, DescribedCluster};
    use crate::reconcile::MockKubeResources;
    use keyway_common::{ClusterCache, InMemoryClusterCache};
    use std::sync::atomic::AtomicUsize;
    use std::time::SystemTime;

    mockall::mock! {
        Describer {}
        #[async_trait]
        impl ClusterDescriber for Describer {
            async fn describe_cluster(&self, cluster_name: &str) -> Result<Option<DescribedCluster>>;
        }
    }

    mockall::mock! {
        Minter {}
        #[async_trait]
        impl TokenMinter for Minter {
            async fn mint(&self, cluster_name: &str) -> Result<BearerToken>;
        }
    }

    fn token(cluster: &str) -> BearerToken {
        let creds = Credentials::new("AKID", "SECRET", None, None, "test");
        presign_token(cluster, "us-west-2", &creds, SystemTime::now()).unwrap()
    }

    fn described() -> DescribedCluster {
        DescribedCluster {
            name: Some("c1".to_string()),
            endpoint: Some("https://abcd.eks.amazonaws.com".to_string()),
            ca_data: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_cluster_fails_before_minting() {
        let mut describer = MockDescriber::new();
        describer.expect_describe_cluster().returning(|_| Ok(None));
        let mut minter = MockMinter::new();
        minter.expect_mint().never();

        let resolver = ClusterMetadataResolver::new(
            Arc::new(describer),
            Arc::new(InMemoryClusterCache::new()),
        );
        let connector = EksClusterConnector::new(resolver, Arc::new(minter));

        let err = connector.connect("missing").await.err().unwrap();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    /// Story: a cached entry that cannot produce a client is re-described
    /// once and the fresh metadata replaces it
    #[tokio::test]
    async fn story_unusable_cache_entry_is_refreshed_once() {
        let cache = Arc::new(InMemoryClusterCache::new());
        cache.set("c1", ClusterInfo::new("c1", "not a url", None));

        let mut describer = MockDescriber::new();
        describer.expect_describe_cluster().times(1).returning(|_| {
            Ok(Some(DescribedCluster {
                name: Some("c1".to_string()),
                endpoint: Some("still not a url".to_string()),
                ca_data: None,
            }))
        });
        let mut minter = MockMinter::new();
        minter.expect_mint().times(1).returning(|c| Ok(token(c)));

        let resolver = ClusterMetadataResolver::new(Arc::new(describer), cache.clone());
        let connector = EksClusterConnector::new(resolver, Arc::new(minter));

        let err = connector.connect("c1").await.err().unwrap();
        assert!(err.to_string().contains("invalid endpoint"));
        assert_eq!(
            cache.get("c1").map(|info| info.endpoint),
            Some("still not a url".to_string())
        );
    }

    #[tokio::test]
    async fn test_prewarm_populates_cache() {
        let cache = Arc::new(InMemoryClusterCache::new());
        let mut describer = MockDescriber::new();
        describer
            .expect_describe_cluster()
            .returning(|_| Ok(Some(described())));

        let resolver = ClusterMetadataResolver::new(Arc::new(describer), cache.clone());
        let connector = EksClusterConnector::new(resolver, Arc::new(MockMinter::new()));

        connector.prewarm("c1").await.unwrap();
        assert!(cache.get("c1").is_some());
    }

    const OLD_ENDPOINT: &str = "https://127.0.0.1:1";
    const NEW_ENDPOINT: &str = "https://rotated.eks.amazonaws.com";

    fn connection_refused() -> Error {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        Error::from(kube::Error::Service(Box::new(refused)))
    }

    fn rotated() -> DescribedCluster {
        DescribedCluster {
            name: Some("c1".to_string()),
            endpoint: Some(NEW_ENDPOINT.to_string()),
            ca_data: None,
        }
    }

    /// Resources that cannot reach the old endpoint but list `team-a` on
    /// the new one; counts how many clients were built
    fn endpoint_aware_builder(
        built: Arc<AtomicUsize>,
    ) -> impl Fn(&ClusterInfo, &BearerToken) -> Result<Arc<dyn KubeResources>> + Send + Sync {
        move |info, _token| {
            built.fetch_add(1, Ordering::SeqCst);
            let mut resources = MockKubeResources::new();
            if info.endpoint == OLD_ENDPOINT {
                resources
                    .expect_list_namespaces()
                    .returning(|| Err(connection_refused()));
            } else {
                resources
                    .expect_list_namespaces()
                    .returning(|| Ok(vec!["team-a".to_string()]));
            }
            Ok(Arc::new(resources))
        }
    }

    fn connector_with(
        describer: MockDescriber,
        minter: MockMinter,
        cache: Arc<InMemoryClusterCache>,
        build: impl Fn(&ClusterInfo, &BearerToken) -> Result<Arc<dyn KubeResources>>
            + Send
            + Sync
            + 'static,
    ) -> EksClusterConnector {
        EksClusterConnector {
            resolver: ClusterMetadataResolver::new(Arc::new(describer), cache),
            minter: Arc::new(minter),
            build: Arc::new(build),
        }
    }

    /// Story: a cluster whose endpoint rotated while its metadata was cached
    /// is re-described on the first unreachable call, and the call succeeds
    /// against the new endpoint with the same token
    #[tokio::test]
    async fn story_rotated_endpoint_is_re_described_and_retried() {
        let cache = Arc::new(InMemoryClusterCache::new());
        cache.set("c1", ClusterInfo::new("c1", OLD_ENDPOINT, None));

        let mut describer = MockDescriber::new();
        describer
            .expect_describe_cluster()
            .times(1)
            .returning(|_| Ok(Some(rotated())));
        let mut minter = MockMinter::new();
        minter.expect_mint().times(1).returning(|c| Ok(token(c)));

        let built = Arc::new(AtomicUsize::new(0));
        let connector =
            connector_with(describer, minter, cache.clone(), endpoint_aware_builder(built.clone()));

        let kube = connector.connect("c1").await.unwrap();
        assert_eq!(kube.list_namespaces().await.unwrap(), ["team-a"]);
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("c1").unwrap().endpoint, NEW_ENDPOINT);

        // Later calls in the session use the rebuilt client directly
        assert_eq!(kube.list_namespaces().await.unwrap(), ["team-a"]);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_api_errors_do_not_re_describe() {
        let cache = Arc::new(InMemoryClusterCache::new());
        cache.set("c1", ClusterInfo::new("c1", OLD_ENDPOINT, None));

        let mut describer = MockDescriber::new();
        describer.expect_describe_cluster().never();
        let mut minter = MockMinter::new();
        minter.expect_mint().returning(|c| Ok(token(c)));

        let connector = connector_with(describer, minter, cache, |_, _| {
            let mut resources = MockKubeResources::new();
            resources.expect_create_namespace().returning(|_| {
                Err(Error::from(kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "forbidden".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                })))
            });
            Ok(Arc::new(resources))
        });

        let kube = connector.connect("c1").await.unwrap();
        let err = kube.create_namespace("team-a").await.unwrap_err();
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_still_unreachable_after_refresh_fails_without_second_describe() {
        let cache = Arc::new(InMemoryClusterCache::new());
        cache.set("c1", ClusterInfo::new("c1", OLD_ENDPOINT, None));

        let mut describer = MockDescriber::new();
        describer.expect_describe_cluster().times(1).returning(|_| {
            Ok(Some(DescribedCluster {
                endpoint: Some(OLD_ENDPOINT.to_string()),
                ..rotated()
            }))
        });
        let mut minter = MockMinter::new();
        minter.expect_mint().times(1).returning(|c| Ok(token(c)));

        let built = Arc::new(AtomicUsize::new(0));
        let connector =
            connector_with(describer, minter, cache, endpoint_aware_builder(built.clone()));

        let kube = connector.connect("c1").await.unwrap();
        assert!(kube.list_namespaces().await.unwrap_err().is_transport());
        assert!(kube.list_namespaces().await.unwrap_err().is_transport());
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_token_is_reminted_on_reconnect() {
        let cache = Arc::new(InMemoryClusterCache::new());
        cache.set("c1", ClusterInfo::new("c1", OLD_ENDPOINT, None));

        let mut describer = MockDescriber::new();
        describer
            .expect_describe_cluster()
            .returning(|_| Ok(Some(rotated())));
        let mut minter = MockMinter::new();
        let mut seq = mockall::Sequence::new();
        minter
            .expect_mint()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|c| {
                let creds = Credentials::new("AKID", "SECRET", None, None, "test");
                presign_token(c, "us-west-2", &creds, SystemTime::UNIX_EPOCH)
            });
        minter
            .expect_mint()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|c| Ok(token(c)));

        let connector = connector_with(
            describer,
            minter,
            cache,
            endpoint_aware_builder(Arc::new(AtomicUsize::new(0))),
        );

        let kube = connector.connect("c1").await.unwrap();
        assert_eq!(kube.list_namespaces().await.unwrap(), ["team-a"]);
    }

    #[tokio::test]
    async fn test_failed_re_describe_drops_unreachable_entry() {
        let cache = Arc::new(InMemoryClusterCache::new());
        cache.set("c1", ClusterInfo::new("c1", OLD_ENDPOINT, None));

        let mut describer = MockDescriber::new();
        describer
            .expect_describe_cluster()
            .times(1)
            .returning(|_| Err(Error::upstream("eks", "DescribeCluster", "throttled")));
        let mut minter = MockMinter::new();
        minter.expect_mint().returning(|c| Ok(token(c)));

        let connector = connector_with(
            describer,
            minter,
            cache.clone(),
            endpoint_aware_builder(Arc::new(AtomicUsize::new(0))),
        );

        let kube = connector.connect("c1").await.unwrap();
        let err = kube.list_namespaces().await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
        assert!(cache.get("c1").is_none());
    }
}
