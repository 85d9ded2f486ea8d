//! EKS bearer token minting
//!
//! An EKS token is a presigned STS `GetCallerIdentity` URL, bound to one
//! cluster through the signed `x-k8s-aws-id` header, encoded as unpadded
//! base64url behind the `k8s-aws-v1.` marker. The API server's authenticator
//! replays the URL against STS to learn the caller's identity.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SignatureLocation, SigningParams, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use keyway_common::{Error, Result};

/// Literal prefix identifying the token format to the authenticator
pub const TOKEN_PREFIX: &str = "k8s-aws-v1.";

/// Presigned URL validity window
pub const TOKEN_EXPIRES_IN: Duration = Duration::from_secs(200);

/// Signed header binding the token to a cluster
pub const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";

const STS_SERVICE: &str = "sts";
const STS_QUERY: [(&str, &str); 2] = [("Action", "GetCallerIdentity"), ("Version", "2011-06-15")];

/// A minted cluster authentication token
#[derive(Clone)]
pub struct BearerToken {
    token: String,
    cluster_name: String,
    issued_at: SystemTime,
}

impl BearerToken {
    /// The token string sent as `Authorization: Bearer <token>`
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Cluster the token was minted for
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// When STS stops accepting the presigned URL
    pub fn expires_at(&self) -> SystemTime {
        self.issued_at + TOKEN_EXPIRES_IN
    }

    /// Whether the validity window has elapsed at `now`
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at()
    }

    /// Whether the validity window has elapsed
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the presigned URL
        f.debug_struct("BearerToken")
            .field("cluster_name", &self.cluster_name)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

/// Trait abstracting token minting so cluster connections can be tested
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenMinter: Send + Sync {
    /// Mint a fresh token for `cluster_name`
    async fn mint(&self, cluster_name: &str) -> Result<BearerToken>;
}

/// Mints tokens by presigning STS requests with ambient credentials
#[derive(Clone, Debug)]
pub struct StsTokenMinter {
    credentials: Option<SharedCredentialsProvider>,
    region: String,
}

impl StsTokenMinter {
    /// Create a minter for `region`
    ///
    /// `credentials` is `None` when the SDK's default chain found no
    /// provider; minting then fails with `CredentialsUnavailable`.
    pub fn new(credentials: Option<SharedCredentialsProvider>, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }
}

#[async_trait]
impl TokenMinter for StsTokenMinter {
    async fn mint(&self, cluster_name: &str) -> Result<BearerToken> {
        let provider = self.credentials.as_ref().ok_or_else(|| {
            Error::credentials_unavailable("no AWS credentials provider is configured")
        })?;
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| Error::credentials_unavailable(e.to_string()))?;

        let token = presign_token(cluster_name, &self.region, &credentials, SystemTime::now())?;
        debug!(cluster = %cluster_name, region = %self.region, "minted cluster bearer token");
        Ok(token)
    }
}

/// Presign an STS `GetCallerIdentity` request for `cluster_name` at `now`
pub fn presign_token(
    cluster_name: &str,
    region: &str,
    credentials: &Credentials,
    now: SystemTime,
) -> Result<BearerToken> {
    let host = format!("sts.{}.amazonaws.com", region);
    let unsigned_url = format!("https://{}/?{}", host, encode_query(STS_QUERY));

    let identity = Identity::from(credentials.clone());
    let mut settings = SigningSettings::default();
    settings.signature_location = SignatureLocation::QueryParams;
    settings.expires_in = Some(TOKEN_EXPIRES_IN);

    let params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(STS_SERVICE)
        .time(now)
        .settings(settings)
        .build()
        .map_err(|e| Error::internal_with_context("token", format!("signing params: {}", e)))?;

    let headers = [(CLUSTER_ID_HEADER, cluster_name)];
    let signable = SignableRequest::new(
        "GET",
        unsigned_url.as_str(),
        headers.into_iter(),
        SignableBody::Bytes(&[]),
    )
    .map_err(|e| Error::internal_with_context("token", format!("signable request: {}", e)))?;

    let (instructions, _signature) = sign(signable, &SigningParams::V4(params))
        .map_err(|e| Error::internal_with_context("token", format!("presign failed: {}", e)))?
        .into_parts();

    // The signature already fixes the canonical form, so order is irrelevant here
    let query = encode_query(
        STS_QUERY.into_iter().chain(
            instructions
                .params()
                .iter()
                .map(|(name, value)| (*name, value.as_ref())),
        ),
    );
    let url = format!("https://{}/?{}", host, query);

    Ok(BearerToken {
        token: format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(url)),
        cluster_name: cluster_name.to_string(),
        issued_at: now,
    })
}

fn encode_query<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
