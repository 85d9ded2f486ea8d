//! IAM role provisioning for pod identity
//!
//! Roles are created with a trust policy that lets the EKS pod identity
//! agent assume them. Provisioned roles are never deleted by Keyway.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, instrument};

#[cfg(test)]
use mockall::automock;

use keyway_common::{Error, Result};

/// Infix between the service account name and the random suffix
pub const ROLE_NAME_INFIX: &str = "-pod-identity-Role";

/// Service principal of the EKS pod identity agent
pub const POD_IDENTITY_SERVICE_PRINCIPAL: &str = "pods.eks.amazonaws.com";

/// IAM's role name length limit
pub const MAX_ROLE_NAME_LEN: usize = 64;

const SUFFIX_BYTES: usize = 5;

/// A role returned by IAM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IamRole {
    /// Role name
    pub role_name: String,
    /// Role ARN
    pub arn: String,
}

/// Trait abstracting IAM `CreateRole`
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamApi: Send + Sync {
    /// Create a role, returning `None` when IAM reports no role object
    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<Option<IamRole>>;
}

/// Ten lowercase hex characters from five random bytes
pub fn random_suffix() -> Result<String> {
    let mut raw = [0u8; SUFFIX_BYTES];
    aws_lc_rs::rand::fill(&mut raw)
        .map_err(|_| Error::internal_with_context("role", "system random source failed"))?;

    let mut hex = String::with_capacity(SUFFIX_BYTES * 2);
    for byte in raw {
        let _ = write!(hex, "{:02x}", byte);
    }
    Ok(hex)
}

/// Role name for a service account with the given suffix
///
/// The service account part is truncated so the whole name fits
/// [`MAX_ROLE_NAME_LEN`].
pub fn role_name(service_account: &str, suffix: &str) -> String {
    let budget = MAX_ROLE_NAME_LEN.saturating_sub(ROLE_NAME_INFIX.len() + suffix.len());
    let prefix: String = service_account.chars().take(budget).collect();
    format!("{}{}{}", prefix, ROLE_NAME_INFIX, suffix)
}

/// Trust policy allowing the pod identity agent to assume and tag sessions
pub fn trust_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": POD_IDENTITY_SERVICE_PRINCIPAL},
            "Action": ["sts:AssumeRole", "sts:TagSession"]
        }]
    })
}

/// Creates per-service-account IAM roles
#[derive(Clone)]
pub struct RoleProvisioner {
    iam: Arc<dyn IamApi>,
}

impl RoleProvisioner {
    /// Create a provisioner over IAM
    pub fn new(iam: Arc<dyn IamApi>) -> Self {
        Self { iam }
    }

    /// Create a fresh role for `service_account` and return its ARN
    #[instrument(skip(self))]
    pub async fn provision(&self, service_account: &str) -> Result<String> {
        let name = role_name(service_account, &random_suffix()?);
        let policy = trust_policy().to_string();

        let role = self
            .iam
            .create_role(&name, &policy)
            .await?
            .ok_or_else(|| Error::role_creation(&name, "CreateRole returned no role"))?;

        info!(role = %role.role_name, arn = %role.arn, "created pod identity role");
        Ok(role.arn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_suffix_is_ten_hex_chars() {
        let suffix = random_suffix().unwrap();
        assert_eq!(suffix.len(), 10);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_role_name_shape() {
        assert_eq!(
            role_name("app", "0123456789"),
            "app-pod-identity-Role0123456789"
        );
    }

    #[test]
    fn test_long_service_account_is_truncated() {
        let sa = "a".repeat(80);
        let name = role_name(&sa, "0123456789");
        assert_eq!(name.len(), MAX_ROLE_NAME_LEN);
        assert!(name.ends_with("-pod-identity-Role0123456789"));
    }

    /// Story: many roles for the same service account never collide
    #[test]
    fn story_role_names_do_not_collide() {
        let names: HashSet<String> = (0..1000)
            .map(|_| role_name("app", &random_suffix().unwrap()))
            .collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_trust_policy_shape() {
        let policy = trust_policy();
        assert_eq!(policy["Version"], "2012-10-17");
        let statement = &policy["Statement"][0];
        assert_eq!(statement["Effect"], "Allow");
        assert_eq!(statement["Principal"]["Service"], "pods.eks.amazonaws.com");
        assert_eq!(
            statement["Action"],
            json!(["sts:AssumeRole", "sts:TagSession"])
        );
    }

    #[tokio::test]
    async fn test_provision_returns_arn() {
        let mut iam = MockIamApi::new();
        iam.expect_create_role()
            .withf(|name, policy| {
                name.starts_with("app-pod-identity-Role")
                    && name.len() == "app-pod-identity-Role".len() + 10
                    && policy.contains(POD_IDENTITY_SERVICE_PRINCIPAL)
            })
            .times(1)
            .returning(|name, _| {
                Ok(Some(IamRole {
                    role_name: name.to_string(),
                    arn: format!("arn:aws:iam::111:role/{}", name),
                }))
            });

        let arn = RoleProvisioner::new(Arc::new(iam))
            .provision("app")
            .await
            .unwrap();
        assert!(arn.starts_with("arn:aws:iam::111:role/app-pod-identity-Role"));
    }

    #[tokio::test]
    async fn test_missing_role_object_is_role_creation_error() {
        let mut iam = MockIamApi::new();
        iam.expect_create_role().returning(|_, _| Ok(None));

        let err = RoleProvisioner::new(Arc::new(iam))
            .provision("app")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoleCreation { .. }));
    }
}
