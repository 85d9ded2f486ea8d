//! Inbound operation events
//!
//! An event names its operation in `apiPath` and carries parameters as a
//! list of `{name, type, value}` properties. [`ParsedRequest::parse`] turns
//! an event into a typed [`Operation`] in one step, so no orchestrator sees
//! raw properties.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use keyway_access::{AccessPolicyGrant, AccessScope, CreateAssociation};
use keyway_common::{Error, Result};

/// Media type under which properties are carried
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// An operation event as sent by the agent action group
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    /// Event format version
    #[serde(default)]
    pub message_version: Option<String>,
    /// Calling action group, echoed in the response
    #[serde(default)]
    pub action_group: String,
    /// Operation identifier, e.g. `/create-access-entry`
    #[serde(default)]
    pub api_path: String,
    /// HTTP method declared for the operation, echoed in the response
    #[serde(default)]
    pub http_method: String,
    /// Operation parameters
    #[serde(default)]
    pub request_body: Option<RequestBody>,
    /// Session attributes, echoed unchanged
    #[serde(default)]
    pub session_attributes: Map<String, Value>,
    /// Prompt session attributes, echoed unchanged
    #[serde(default)]
    pub prompt_session_attributes: Map<String, Value>,
}

/// Request body keyed by media type
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    /// Content per media type
    #[serde(default)]
    pub content: HashMap<String, MediaContent>,
}

/// Properties for one media type
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaContent {
    /// Named parameters
    #[serde(default)]
    pub properties: Vec<Property>,
}

/// A single named parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Parameter name; unnamed properties are ignored
    #[serde(default)]
    pub name: String,
    /// Declared type, informational only
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Parameter value
    #[serde(default)]
    pub value: Value,
}

impl Property {
    /// Create a string property
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some("string".to_string()),
            value: Value::String(value.into()),
        }
    }
}

impl AgentEvent {
    /// Build an event for `api_path` with string properties
    pub fn new(api_path: impl Into<String>, properties: Vec<Property>) -> Self {
        let mut content = HashMap::new();
        content.insert(JSON_MEDIA_TYPE.to_string(), MediaContent { properties });
        Self {
            message_version: Some("1.0".to_string()),
            api_path: api_path.into(),
            http_method: "POST".to_string(),
            request_body: Some(RequestBody { content }),
            ..Default::default()
        }
    }

    /// Operation name with any leading `/` removed
    pub fn operation_name(&self) -> &str {
        self.api_path.trim().trim_start_matches('/')
    }

    /// Trimmed, non-empty property values by name; later duplicates win
    /// and unnamed properties are skipped
    pub fn properties(&self) -> Properties {
        let values: HashMap<String, String> = self
            .request_body
            .as_ref()
            .and_then(|body| body.content.get(JSON_MEDIA_TYPE))
            .map(|media| {
                media
                    .properties
                    .iter()
                    .filter_map(|p| {
                        let name = p.name.trim();
                        if name.is_empty() {
                            return None;
                        }
                        let value = match &p.value {
                            Value::Null => return None,
                            Value::String(s) => s.trim().to_string(),
                            other => other.to_string(),
                        };
                        (!value.is_empty()).then(|| (name.to_string(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Properties { values }
    }
}

/// Property lookup for one event
#[derive(Clone, Debug, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    /// An optional property
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// A required property, or a validation error naming it
    pub fn require(&self, operation: &str, name: &str) -> Result<String> {
        self.get(name)
            .map(str::to_string)
            .ok_or_else(|| Error::missing_field(operation, name))
    }
}

/// Identifies an access entry
#[derive(Clone, Debug, PartialEq)]
pub struct AccessEntryTarget {
    /// Target cluster
    pub cluster_name: String,
    /// Principal of the entry
    pub principal_arn: String,
}

/// Identifies one policy association on an access entry
#[derive(Clone, Debug, PartialEq)]
pub struct AccessPolicyTarget {
    /// Target cluster
    pub cluster_name: String,
    /// Principal of the entry
    pub principal_arn: String,
    /// Associated policy
    pub policy_arn: String,
}

/// Identifies a pod identity association
#[derive(Clone, Debug, PartialEq)]
pub struct AssociationTarget {
    /// Target cluster
    pub cluster_name: String,
    /// Association ID
    pub association_id: String,
}

/// A recognized operation with its typed parameters
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Create an access entry and associate a policy
    CreateAccessEntry(AccessPolicyGrant),
    /// List an access entry's policies
    DescribeAccessEntry(AccessEntryTarget),
    /// Delete an access entry
    DeleteAccessEntry(AccessEntryTarget),
    /// Associate a policy with an existing access entry
    AttachAccessPolicy(AccessPolicyGrant),
    /// Remove a policy from an access entry
    DeleteAccessPolicy(AccessPolicyTarget),
    /// Bind a workload identity to a role
    CreatePodIdentityAssociation(CreateAssociation),
    /// Describe a pod identity association
    DescribePodIdentityAssociation(AssociationTarget),
    /// Delete a pod identity association
    DeletePodIdentityAssociation(AssociationTarget),
}

impl Operation {
    /// Operation name as it appears in `apiPath`
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateAccessEntry(_) => "create-access-entry",
            Operation::DescribeAccessEntry(_) => "describe-access-entry",
            Operation::DeleteAccessEntry(_) => "delete-access-entry",
            Operation::AttachAccessPolicy(_) => "attach-access-policy",
            Operation::DeleteAccessPolicy(_) => "delete-access-policy",
            Operation::CreatePodIdentityAssociation(_) => "create-pod-identity-association",
            Operation::DescribePodIdentityAssociation(_) => "describe-pod-identity-association",
            Operation::DeletePodIdentityAssociation(_) => "delete-pod-identity-association",
        }
    }

    /// Cluster the operation targets
    pub fn cluster_name(&self) -> &str {
        match self {
            Operation::CreateAccessEntry(g) | Operation::AttachAccessPolicy(g) => &g.cluster_name,
            Operation::DescribeAccessEntry(t) | Operation::DeleteAccessEntry(t) => &t.cluster_name,
            Operation::DeleteAccessPolicy(t) => &t.cluster_name,
            Operation::CreatePodIdentityAssociation(r) => &r.cluster_name,
            Operation::DescribePodIdentityAssociation(t)
            | Operation::DeletePodIdentityAssociation(t) => &t.cluster_name,
        }
    }
}

/// Outcome of parsing an event
#[derive(Debug)]
pub enum ParsedRequest {
    /// A recognized operation with valid parameters
    Known(Operation),
    /// An `apiPath` naming no operation
    Unknown(String),
    /// A recognized operation with missing or malformed parameters
    Invalid(Error),
}

impl ParsedRequest {
    /// Parse an event into a typed operation
    pub fn parse(event: &AgentEvent) -> Self {
        let op = event.operation_name();
        let props = event.properties();

        let parsed = match op {
            "create-access-entry" => grant(op, &props).map(Operation::CreateAccessEntry),
            "attach-access-policy" => grant(op, &props).map(Operation::AttachAccessPolicy),
            "describe-access-entry" => entry(op, &props).map(Operation::DescribeAccessEntry),
            "delete-access-entry" => entry(op, &props).map(Operation::DeleteAccessEntry),
            "delete-access-policy" => policy(op, &props).map(Operation::DeleteAccessPolicy),
            "create-pod-identity-association" => {
                create_association(op, &props).map(Operation::CreatePodIdentityAssociation)
            }
            "describe-pod-identity-association" => {
                association(op, &props).map(Operation::DescribePodIdentityAssociation)
            }
            "delete-pod-identity-association" => {
                association(op, &props).map(Operation::DeletePodIdentityAssociation)
            }
            _ => return ParsedRequest::Unknown(event.api_path.clone()),
        };

        match parsed {
            Ok(operation) => ParsedRequest::Known(operation),
            Err(e) => ParsedRequest::Invalid(e),
        }
    }
}

fn grant(op: &str, props: &Properties) -> Result<AccessPolicyGrant> {
    Ok(AccessPolicyGrant {
        cluster_name: props.require(op, "clusterName")?,
        principal_arn: props.require(op, "principalArn")?,
        policy_arn: props.require(op, "accessPolicy")?,
        scope: AccessScope::from_csv(props.get("namespaces")),
    })
}

fn entry(op: &str, props: &Properties) -> Result<AccessEntryTarget> {
    Ok(AccessEntryTarget {
        cluster_name: props.require(op, "clusterName")?,
        principal_arn: props.require(op, "principalArn")?,
    })
}

fn policy(op: &str, props: &Properties) -> Result<AccessPolicyTarget> {
    Ok(AccessPolicyTarget {
        cluster_name: props.require(op, "clusterName")?,
        principal_arn: props.require(op, "principalArn")?,
        policy_arn: props.require(op, "accessPolicy")?,
    })
}

fn create_association(op: &str, props: &Properties) -> Result<CreateAssociation> {
    Ok(CreateAssociation {
        cluster_name: props.require(op, "clusterName")?,
        namespace: props.require(op, "namespace")?,
        service_account: props.require(op, "serviceAccount")?,
        role_arn: props.get("roleArn").map(str::to_string),
    })
}

fn association(op: &str, props: &Properties) -> Result<AssociationTarget> {
    Ok(AssociationTarget {
        cluster_name: props.require(op, "clusterName")?,
        association_id: props.require(op, "associationId")?,
    })
}
