//! Response envelope
//!
//! Every outcome, success or failure, is returned in the same envelope. The
//! body is always a string: serialized JSON for create/describe results,
//! plain sentences for delete/attach/detach.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use keyway_common::Error;

use crate::request::AgentEvent;

/// Envelope format version
pub const MESSAGE_VERSION: &str = "1.0";

/// Status for successful operations
pub const STATUS_OK: u16 = 200;

/// Status for failed or unrecognized operations
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Body for a successful `create-access-entry`
pub const CREATE_ACCESS_ENTRY_BODY: &str =
    r#"{"accessEntryArn":"Successfully created","accessPolicy":"Successfully attached to access entry"}"#;

/// Body for a successful `delete-access-entry`
pub const DELETE_ACCESS_ENTRY_MESSAGE: &str = "Successfully deleted the access entry";

/// Body for a successful `attach-access-policy`
pub const ATTACH_ACCESS_POLICY_MESSAGE: &str =
    "Successfully attached the access policy for the access entry";

/// Body for a successful `delete-access-policy`
pub const DELETE_ACCESS_POLICY_MESSAGE: &str =
    "Successfully deleted the access policy from the access entry";

/// Body for a successful `delete-pod-identity-association`
pub const DELETE_POD_IDENTITY_MESSAGE: &str =
    "Successfully deleted the pod identity association from the EKS cluster";

/// Error text for an unrecognized `apiPath`
pub const UNKNOWN_OPERATION_MESSAGE: &str = "Incorrect API Path. Try another way";

/// The full response returned to the caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    /// Envelope format version
    pub message_version: String,
    /// The operation result
    pub response: ActionResponse,
    /// Session attributes from the event
    pub session_attributes: Map<String, Value>,
    /// Prompt session attributes from the event
    pub prompt_session_attributes: Map<String, Value>,
}

/// Operation result inside the envelope
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    /// Echoed action group
    pub action_group: String,
    /// Echoed `apiPath`
    pub api_path: String,
    /// Echoed HTTP method
    pub http_method: String,
    /// 200 or 400
    pub http_status_code: u16,
    /// Body keyed by media type
    pub response_body: ResponseBody,
}

/// Response body keyed by media type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    /// JSON media type body
    #[serde(rename = "application/json")]
    pub json: BodyText,
}

/// The body string
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyText {
    /// Body content
    pub body: String,
}

/// Error body for a failed operation on `api_path`
pub fn error_body(message: &str, api_path: &str) -> String {
    serde_json::json!({ "error": format!("{} API Call - {}", message, api_path) }).to_string()
}

impl AgentResponse {
    /// Envelope echoing `event` with the given status and body
    pub fn new(event: &AgentEvent, status: u16, body: impl Into<String>) -> Self {
        Self {
            message_version: MESSAGE_VERSION.to_string(),
            response: ActionResponse {
                action_group: event.action_group.clone(),
                api_path: event.api_path.clone(),
                http_method: event.http_method.clone(),
                http_status_code: status,
                response_body: ResponseBody {
                    json: BodyText { body: body.into() },
                },
            },
            session_attributes: event.session_attributes.clone(),
            prompt_session_attributes: event.prompt_session_attributes.clone(),
        }
    }

    /// A 200 envelope
    pub fn success(event: &AgentEvent, body: impl Into<String>) -> Self {
        Self::new(event, STATUS_OK, body)
    }

    /// An error envelope for a failed operation
    pub fn failure(event: &AgentEvent, error: &Error) -> Self {
        Self::new(
            event,
            error.status_code(),
            error_body(&error.to_string(), &event.api_path),
        )
    }

    /// A 400 envelope for an unrecognized operation
    pub fn unknown_operation(event: &AgentEvent) -> Self {
        Self::new(
            event,
            STATUS_BAD_REQUEST,
            serde_json::json!({ "error": UNKNOWN_OPERATION_MESSAGE }).to_string(),
        )
    }

    /// Status code carried in the envelope
    pub fn status(&self) -> u16 {
        self.response.http_status_code
    }

    /// Body string carried in the envelope
    pub fn body(&self) -> &str {
        &self.response.response_body.json.body
    }
}
