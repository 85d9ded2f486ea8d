//! HTTP invoke endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use keyway_common::{Error, Result};

use crate::request::AgentEvent;
use crate::response::AgentResponse;
use crate::router::RequestRouter;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Operation router
    pub router: Arc<RequestRouter>,
}

/// Build the HTTP router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/invoke", post(invoke_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Handle one operation event; the envelope carries the outcome status
async fn invoke_handler(
    State(state): State<AppState>,
    Json(event): Json<AgentEvent>,
) -> Json<AgentResponse> {
    Json(state.router.handle(&event).await)
}

/// Serve the invoke endpoint until the process is stopped
pub async fn start_server(addr: SocketAddr, router: Arc<RequestRouter>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::config(format!("failed to bind {}: {}", addr, e)))?;

    info!(addr = %addr, "Starting invoke server");

    axum::serve(listener, app(AppState { router }))
        .await
        .map_err(|e| Error::internal_with_context("server", format!("server error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::{event, Mocks, PRINCIPAL};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app_with(mocks: Mocks) -> Router {
        app(AppState {
            router: Arc::new(mocks.router()),
        })
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = app_with(Mocks::new())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    /// Integration test: a delete event round-trips through the endpoint
    #[tokio::test]
    async fn integration_invoke_returns_envelope() {
        let mut mocks = Mocks::new();
        mocks
            .access
            .expect_delete_access_entry()
            .times(1)
            .returning(|_, _| Ok(()));
        let app = app_with(mocks.connected());

        let payload = serde_json::to_vec(&event(
            "/delete-access-entry",
            &[("clusterName", "c1"), ("principalArn", PRINCIPAL)],
        ))
        .unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/invoke")
            .header("content-type", "application/json")
            .body(Body::from(payload))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let envelope: AgentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.status(), 200);
        assert_eq!(envelope.body(), "Successfully deleted the access entry");
        assert_eq!(envelope.response.api_path, "/delete-access-entry");
    }

    /// Integration test: failures still return HTTP 200 with a 400 envelope
    #[tokio::test]
    async fn integration_failure_is_inside_envelope() {
        let mut mocks = Mocks::new();
        mocks.connector.expect_connect().never();
        let app = app_with(mocks);

        let payload = serde_json::to_vec(&event("/nope", &[])).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/invoke")
            .header("content-type", "application/json")
            .body(Body::from(payload))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let envelope: AgentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.status(), 400);
    }

    /// Integration test: a property without a name still yields an envelope
    #[tokio::test]
    async fn integration_unnamed_property_is_inside_envelope() {
        let mut mocks = Mocks::new();
        mocks.connector.expect_connect().never();
        let app = app_with(mocks);

        let payload = serde_json::json!({
            "apiPath": "/describe-access-entry",
            "httpMethod": "POST",
            "requestBody": {"content": {"application/json": {"properties": [
                {"type": "string", "value": "c1"}
            ]}}}
        });
        let request = Request::builder()
            .method("POST")
            .uri("/invoke")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let envelope: AgentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope.status(), 400);
        assert!(envelope.body().contains("clusterName must be provided"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/invoke")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app_with(Mocks::new()).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
