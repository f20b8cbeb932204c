//! HTTP routes over the engine.

use crate::engine::Engine;
use crate::error::EngineError;
use autoflow_core::{UserId, WorkflowId};
use autoflow_integration::TokenPayload;
use autoflow_workflow::WorkflowDefinition;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tower_http::trace::TraceLayer;
use tracing::error;

/// An engine failure rendered as a JSON error body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<Report<EngineError>> for ApiError {
    fn from(report: Report<EngineError>) -> Self {
        let context = report.current_context();
        let status = match context {
            EngineError::InvalidWorkflow(_)
            | EngineError::UnsupportedStep(_)
            | EngineError::UnknownService { .. }
            | EngineError::InvalidCredential { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::WorkflowNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::CycleFailed { .. } => StatusCode::BAD_GATEWAY,
            EngineError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = ?report, "request failed");
        }
        Self {
            status,
            message: context.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_id<T>(raw: &str) -> ApiResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|e| ApiError::bad_request(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct EnabledBody {
    enabled: bool,
}

/// Builds the application router.
pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workflows", post(submit_workflow))
        .route(
            "/workflows/{id}",
            get(get_workflow).put(replace_workflow).delete(delete_workflow),
        )
        .route("/workflows/{id}/enabled", put(set_enabled))
        .route("/workflows/{id}/status", get(workflow_status))
        .route("/workflows/{id}/run", post(run_now))
        .route("/users/{user_id}/workflows", get(list_workflows))
        .route("/users/{user_id}/integrations", get(integration_status))
        .route(
            "/users/{user_id}/credentials/{service}",
            put(connect_credential).delete(disconnect_credential),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn health() -> &'static str {
    "ok"
}

async fn submit_workflow(
    State(engine): State<Engine>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<impl IntoResponse> {
    let id = engine.submit_workflow(definition).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id.to_string() }))))
}

async fn get_workflow(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let workflow = engine.get_workflow(parse_id::<WorkflowId>(&id)?).await?;
    Ok(Json(workflow))
}

async fn replace_workflow(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<impl IntoResponse> {
    let workflow = engine
        .replace_workflow(parse_id::<WorkflowId>(&id)?, definition)
        .await?;
    Ok(Json(workflow))
}

async fn delete_workflow(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if engine.delete_workflow(parse_id::<WorkflowId>(&id)?).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("workflow not found: {id}")))
    }
}

async fn set_enabled(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(body): Json<EnabledBody>,
) -> ApiResult<impl IntoResponse> {
    let workflow = engine
        .set_enabled(parse_id::<WorkflowId>(&id)?, body.enabled)
        .await?;
    Ok(Json(workflow))
}

async fn workflow_status(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = engine.workflow_status(parse_id::<WorkflowId>(&id)?).await?;
    Ok(Json(status))
}

async fn run_now(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = engine.run_now(parse_id::<WorkflowId>(&id)?).await?;
    Ok(Json(outcome))
}

async fn list_workflows(
    State(engine): State<Engine>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let workflows = engine.list_workflows(parse_id::<UserId>(&user_id)?).await?;
    Ok(Json(workflows))
}

async fn integration_status(
    State(engine): State<Engine>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let statuses = engine
        .integration_status(parse_id::<UserId>(&user_id)?)
        .await?;
    Ok(Json(statuses))
}

async fn connect_credential(
    State(engine): State<Engine>,
    Path((user_id, service)): Path<(String, String)>,
    Json(payload): Json<TokenPayload>,
) -> ApiResult<impl IntoResponse> {
    let credential = engine
        .connect_credential(parse_id::<UserId>(&user_id)?, &service, payload)
        .await?;
    Ok(Json(credential))
}

async fn disconnect_credential(
    State(engine): State<Engine>,
    Path((user_id, service)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if engine
        .disconnect_credential(parse_id::<UserId>(&user_id)?, &service)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!(
            "no {service} credential for {user_id}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{definition, engine_with, payload};
    use autoflow_integration::ScriptedAdapter;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        router(engine_with(Arc::new(ScriptedAdapter::new("svc"))))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn submit_list_and_status() {
        let app = app();
        let user = UserId::new();
        let body = serde_json::to_value(definition(user)).expect("serialize");

        let (status, created) = send(&app, "POST", "/workflows", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().expect("id").to_string();

        let (status, listed) = send(&app, "GET", &format!("/users/{user}/workflows"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["trigger"]["configuration"]["keywords"], "project, update");

        let (status, wf_status) =
            send(&app, "GET", &format!("/workflows/{id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(wf_status["state"]["state"], "idle");
    }

    #[tokio::test]
    async fn invalid_definition_is_unprocessable() {
        let app = app();
        let mut def = definition(UserId::new());
        def.steps.truncate(1);

        let (status, body) = send(
            &app,
            "POST",
            "/workflows",
            Some(serde_json::to_value(def).expect("serialize")),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().expect("message").contains("no action steps"));
    }

    #[tokio::test]
    async fn malformed_id_is_bad_request() {
        let (status, _) = send(&app(), "GET", "/workflows/not-an-id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let app = app();
        let missing = WorkflowId::new();

        let (status, _) = send(&app, "GET", &format!("/workflows/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &format!("/workflows/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn credentials_connect_and_disconnect() {
        let app = app();
        let user = UserId::new();
        let uri = format!("/users/{user}/credentials/svc");
        let body = serde_json::to_value(payload("secret-token")).expect("serialize");

        let (status, connected) = send(&app, "PUT", &uri, Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(connected["service_name"], "svc");
        assert!(!connected.to_string().contains("secret-token"));

        let (_, integrations) =
            send(&app, "GET", &format!("/users/{user}/integrations"), None).await;
        assert_eq!(integrations[0]["connected"], true);

        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toggle_and_run() {
        let app = app();
        let user = UserId::new();
        let body = serde_json::to_value(definition(user)).expect("serialize");
        let (_, created) = send(&app, "POST", "/workflows", Some(body)).await;
        let id = created["id"].as_str().expect("id").to_string();

        let (status, workflow) = send(
            &app,
            "PUT",
            &format!("/workflows/{id}/enabled"),
            Some(json!({ "enabled": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(workflow["enabled"], false);

        let (status, outcome) = send(&app, "POST", &format!("/workflows/{id}/run"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["outcome"], "skipped");
        assert_eq!(outcome["reason"], "disabled");
    }
}
