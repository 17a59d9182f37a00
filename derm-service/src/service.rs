use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use derm_flow::{
    ChatCompletionsClient, FlowError, ImageClassifier, InMemorySessionStorage, SessionRunner,
    UploadOutcome, prompt::DISCLAIMER,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ServiceConfig,
    models::{ChatRequest, ReplyResponse, SessionResponse, UploadResponse},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: &str, session_id: Option<&str>) -> ApiError {
    let mut body = json!({ "error": message });
    if let Some(id) = session_id {
        body["session_id"] = json!(id);
    }
    (status, Json(body))
}

fn bad_request(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, message, None)
}

fn flow_error(err: FlowError, session_id: &str) -> ApiError {
    match err {
        FlowError::SessionNotFound(_) => {
            api_error(StatusCode::NOT_FOUND, "Session not found", Some(session_id))
        }
        FlowError::Storage(_) => {
            error!(session_id = %session_id, error = %err, "Session storage failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Session storage unavailable",
                Some(session_id),
            )
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runner: SessionRunner,
}

/// Load the classifier once and wire the shared services.
///
/// A classifier that fails to load does not stop the service; uploads then
/// report the load error and chat keeps working.
pub fn create_app_state(config: &ServiceConfig) -> anyhow::Result<AppState> {
    let classifier = ImageClassifier::load_shared(&config.model_path);
    match &classifier {
        Ok(_) => info!(model = %config.model_path.display(), "Classifier ready"),
        Err(e) => error!(
            model = %config.model_path.display(),
            error = %e,
            "Classifier failed to load, running in chat-only mode"
        ),
    }

    let responder = ChatCompletionsClient::new(config.completion.clone())?;
    let runner = SessionRunner::new(
        classifier,
        Arc::new(responder),
        Arc::new(InMemorySessionStorage::new()),
    );

    Ok(AppState { runner })
}

pub fn create_app(app_state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/sessions", post(start_session))
        .route("/sessions/{session_id}", get(get_session).delete(end_session))
        .route("/sessions/{session_id}/image", post(upload_image))
        .route("/sessions/{session_id}/messages", post(send_message))
        .route("/sessions/{session_id}/report", post(request_report))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id_middleware))
        .with_state(app_state)
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "DermNet AI Assistant",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Skin-lesion photo classification with a context-aware dermatology chat",
        "endpoints": {
            "POST /sessions": "Start a new chat session",
            "GET /sessions/{session_id}": "Get messages and current analysis",
            "DELETE /sessions/{session_id}": "End a session",
            "POST /sessions/{session_id}/image": "Upload a JPG/PNG photo (raw body) for analysis",
            "POST /sessions/{session_id}/messages": "Ask a question",
            "POST /sessions/{session_id}/report": "Detailed report on the current analysis",
            "GET /health": "Health check"
        },
        "disclaimer": DISCLAIMER
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let classifier = match state.runner.classifier() {
        Ok(_) => json!({ "loaded": true }),
        Err(e) => json!({ "loaded": false, "error": e.to_string() }),
    };

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "classifier": classifier
    }))
}

async fn start_session(State(state): State<AppState>) -> ApiResult<SessionResponse> {
    let session = state.runner.start_session().await.map_err(|e| {
        error!(error = %e, "Failed to create session");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session", None)
    })?;

    Ok(Json(SessionResponse::from(&session)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = state
        .runner
        .session(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?;

    Ok(Json(SessionResponse::from(&session)))
}

async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    state
        .runner
        .end_session(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?;

    Ok(Json(json!({
        "session_id": session_id,
        "status": "deleted"
    })))
}

async fn upload_image(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    if body.is_empty() {
        return Err(bad_request("Image body cannot be empty"));
    }

    info!(
        session_id = %session_id,
        bytes = body.len(),
        "Received image upload"
    );

    let outcome = state
        .runner
        .upload(&session_id, body.to_vec())
        .await
        .map_err(|e| flow_error(e, &session_id))?;

    let session = state
        .runner
        .session(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?;

    let status = match &outcome {
        UploadOutcome::Analyzed { .. } | UploadOutcome::AlreadyAnalyzed => StatusCode::OK,
        UploadOutcome::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        UploadOutcome::Failed(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    if status != StatusCode::OK {
        warn!(session_id = %session_id, outcome = outcome.kind(), "Upload not analyzed");
    }

    Ok((
        status,
        Json(UploadResponse::new(&session, &outcome)),
    ))
}

async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ReplyResponse> {
    if request.content.trim().is_empty() {
        return Err(bad_request("Message content cannot be empty"));
    }

    info!(
        session_id = %session_id,
        content_length = request.content.len(),
        "Processing chat message"
    );

    let reply = state
        .runner
        .chat(&session_id, &request.content)
        .await
        .map_err(|e| flow_error(e, &session_id))?;

    Ok(Json(ReplyResponse { session_id, reply }))
}

async fn request_report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<ReplyResponse> {
    let report = state
        .runner
        .report(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?;

    match report {
        Some(reply) => Ok(Json(ReplyResponse { session_id, reply })),
        None => Err(api_error(
            StatusCode::CONFLICT,
            "No analyzed image in this session",
            Some(&session_id),
        )),
    }
}
