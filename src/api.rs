//! HTTP front end: decodes frames, routes each request to the caller's
//! session and maps session errors to client-facing responses.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::TrackError;
use crate::frame::{Frame, FrameError};
use crate::model::TrackedPoint;
use crate::registry::{RegistryError, SessionRegistry};

/// Header naming the caller's session
pub const SESSION_HEADER: &str = "x-session-id";
pub const DEFAULT_SESSION: &str = "default";

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
}

impl ApiState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Base64 encoded image
    pub frame: String,
    /// `[x, y]` pixel coordinates in `frame`
    pub keypoints: Vec<[f64; 2]>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub points: usize,
    pub window_capacity: usize,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub frame: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TrackResponse {
    pub keypoints: Vec<[f64; 2]>,
    pub visibility: Vec<bool>,
}

impl From<Vec<TrackedPoint>> for TrackResponse {
    fn from(points: Vec<TrackedPoint>) -> Self {
        Self {
            keypoints: points.iter().map(|p| [p.x, p.y]).collect(),
            visibility: points.iter().map(|p| p.visible).collect(),
        }
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/track", post(track))
        .route("/session", delete(drop_session))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn register(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let id = session_id(&headers)?;
    let Json(request) = payload?;
    let points = request.keypoints.len();
    let registry = state.registry.clone();
    let session_id = id.clone();
    let window_capacity = tokio::task::spawn_blocking(move || {
        let frame = Frame::decode_base64(&request.frame)?;
        let session = registry.register(&session_id, frame, &request.keypoints)?;
        let capacity = session.lock().capacity();
        Ok::<_, ApiError>(capacity)
    })
    .await??;

    info!(session = %id, points, "registered keypoints");
    Ok(Json(RegisterResponse {
        message: "Tracker registered successfully with initial frame and keypoints.".to_string(),
        points,
        window_capacity,
    }))
}

async fn track(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<TrackRequest>, JsonRejection>,
) -> Result<Json<TrackResponse>, ApiError> {
    let id = session_id(&headers)?;
    let Json(request) = payload?;
    let session = state
        .registry
        .get(&id)
        .ok_or(ApiError::Track(TrackError::NotInitialized))?;

    let points = tokio::task::spawn_blocking(move || {
        let frame = Frame::decode_base64(&request.frame)?;
        Ok::<_, ApiError>(session.lock().step(frame)?)
    })
    .await??;

    debug!(session = %id, points = points.len(), "tracked frame");
    Ok(Json(points.into()))
}

async fn drop_session(State(state): State<ApiState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let id = session_id(&headers)?;
    if state.registry.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.registry.len(),
    }))
}

fn session_id(headers: &HeaderMap) -> Result<String, ApiError> {
    match headers.get(SESSION_HEADER) {
        None => Ok(DEFAULT_SESSION.to_string()),
        Some(value) => {
            let id = value
                .to_str()
                .map_err(|_| ApiError::InvalidInput(format!("{SESSION_HEADER} header is not valid UTF-8")))?
                .trim();
            if id.is_empty() {
                return Err(ApiError::InvalidInput(format!("{SESSION_HEADER} header is empty")));
            }
            Ok(id.to_string())
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// Malformed request body, frame or session id
    InvalidInput(String),
    /// Failure reported by the tracking session
    Track(TrackError),
    SessionLimit(String),
    SessionNotFound(String),
    Internal(String),
}

impl From<TrackError> for ApiError {
    fn from(e: TrackError) -> Self {
        match e {
            TrackError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            other => ApiError::Track(other),
        }
    }
}

impl From<FrameError> for ApiError {
    fn from(e: FrameError) -> Self {
        ApiError::InvalidInput(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::InvalidInput(e.body_text())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Full(_) => ApiError::SessionLimit(e.to_string()),
            RegistryError::Session(e) => e.into(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("tracking task failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, retryable) = match self {
            Self::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, false),
            Self::Track(e) => {
                let (status, code) = match e {
                    TrackError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                    TrackError::NotInitialized => (StatusCode::CONFLICT, "NOT_INITIALIZED"),
                    TrackError::InsufficientContext { .. } => {
                        (StatusCode::CONFLICT, "INSUFFICIENT_CONTEXT")
                    }
                    TrackError::ModelInvocation(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "MODEL_INVOCATION_FAILED")
                    }
                };
                (status, code, e.to_string(), e.is_retryable())
            }
            Self::SessionLimit(msg) => (StatusCode::SERVICE_UNAVAILABLE, "SESSION_LIMIT", msg, true),
            Self::SessionNotFound(id) => (
                StatusCode::NOT_FOUND,
                "SESSION_NOT_FOUND",
                format!("no session named '{id}'"),
                false,
            ),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg, false),
        };

        if status.is_server_error() {
            warn!(code, %message, "request failed");
        } else {
            debug!(code, %message, "request rejected");
        }

        let body = json!({
            "error": {
                "code": code,
                "message": message,
                "retryable": retryable,
            }
        });
        (status, Json(body)).into_response()
    }
}
