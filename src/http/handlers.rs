use super::state::AppState;
use crate::error::LiveError;
use crate::session::{ChatTurn, SessionSnapshot};
use crate::tutor::{Subject, SubjectInfo};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub subject: SubjectInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_text: Option<String>,
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct MediaRequest {
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
    /// Name the tutor is told about (defaults to "upload")
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubjectRequest {
    pub subject: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

/// Map a session error onto an HTTP status
fn live_error_response(e: LiveError) -> Response {
    let status = match &e {
        LiveError::InvalidTransition { .. } | LiveError::Cancelled => StatusCode::CONFLICT,
        LiveError::InvalidMedia(_) | LiveError::Decode(_) => StatusCode::BAD_REQUEST,
        LiveError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        LiveError::ConnectionFailed(_)
        | LiveError::ChannelRejected(_)
        | LiveError::ChannelClosed(_) => StatusCode::BAD_GATEWAY,
        LiveError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LiveError::Playback(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    error_response(status, e.to_string())
}

fn state_response(state: &AppState, message: &str) -> Response {
    (
        StatusCode::OK,
        Json(StateResponse {
            status: state.tutor.session().state().to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /session
/// Current connection state, transcripts and volume
pub async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    let tutor = &state.tutor;
    Json(SessionStatusResponse {
        subject: tutor.subject().info(),
        pending_text: tutor.pending_text(),
        snapshot: tutor.session().snapshot(),
    })
}

/// GET /session/turns
/// Finalized turns, oldest first
pub async fn get_turns(State(state): State<AppState>) -> impl IntoResponse {
    let turns: Vec<ChatTurn> = state.tutor.session().snapshot().turns;
    Json(turns)
}

/// POST /session/connect
/// Connect and let the tutor greet the student
pub async fn connect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Connect requested over HTTP");
    match state.tutor.start().await {
        Ok(()) => state_response(&state, "Session connected"),
        Err(e) => live_error_response(e),
    }
}

/// POST /session/disconnect
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Disconnect requested over HTTP");
    state.tutor.stop();
    state_response(&state, "Session disconnected")
}

/// POST /session/text
/// Send typed text, connecting first if needed
pub async fn send_text(
    State(state): State<AppState>,
    Json(req): Json<TextRequest>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Text must not be empty".to_string());
    }

    match state.tutor.send_text(&req.text).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(StateResponse {
                status: state.tutor.session().state().to_string(),
                message: "Text accepted".to_string(),
            }),
        )
            .into_response(),
        Err(e) => live_error_response(e),
    }
}

/// POST /session/media
/// Share an image with the tutor
pub async fn send_media(
    State(state): State<AppState>,
    Json(req): Json<MediaRequest>,
) -> impl IntoResponse {
    let bytes = match STANDARD.decode(req.data.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid base64 data: {}", e))
        }
    };
    let file_name = req.file_name.as_deref().unwrap_or("upload");

    match state.tutor.upload(file_name, &req.mime_type, &bytes).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(StateResponse {
                status: state.tutor.session().state().to_string(),
                message: format!("{} sent", file_name),
            }),
        )
            .into_response(),
        Err(e) => live_error_response(e),
    }
}

/// POST /session/subject
/// Switch teaching mode
pub async fn set_subject(
    State(state): State<AppState>,
    Json(req): Json<SubjectRequest>,
) -> impl IntoResponse {
    match Subject::parse(&req.subject) {
        Some(subject) => {
            state.tutor.switch_subject(subject);
            (StatusCode::OK, Json(subject.info())).into_response()
        }
        None => error_response(
            StatusCode::BAD_REQUEST,
            format!("Unknown subject: {}", req.subject),
        ),
    }
}

/// GET /subjects
pub async fn list_subjects() -> impl IntoResponse {
    let subjects: Vec<SubjectInfo> = Subject::ALL.into_iter().map(Subject::info).collect();
    Json(subjects)
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
