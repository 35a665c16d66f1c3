//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::{ApiError, ErrorBody, MAX_IMAGE_BYTES};
use crate::web::state::AppState;
use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, Multipart, Path, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    response::Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;
use visualize_core::domain::{Component, Difficulty, NewSession, SessionUpdate, TapPoint, Turn};

/// MIME types accepted by `/api/analyze`.
pub const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Request body limit: the image plus room for multipart boundaries and text fields.
pub const MAX_UPLOAD_BYTES: usize = MAX_IMAGE_BYTES + 1024 * 1024;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        analyze_handler,
        ask_handler,
        what_if_handler,
        get_session_handler,
        delete_session_handler,
    ),
    components(
        schemas(
            AnalyzeResponse, ComponentDto, TapPointDto, AskRequest, WhatIfRequest, AnswerResponse,
            SessionInfoResponse, ImageInfo, DeleteSessionResponse, HealthResponse, ErrorBody
        )
    ),
    tags(
        (name = "Visualize.AI API", description = "Image analysis and conversations anchored to an uploaded image.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct TapPointDto {
    /// Percentage of the image width.
    pub x: f64,
    /// Percentage of the image height.
    pub y: f64,
}

impl From<TapPointDto> for TapPoint {
    fn from(dto: TapPointDto) -> Self {
        TapPoint { x: dto.x, y: dto.y }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComponentDto {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

impl From<Component> for ComponentDto {
    fn from(c: Component) -> Self {
        Self {
            name: c.name,
            x: c.x,
            y: c.y,
        }
    }
}

/// The response payload sent after an image has been analyzed.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub session_id: String,
    pub analysis: String,
    pub components: Vec<ComponentDto>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub session_id: Option<String>,
    pub question: Option<String>,
    pub tap_point: Option<TapPointDto>,
    /// Level name (`Novice`..`Expert`) or `1`..`5`. Defaults to the session's level.
    pub difficulty: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfRequest {
    pub session_id: Option<String>,
    pub scenario: Option<String>,
    pub difficulty: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AnswerResponse {
    pub answer: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub mime_type: String,
    pub has_image: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_info: Option<ImageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_length: Option<usize>,
}

#[derive(Serialize, ToSchema)]
pub struct DeleteSessionResponse {
    pub success: bool,
    pub existed: bool,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// `{activeSessions, ttlMinutes, backend}`
    #[schema(value_type = Object)]
    pub sessions: visualize_core::SessionStats,
}

//=========================================================================================
// Request Helpers
//=========================================================================================

fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::Validation(message.to_string()))
}

fn parse_difficulty(raw: Option<&str>) -> Result<Option<Difficulty>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e: visualize_core::domain::ParseDifficultyError| ApiError::Validation(e.to_string())),
        None => Ok(None),
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::Validation(format!("Failed to read multipart data: {}", e.body_text()))
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe with session store statistics.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        sessions: app_state.sessions.stats().await,
    })
}

/// Upload an image, analyze it and open a session for it.
///
/// Accepts a multipart/form-data request with an `image` file part and an
/// optional `difficulty` text part.
#[utoipa::path(
    post,
    path = "/api/analyze",
    request_body(content_type = "multipart/form-data", description = "The image and the explanation level."),
    responses(
        (status = 200, description = "Image analyzed and session created", body = AnalyzeResponse),
        (status = 400, description = "No file, bad file type or bad difficulty", body = ErrorBody),
        (status = 413, description = "Image larger than 10MB", body = ErrorBody),
        (status = 500, description = "AI service not configured", body = ErrorBody),
        (status = 503, description = "AI service unavailable", body = ErrorBody)
    )
)]
pub async fn analyze_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let declared_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > MAX_UPLOAD_BYTES) {
        return Err(ApiError::PayloadTooLarge);
    }

    let mut upload = None;
    let mut difficulty = Difficulty::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let mime_type = field.content_type().unwrap_or_default().to_ascii_lowercase();
                if !ALLOWED_IMAGE_TYPES.contains(&mime_type.as_str()) {
                    return Err(ApiError::InvalidFileType);
                }
                let data = field.bytes().await.map_err(multipart_error)?;
                if data.len() > MAX_IMAGE_BYTES {
                    return Err(ApiError::PayloadTooLarge);
                }
                upload = Some((mime_type, data));
            }
            "difficulty" => {
                let text = field.text().await.map_err(multipart_error)?;
                if let Some(level) = parse_difficulty(Some(&text))? {
                    difficulty = level;
                }
            }
            other => debug!(field = other, "Ignoring unexpected multipart field"),
        }
    }

    let (image_type, bytes) =
        upload.ok_or_else(|| ApiError::Validation("No image file provided".to_string()))?;
    let image_data = BASE64.encode(&bytes);

    let vision = app_state.vision()?;
    let new_session = NewSession {
        difficulty,
        ..NewSession::new(image_data, image_type)
    };
    let result = vision
        .analyze_image(
            visualize_core::ImageRef {
                data: &new_session.image_data,
                mime_type: &new_session.image_type,
            },
            difficulty,
        )
        .await
        .map_err(ApiError::from_vision)?;

    let session_id = Uuid::new_v4().to_string();
    app_state
        .sessions
        .create(
            &session_id,
            NewSession {
                image_description: Some(result.analysis.clone()),
                components: result.components.clone(),
                conversation_history: vec![Turn::assistant(result.analysis.clone())],
                ..new_session
            },
        )
        .await;
    info!(session_id = %session_id, components = result.components.len(), %difficulty, "Image analyzed");

    Ok(Json(AnalyzeResponse {
        session_id,
        analysis: result.analysis,
        components: result.components.into_iter().map(ComponentDto::from).collect(),
    }))
}

/// Ask a follow-up question about the analyzed image.
#[utoipa::path(
    post,
    path = "/api/ask",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer generated", body = AnswerResponse),
        (status = 400, description = "Missing session ID or question", body = ErrorBody),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 503, description = "AI service or session store unavailable", body = ErrorBody)
    )
)]
pub async fn ask_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let request = json_body(payload)?;
    let session_id = required(request.session_id, "Session ID is required")?;
    let question = required(request.question, "Question is required")?;
    let requested = parse_difficulty(request.difficulty.as_deref())?;
    let tap_point = request.tap_point.map(TapPoint::from);

    let mut session = app_state
        .sessions
        .get(&session_id)
        .await
        .map_err(ApiError::from_session)?;
    let difficulty = requested.unwrap_or(session.difficulty);

    let answer = app_state
        .vision()?
        .ask_follow_up(
            session.image(),
            &question,
            tap_point,
            difficulty,
            &session.conversation_history,
        )
        .await
        .map_err(ApiError::from_vision)?;

    session.push_question(&question, tap_point);
    session.push_answer(&answer, false);
    let mut changes = SessionUpdate::history(session.conversation_history);
    if difficulty != session.difficulty {
        changes.difficulty = Some(difficulty);
    }
    app_state.sessions.update(&session_id, changes).await;

    Ok(Json(AnswerResponse { answer }))
}

/// Explore a hypothetical scenario about the analyzed image.
#[utoipa::path(
    post,
    path = "/api/what-if",
    request_body = WhatIfRequest,
    responses(
        (status = 200, description = "Answer generated", body = AnswerResponse),
        (status = 400, description = "Missing session ID or scenario", body = ErrorBody),
        (status = 404, description = "Session not found or expired", body = ErrorBody),
        (status = 503, description = "AI service or session store unavailable", body = ErrorBody)
    )
)]
pub async fn what_if_handler(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<WhatIfRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let request = json_body(payload)?;
    let session_id = required(request.session_id, "Session ID is required")?;
    let scenario = required(request.scenario, "Scenario is required")?;
    let requested = parse_difficulty(request.difficulty.as_deref())?;

    let mut session = app_state
        .sessions
        .get(&session_id)
        .await
        .map_err(ApiError::from_session)?;
    let difficulty = requested.unwrap_or(session.difficulty);

    let answer = app_state
        .vision()?
        .ask_what_if(session.image(), &scenario, difficulty, &session.conversation_history)
        .await
        .map_err(ApiError::from_vision)?;

    session.push_what_if(&scenario);
    session.push_answer(&answer, true);
    let mut changes = SessionUpdate::history(session.conversation_history);
    if difficulty != session.difficulty {
        changes.difficulty = Some(difficulty);
    }
    app_state.sessions.update(&session_id, changes).await;

    Ok(Json(AnswerResponse { answer }))
}

/// Report whether a session is live. Reading it slides its expiry.
#[utoipa::path(
    get,
    path = "/api/session/{session_id}",
    params(("session_id" = String, Path, description = "The session identifier.")),
    responses(
        (status = 200, description = "Session status", body = SessionInfoResponse),
        (status = 503, description = "Session store unavailable", body = ErrorBody)
    )
)]
pub async fn get_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfoResponse>, ApiError> {
    match app_state.sessions.get(&session_id).await {
        Ok(session) => Ok(Json(SessionInfoResponse {
            exists: true,
            image_info: Some(ImageInfo {
                mime_type: session.image_type,
                has_image: !session.image_data.is_empty(),
            }),
            conversation_length: Some(session.conversation_history.len()),
        })),
        Err(visualize_core::PortError::NotFound(_)) => Ok(Json(SessionInfoResponse {
            exists: false,
            image_info: None,
            conversation_length: None,
        })),
        Err(e) => Err(ApiError::from_session(e)),
    }
}

/// Delete a session.
#[utoipa::path(
    delete,
    path = "/api/session/{session_id}",
    params(("session_id" = String, Path, description = "The session identifier.")),
    responses((status = 200, description = "Deletion attempted", body = DeleteSessionResponse))
)]
pub async fn delete_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<DeleteSessionResponse> {
    let existed = app_state.sessions.delete(&session_id).await;
    info!(session_id = %session_id, existed, "Session deleted");
    Json(DeleteSessionResponse {
        success: true,
        existed,
    })
}
