//! Route-level tests that drive the router in-process with a scripted vision service.

use api_lib::web::{build_router, AppState};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_LENGTH, header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use visualize_core::{
    Component, Difficulty, ExpiryPolicy, ImageAnalysis, ImageRef, PortError, PortResult,
    SessionBackend, SessionManager, SessionRecord, SessionUpdate, TapPoint, Turn, VisionService,
};

const BOUNDARY: &str = "visualize-test-boundary";

#[derive(Default)]
struct ScriptedVision {
    fail: bool,
    /// Every history slice the service was handed, in call order.
    histories: Mutex<Vec<Vec<Turn>>>,
    difficulties: Mutex<Vec<Difficulty>>,
}

impl ScriptedVision {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn record(&self, history: &[Turn], difficulty: Difficulty) -> PortResult<()> {
        if self.fail {
            return Err(PortError::Unavailable("quota exceeded".to_string()));
        }
        self.histories.lock().unwrap().push(history.to_vec());
        self.difficulties.lock().unwrap().push(difficulty);
        Ok(())
    }
}

#[async_trait]
impl VisionService for ScriptedVision {
    async fn analyze_image(&self, image: ImageRef<'_>, difficulty: Difficulty) -> PortResult<ImageAnalysis> {
        self.record(&[], difficulty)?;
        Ok(ImageAnalysis {
            analysis: format!("A {} diagram", image.mime_type),
            components: vec![Component {
                name: "Valve".to_string(),
                x: 40.0,
                y: 60.0,
            }],
        })
    }

    async fn ask_follow_up(
        &self,
        _image: ImageRef<'_>,
        question: &str,
        tap_point: Option<TapPoint>,
        difficulty: Difficulty,
        history: &[Turn],
    ) -> PortResult<String> {
        self.record(history, difficulty)?;
        Ok(match tap_point {
            Some(p) => format!("answer to {question} at {},{}", p.x, p.y),
            None => format!("answer to {question}"),
        })
    }

    async fn ask_what_if(
        &self,
        _image: ImageRef<'_>,
        scenario: &str,
        difficulty: Difficulty,
        history: &[Turn],
    ) -> PortResult<String> {
        self.record(history, difficulty)?;
        Ok(format!("then {scenario}"))
    }
}

/// A session store whose every call fails, as when the database is down.
struct UnreachableStore;

#[async_trait]
impl SessionBackend for UnreachableStore {
    async fn upsert(&self, _: &SessionRecord) -> PortResult<()> {
        Err(PortError::Unavailable("connection refused".into()))
    }
    async fn get_live(&self, _: &str, _: DateTime<Utc>) -> PortResult<Option<SessionRecord>> {
        Err(PortError::Unavailable("connection refused".into()))
    }
    async fn update(&self, _: &str, _: &SessionUpdate, _: DateTime<Utc>) -> PortResult<bool> {
        Err(PortError::Unavailable("connection refused".into()))
    }
    async fn delete(&self, _: &str) -> PortResult<bool> {
        Err(PortError::Unavailable("connection refused".into()))
    }
    async fn delete_expired(&self, _: DateTime<Utc>) -> PortResult<usize> {
        Err(PortError::Unavailable("connection refused".into()))
    }
    async fn count_live(&self, _: DateTime<Utc>) -> PortResult<usize> {
        Err(PortError::Unavailable("connection refused".into()))
    }
    async fn delete_all(&self) -> PortResult<usize> {
        Err(PortError::Unavailable("connection refused".into()))
    }
}

fn app_with(sessions: SessionManager, vision: Option<Arc<dyn VisionService>>) -> Router {
    build_router(Arc::new(AppState::new(Arc::new(sessions), vision)))
}

fn app(vision: Arc<ScriptedVision>) -> Router {
    app_with(
        SessionManager::in_memory(ExpiryPolicy::default()),
        Some(vision as Arc<dyn VisionService>),
    )
}

fn multipart_request(image: Option<(&str, &[u8])>, difficulty: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    if let Some(level) = difficulty {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"difficulty\"\r\n\r\n{level}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((mime, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"upload\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/analyze")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .header(CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: Method, uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn analyze(app: &Router) -> String {
    let (status, body) = send(app, multipart_request(Some(("image/png", b"\x89PNG")), None)).await;
    assert_eq!(status, StatusCode::OK, "analyze failed: {body}");
    body["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn analyze_ask_and_what_if_build_one_conversation() {
    let vision = Arc::new(ScriptedVision::default());
    let app = app(vision.clone());

    let (status, body) = send(
        &app,
        multipart_request(Some(("image/png", b"\x89PNG")), Some("Expert")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"], "A image/png diagram");
    assert_eq!(body["components"][0]["name"], "Valve");
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/ask",
            json!({"sessionId": session_id, "question": "What is this?", "tapPoint": {"x": 40.0, "y": 60.0}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "answer to What is this? at 40,60");

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/what-if",
            json!({"sessionId": session_id, "scenario": "the valve closes"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "then the valve closes");

    let (status, body) = send(&app, empty_request(Method::GET, &format!("/api/session/{session_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["imageInfo"]["mimeType"], "image/png");
    assert_eq!(body["imageInfo"]["hasImage"], true);
    assert_eq!(body["conversationLength"], 5);

    let histories = vision.histories.lock().unwrap().clone();
    // The current question is never part of the history handed to the AI.
    assert_eq!(histories[1].len(), 1);
    assert_eq!(histories[1][0].content, "A image/png diagram");
    assert_eq!(histories[2].len(), 3);
    assert_eq!(histories[2][1].content, "What is this?");
    assert_eq!(histories[2][2].content, "answer to What is this? at 40,60");

    // The session keeps the level chosen at upload.
    assert!(vision.difficulties.lock().unwrap().iter().all(|d| *d == Difficulty::Expert));
}

#[tokio::test]
async fn what_if_turns_are_prefixed_and_flagged() {
    let vision = Arc::new(ScriptedVision::default());
    let app = app(vision.clone());
    let session_id = analyze(&app).await;

    send(
        &app,
        json_request(
            Method::POST,
            "/api/what-if",
            json!({"sessionId": session_id, "scenario": "gravity doubled"}),
        ),
    )
    .await;
    send(
        &app,
        json_request(
            Method::POST,
            "/api/ask",
            json!({"sessionId": session_id, "question": "And now?"}),
        ),
    )
    .await;

    let histories = vision.histories.lock().unwrap().clone();
    let last = histories.last().unwrap();
    assert_eq!(last[1].content, "[What-If Mode] gravity doubled");
    assert!(last[1].is_what_if);
    assert!(last[2].is_what_if);
}

#[tokio::test]
async fn ask_with_unknown_session_is_not_found() {
    let app = app(Arc::new(ScriptedVision::default()));

    let (status, body) = send(
        &app,
        json_request(
            Method::POST,
            "/api/ask",
            json!({"sessionId": "never-created", "question": "Hello?"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Session Error");
    assert!(body["message"].as_str().unwrap().contains("Session"));
}

#[tokio::test]
async fn what_if_with_unknown_session_is_not_found() {
    let app = app(Arc::new(ScriptedVision::default()));

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/what-if",
            json!({"sessionId": "never-created", "scenario": "it rains"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_fields_are_rejected() {
    let app = app(Arc::new(ScriptedVision::default()));
    let session_id = analyze(&app).await;

    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/ask", json!({"sessionId": session_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Question is required");

    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/ask", json!({"question": "Why?"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Session ID is required");

    let (status, body) = send(
        &app,
        json_request(Method::POST, "/api/what-if", json!({"sessionId": session_id, "scenario": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Scenario is required");
}

#[tokio::test]
async fn unknown_difficulty_is_rejected() {
    let app = app(Arc::new(ScriptedVision::default()));
    let session_id = analyze(&app).await;

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/ask",
            json!({"sessionId": session_id, "question": "Why?", "difficulty": "wizard"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn requested_difficulty_applies_and_sticks() {
    let vision = Arc::new(ScriptedVision::default());
    let app = app(vision.clone());
    let session_id = analyze(&app).await;

    for payload in [
        json!({"sessionId": session_id, "question": "Why?", "difficulty": "1"}),
        json!({"sessionId": session_id, "question": "How?"}),
    ] {
        let (status, _) = send(&app, json_request(Method::POST, "/api/ask", payload)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let difficulties = vision.difficulties.lock().unwrap().clone();
    assert_eq!(
        difficulties,
        vec![Difficulty::Beginner, Difficulty::Novice, Difficulty::Novice]
    );
}

#[tokio::test]
async fn upload_without_image_is_rejected() {
    let app = app(Arc::new(ScriptedVision::default()));

    let (status, body) = send(&app, multipart_request(None, Some("Beginner"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No image file provided");
}

#[tokio::test]
async fn upload_with_unsupported_type_is_rejected() {
    let app = app(Arc::new(ScriptedVision::default()));

    let (status, body) = send(
        &app,
        multipart_request(Some(("application/pdf", b"%PDF-1.7")), None),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid file type");
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let vision = Arc::new(ScriptedVision::default());
    let app = app(vision.clone());
    let image = vec![0u8; 15 * 1024 * 1024];

    let (status, body) = send(&app, multipart_request(Some(("image/png", &image)), None)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["message"].as_str().unwrap().contains("10MB"));
    assert!(vision.histories.lock().unwrap().is_empty());
}

#[tokio::test]
async fn delete_reports_whether_session_existed() {
    let app = app(Arc::new(ScriptedVision::default()));
    let session_id = analyze(&app).await;
    let uri = format!("/api/session/{session_id}");

    let (status, body) = send(&app, empty_request(Method::DELETE, &uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "existed": true}));

    let (_, body) = send(&app, empty_request(Method::DELETE, &uri)).await;
    assert_eq!(body, json!({"success": true, "existed": false}));

    let (status, body) = send(&app, empty_request(Method::GET, &uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"exists": false}));
}

#[tokio::test]
async fn missing_ai_credentials_are_a_configuration_error() {
    let app = app_with(SessionManager::in_memory(ExpiryPolicy::default()), None);

    let (status, body) = send(&app, multipart_request(Some(("image/jpeg", b"\xff\xd8")), None)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Configuration Error");
}

#[tokio::test]
async fn ai_outage_is_service_unavailable() {
    let app = app(Arc::new(ScriptedVision::failing()));

    let (status, body) = send(&app, multipart_request(Some(("image/webp", b"RIFF")), None)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "AI Service Error");
}

#[tokio::test]
async fn unreachable_store_degrades_to_memory() {
    let sessions = SessionManager::new(Some(Arc::new(UnreachableStore)), ExpiryPolicy::default());
    let vision = Arc::new(ScriptedVision::default());
    let app = app_with(sessions, Some(vision.clone() as Arc<dyn VisionService>));

    let session_id = analyze(&app).await;
    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/ask",
            json!({"sessionId": session_id, "question": "Still there?"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, empty_request(Method::GET, &format!("/api/session/{session_id}"))).await;
    assert_eq!(body["conversationLength"], 3);

    let (status, body) = send(&app, empty_request(Method::GET, "/api/session/elsewhere")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Session Store Unavailable");
}

#[tokio::test]
async fn health_reports_session_stats() {
    let app = app(Arc::new(ScriptedVision::default()));
    analyze(&app).await;

    let (status, body) = send(&app, empty_request(Method::GET, "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["sessions"]["activeSessions"], 1);
    assert_eq!(body["sessions"]["ttlMinutes"], 60.0);
    assert_eq!(body["sessions"]["backend"], "memory");
}
