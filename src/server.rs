//! HTTP and WebSocket surface
//!
//! REST:
//! - `GET /health`
//! - `GET /api/models?q=`
//! - `POST /api/chat`
//! - `POST /api/feedback`
//! - `GET /api/stats`
//! - `GET /api/insights?q=&limit=`
//! - `DELETE /api/sessions/{id}`
//!
//! WebSocket (`GET /ws`), client -> server:
//! ```json
//! {"message": "Hello", "session_id": "optional", "mode": "think_tank"}
//! ```
//!
//! Server -> client:
//! ```json
//! {"type": "typing"}
//! {"type": "response", "response": "...", "model_info": {...}, "time": 0.8, "session_id": "..."}
//! {"type": "error", "error": "..."}
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chat::{ChatService, RequestError, StatsReport};
use crate::config::MinervaConfig;
use crate::types::{ChatRequest, ChatResponse, FeedbackAck, FeedbackRequest};

const DEFAULT_INSIGHT_LIMIT: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub started: Instant,
}

impl AppState {
    pub fn new(chat: ChatService) -> Self {
        Self { chat: Arc::new(chat), started: Instant::now() }
    }
}

/// Error body: `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<RequestError>() {
            Some(RequestError::UnknownInsight(_)) => ApiError::NotFound(err.to_string()),
            Some(_) => ApiError::BadRequest(err.to_string()),
            None => ApiError::Internal(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    providers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsQuery {
    #[serde(default)]
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InsightsQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/models", get(list_models))
        .route("/api/chat", post(post_chat))
        .route("/api/feedback", post(post_feedback))
        .route("/api/stats", get(get_stats))
        .route("/api/insights", get(get_insights))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(config: &MinervaConfig) -> Result<()> {
    let chat = ChatService::open(config)?;
    let app = router(AppState::new(chat));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Minerva listening on http://{}", addr);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
        providers: state.chat.available_providers().iter().map(|k| k.to_string()).collect(),
    })
}

async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<ModelsQuery>,
) -> Result<Json<Value>, ApiError> {
    let models = state.chat.models(params.q.as_deref())?;
    Ok(Json(json!({ "models": models })))
}

async fn post_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = body?;
    Ok(Json(state.chat.handle(request).await?))
}

async fn post_feedback(
    State(state): State<AppState>,
    body: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackAck>, ApiError> {
    let Json(request) = body?;
    Ok(Json(state.chat.feedback(request).await?))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsReport>, ApiError> {
    Ok(Json(state.chat.stats().await?))
}

async fn get_insights(
    State(state): State<AppState>,
    Query(params): Query<InsightsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_INSIGHT_LIMIT);
    let insights = state.chat.insights(params.q.as_deref(), limit)?;
    Ok(Json(json!({ "insights": insights })))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.chat.clear_session(&id).await?;
    Ok(Json(json!({ "session_id": id, "removed": removed })))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!("WebSocket connected");

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame = match serde_json::from_str::<ChatRequest>(&text) {
            Ok(request) => {
                if send_frame(&mut sender, typing_frame()).await.is_err() {
                    break;
                }
                answer_frame(&state, request).await
            }
            Err(e) => {
                tracing::warn!("Invalid WebSocket message: {e}");
                error_frame(format!("Invalid request: {e}"))
            }
        };

        if send_frame(&mut sender, frame).await.is_err() {
            tracing::debug!("WebSocket closed while sending");
            break;
        }
    }
    tracing::debug!("WebSocket disconnected");
}

async fn answer_frame(state: &AppState, request: ChatRequest) -> Value {
    match state.chat.handle(request).await {
        Ok(response) => match serde_json::to_value(response) {
            Ok(Value::Object(mut body)) => {
                body.insert("type".to_string(), json!(message_types::RESPONSE));
                Value::Object(body)
            }
            Ok(_) => error_frame("Unexpected response shape".to_string()),
            Err(e) => error_frame(e.to_string()),
        },
        Err(e) => {
            tracing::error!(error = %e, "WebSocket chat failed");
            error_frame(e.to_string())
        }
    }
}

async fn send_frame<S>(sender: &mut S, frame: Value) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    sender.send(Message::Text(frame.to_string().into())).await
}

fn typing_frame() -> Value {
    json!({ "type": message_types::TYPING })
}

fn error_frame(error: String) -> Value {
    json!({ "type": message_types::ERROR, "error": error })
}

/// Server -> client frame types
pub mod message_types {
    pub const TYPING: &str = "typing";
    pub const RESPONSE: &str = "response";
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderRegistry, SimulatedProvider};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tempfile::tempdir;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    fn setup_app() -> (Router, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = MinervaConfig { data_dir: Some(dir.path().to_path_buf()), ..Default::default() };
        let mut registry = ProviderRegistry::empty();
        registry.register(Arc::new(SimulatedProvider));
        let chat = ChatService::with_registry(&config, registry).unwrap();
        (router(AppState::new(chat)), dir)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = setup_app();
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["providers"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_chat_simulated() {
        let (app, _dir) = setup_app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({ "message": "hello", "session_id": "s1" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["model_info"]["simulated"], true);
        assert!(body["response"].as_str().unwrap().contains("Simulated"));
        assert!(body["time"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_and_unknown_mode() {
        let (app, _dir) = setup_app();
        let (status, body) = call(&app, Method::POST, "/api/chat", Some(json!({ "message": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({ "message": "hi", "mode": "telepathy" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_feedback_unknown_insight_is_404() {
        let (app, _dir) = setup_app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/feedback",
            Some(json!({
                "insight_id": "missing",
                "query": "q",
                "response": "r",
                "scores": { "accuracy": 7 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_feedback_recorded() {
        let (app, _dir) = setup_app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/feedback",
            Some(json!({
                "model": "gpt-4o",
                "query": "q",
                "response": "r",
                "scores": { "accuracy": 4, "clarity": 8 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["overall"], 6.0);

        let (_, stats) = call(&app, Method::GET, "/api/stats", None).await;
        assert_eq!(stats["rankings"], 1);
        assert_eq!(stats["criterion_averages"]["clarity"], 8.0);
    }

    #[tokio::test]
    async fn test_models_with_query() {
        let (app, _dir) = setup_app();
        let (status, body) = call(&app, Method::GET, "/api/models?q=Write%20a%20poem%20about%20the%20sea", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models"][0]["model"], "claude-3-opus");
        assert!(body["models"][0]["score"].as_f64().is_some());
    }

    #[tokio::test]
    async fn test_sessions_and_insights() {
        let (app, _dir) = setup_app();
        call(&app, Method::POST, "/api/chat", Some(json!({ "message": "hello", "session_id": "abc" }))).await;

        let (status, body) = call(&app, Method::DELETE, "/api/sessions/abc", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 2);

        let (status, body) = call(&app, Method::GET, "/api/insights?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["insights"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let err: ApiError = anyhow::Error::from(RequestError::UnknownInsight("x".into())).into();
        assert!(matches!(err, ApiError::NotFound(_)));
        let err: ApiError = anyhow::Error::from(RequestError::EmptyMessage).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
        let err: ApiError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    /// Next text frame from a client socket, parsed as JSON
    async fn next_frame<S>(stream: &mut S) -> Value
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(std::time::Duration::from_secs(10), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_frames_over_tcp() {
        let (app, _dir) = setup_app();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let (mut stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();

        stream.send(WsMessage::Text("{bad".to_string().into())).await.unwrap();
        let frame = next_frame(&mut stream).await;
        assert_eq!(frame["type"], message_types::ERROR);
        assert!(frame["error"].as_str().unwrap().contains("Invalid request"));

        // same socket keeps working after a bad frame
        let request = json!({ "message": "hello", "session_id": "ws1" }).to_string();
        stream.send(WsMessage::Text(request.into())).await.unwrap();
        assert_eq!(next_frame(&mut stream).await["type"], message_types::TYPING);
        let answer = next_frame(&mut stream).await;
        assert_eq!(answer["type"], message_types::RESPONSE);
        assert_eq!(answer["session_id"], "ws1");
        assert_eq!(answer["model_info"]["simulated"], true);
        let _ = stream.close(None).await;

        let base = crate::diagnostics::server_base(&format!("http://{addr}"), None).unwrap();
        let url = crate::diagnostics::ws_url(&base).unwrap();
        let trip = crate::diagnostics::ws_roundtrip(&url, "hello").await.unwrap();
        assert!(trip.saw_typing);
        assert_eq!(trip.model.as_deref(), Some(crate::providers::SIMULATED_MODEL));
        assert!(trip.response.contains("Simulated"));
    }

    #[test]
    fn test_frames() {
        assert_eq!(typing_frame()["type"], "typing");
        let err = error_frame("nope".into());
        assert_eq!(err["type"], "error");
        assert_eq!(err["error"], "nope");
    }
}
