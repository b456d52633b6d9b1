use crate::error::AssistantError;
use axum::{
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{Response, StatusCode, header},
    response::{IntoResponse, Json},
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AppState, MESSAGE_LIST_LIMIT, SESSION_LIST_LIMIT};

/// Error body: `{"error": {"kind": "...", "message": "..."}}`.
pub(super) struct ApiError(AssistantError);

impl From<AssistantError> for ApiError {
    fn from(error: AssistantError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        Self(AssistantError::InvalidRequest(message.into()))
    }

    fn status(&self) -> StatusCode {
        match self.0 {
            AssistantError::Provider(_) | AssistantError::ImageGeneration(_) => {
                StatusCode::BAD_GATEWAY
            }
            AssistantError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AssistantError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({"error": {"kind": self.0.kind(), "message": self.0.to_string()}})),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn default_session_title() -> String {
    "New Chat".into()
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default = "default_session_title")]
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageBody {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamBody {
    pub message: String,
    #[serde(default)]
    pub image_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageGenerateBody {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    pub prompt: Option<String>,
}

#[derive(Serialize)]
struct StatusBody<T: Serialize> {
    status: &'static str,
    #[serde(flatten)]
    service: T,
}

/// GET /health
pub(super) async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// GET /api/
pub(super) async fn handle_root() -> impl IntoResponse {
    Json(json!({
        "message": "Keyloom API is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/status
pub(super) async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let service = state.assistant.status().await;
    Json(StatusBody {
        status: "online",
        service,
    })
}

/// POST /api/chat/sessions
pub(super) async fn handle_create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let session = state.assistant.create_session(&body.title).await?;
    Ok(Json(session))
}

/// GET /api/chat/sessions
pub(super) async fn handle_list_sessions(
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let sessions = state.assistant.list_sessions(SESSION_LIST_LIMIT).await?;
    Ok(Json(sessions))
}

/// GET /api/chat/sessions/{session_id}/messages
pub(super) async fn handle_list_messages(
    State(state): State<AppState>,
    session_id: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(session_id) = session_id?;
    let messages = state
        .assistant
        .messages(&session_id, MESSAGE_LIST_LIMIT)
        .await?;
    Ok(Json(messages))
}

/// DELETE /api/chat/sessions/{session_id}
pub(super) async fn handle_delete_session(
    State(state): State<AppState>,
    session_id: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(session_id) = session_id?;
    let deleted = state.assistant.delete_session(&session_id).await?;
    Ok(Json(json!({
        "message": "Session deleted successfully",
        "deleted": deleted,
    })))
}

/// POST /api/chat/message
pub(super) async fn handle_chat_message(
    State(state): State<AppState>,
    body: Result<Json<ChatMessageBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let reply = state
        .assistant
        .send_message(
            &body.message,
            body.session_id.as_deref(),
            body.image_base64.as_deref(),
        )
        .await?;
    Ok(Json(reply))
}

/// POST /api/chat/stream/{session_id}: server-sent events, one JSON chunk per event
pub(super) async fn handle_chat_stream(
    State(state): State<AppState>,
    session_id: Result<Path<String>, PathRejection>,
    body: Result<Json<StreamBody>, JsonRejection>,
) -> ApiResult<Response<Body>> {
    let Path(session_id) = session_id?;
    let Json(body) = body?;
    let mut chunks = state
        .assistant
        .stream_message(&session_id, &body.message, body.image_base64.as_deref())
        .await?;

    let stream = async_stream::stream! {
        while let Some(chunk) = chunks.next().await {
            if let Ok(json) = serde_json::to_string(&chunk) {
                yield Ok::<_, std::convert::Infallible>(format!("data: {json}\n\n"));
            }
        }
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    Ok(response)
}

/// POST /api/image/generate
pub(super) async fn handle_generate_image(
    State(state): State<AppState>,
    body: Result<Json<ImageGenerateBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let reply = state
        .assistant
        .generate_image(&body.prompt, body.session_id.as_deref())
        .await?;
    Ok(Json(reply))
}

/// POST /api/image/analyze: multipart `file`, optional `prompt` field or query
pub(super) async fn handle_analyze_image(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut file: Option<Vec<u8>> = None;
    let mut prompt = query.prompt;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid(e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::invalid(e.body_text()))?;
                file = Some(bytes.to_vec());
            }
            Some("prompt") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::invalid(e.body_text()))?;
                if !text.trim().is_empty() {
                    prompt = Some(text);
                }
            }
            _ => {}
        }
    }

    let Some(file) = file else {
        return Err(ApiError::invalid("multipart field `file` is required"));
    };
    let reply = state
        .assistant
        .analyze_image(file, prompt.as_deref())
        .await?;
    Ok(Json(reply))
}
