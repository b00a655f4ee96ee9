//! Text turns, memory history and chat session endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::memory::MemoryRecord;
use crate::sessions::{ChatMessage, ChatSession};

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/history", get(history))
        .route("/chats", get(list_chats))
        .route("/history/{chat_id}", get(chat_history))
        .route("/chat/new", post(new_chat))
        .route("/chat/{chat_id}/rename", put(rename_chat))
        .route("/chat/{chat_id}/delete", delete(delete_chat))
        .route("/chat/{chat_id}/pin", put(pin_chat))
        .with_state(state)
}

/// Text prompt request
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Text prompt response
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub response: String,
    pub chat_id: String,
}

/// Answer a typed prompt
async fn generate(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let chat_id = request.chat_id.as_deref().filter(|id| !id.is_empty());
    let answer = state.advisor.answer_text(&request.prompt, chat_id).await?;

    Ok(Json(GenerateResponse {
        response: answer.response,
        chat_id: answer.chat_id,
    }))
}

/// One remembered exchange
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub input: String,
    pub response: String,
    pub timestamp: f64,
    pub audio_url: Option<String>,
}

impl From<MemoryRecord> for HistoryEntry {
    fn from(record: MemoryRecord) -> Self {
        Self {
            input: record.metadata.input,
            response: record.metadata.response,
            timestamp: record.metadata.timestamp,
            audio_url: record.metadata.audio_url,
        }
    }
}

/// Every stored exchange, newest first
async fn history(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let records = state.advisor.history()?;
    Ok(Json(records.into_iter().map(HistoryEntry::from).collect()))
}

async fn list_chats(State(state): State<Arc<ApiState>>) -> Json<Vec<ChatSession>> {
    Json(state.advisor.chats().list())
}

/// Messages of one session
#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    pub messages: Vec<ChatMessage>,
}

/// Unknown sessions have no messages
async fn chat_history(
    State(state): State<Arc<ApiState>>,
    Path(chat_id): Path<String>,
) -> Json<ChatHistoryResponse> {
    Json(ChatHistoryResponse {
        messages: state.advisor.chats().messages(&chat_id),
    })
}

/// Optional title for a new session
#[derive(Debug, Default, Deserialize)]
pub struct NewChatRequest {
    #[serde(default)]
    pub title: Option<String>,
}

async fn new_chat(
    State(state): State<Arc<ApiState>>,
    request: Option<Json<NewChatRequest>>,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let session = state.advisor.chats().create(request.title.as_deref())?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// New session title
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub title: String,
}

async fn rename_chat(
    State(state): State<Arc<ApiState>>,
    Path(chat_id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<ChatSession>, ApiError> {
    let session = state.advisor.chats().rename(&chat_id, &request.title)?;
    Ok(Json(session))
}

/// Outcome of a delete
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

async fn delete_chat(
    State(state): State<Arc<ApiState>>,
    Path(chat_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.advisor.chats().delete(&chat_id)?;
    Ok(Json(DeleteResponse { success: true }))
}

/// Pin state after a toggle
#[derive(Debug, Serialize)]
pub struct PinResponse {
    pub pinned: bool,
}

async fn pin_chat(
    State(state): State<Arc<ApiState>>,
    Path(chat_id): Path<String>,
) -> Result<Json<PinResponse>, ApiError> {
    let pinned = state.advisor.chats().toggle_pin(&chat_id)?;
    Ok(Json(PinResponse { pinned }))
}
