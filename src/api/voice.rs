//! Voice endpoints: recorded speech turns, audio artifacts and live streaming

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::header,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Serialize;

use super::{ApiError, ApiState};
use crate::Error;
use crate::voice::{AUDIO_ROUTE, SpeechTurn, StreamEvent};

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/speech", post(speech))
        .route(&format!("{AUDIO_ROUTE}/{{filename}}"), get(audio))
        .route("/stream", get(stream))
        .route("/stream/stop", post(stop_stream))
        .with_state(state)
}

/// Spoken turn response
#[derive(Debug, Serialize)]
pub struct SpeechResponse {
    #[serde(flatten)]
    pub turn: SpeechTurn,
    pub success: bool,
}

/// Answer an uploaded recording
///
/// Expects a multipart form with an `audio` field in WAV or MP3.
async fn speech(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<Json<SpeechResponse>, ApiError> {
    let pipeline = state
        .speech
        .clone()
        .ok_or_else(|| ApiError::unavailable("speech is not configured"))?;

    let mut audio = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() == Some("audio") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            audio = Some(bytes);
            break;
        }
    }

    let audio = audio
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| ApiError::bad_request("No audio file provided"))?;

    let turn = pipeline.turn(&audio).await?;
    Ok(Json(SpeechResponse {
        turn,
        success: true,
    }))
}

/// Serve a synthesized reply
async fn audio(
    State(state): State<Arc<ApiState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = state.artifacts.read(&filename).await?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response())
}

/// Run the live voice loop for this client as server-sent events
///
/// The loop stops when the client disconnects or `/stream/stop` is called.
async fn stream(
    State(state): State<Arc<ApiState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (Some(voice_loop), Some(open_source)) =
        (state.voice_loop.clone(), state.audio_source.clone())
    else {
        return Err(ApiError::unavailable("voice is disabled"));
    };

    let permit = Arc::clone(&state.stream_slot)
        .try_acquire_owned()
        .map_err(|_| Error::DeviceBusy("a voice stream is already active".to_string()))?;

    let source = tokio::task::spawn_blocking(move || open_source())
        .await
        .map_err(|e| Error::Audio(format!("capture setup task failed: {e}")))??;

    let session = voice_loop.start_exclusive(source, permit);
    *state.active_stream.lock() = Some(session.stop_token());
    tracing::info!("voice stream started");

    let events = session.into_events().map(|event| Ok(sse_event(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Render an event as SSE; line breaks become separate `data:` lines
fn sse_event(event: &StreamEvent) -> Event {
    Event::default().data(event.to_string().replace('\r', ""))
}

/// Whether a running stream was stopped
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

async fn stop_stream(State(state): State<Arc<ApiState>>) -> Json<StopResponse> {
    let stopped = state
        .active_stream
        .lock()
        .take()
        .is_some_and(|token| {
            let running = !token.is_cancelled();
            token.cancel();
            running
        });

    if stopped {
        tracing::info!("voice stream stop requested");
    }
    Json(StopResponse { stopped })
}
