//! HTTP API server for finguide

pub mod chat;
pub mod health;
pub mod voice;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::agent::Advisor;
use crate::error::ErrorClass;
use crate::voice::{AudioArtifacts, AudioSource, SpeechPipeline, VoiceLoop};
use crate::{Error, Result};

/// Opens the capture device for a new voice stream
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn AudioSource>> + Send + Sync>;

/// Shared state for API handlers
pub struct ApiState {
    pub advisor: Arc<Advisor>,
    pub artifacts: AudioArtifacts,

    /// Present when speech backends are configured
    pub speech: Option<Arc<SpeechPipeline>>,

    /// Present when live voice is enabled
    pub voice_loop: Option<Arc<VoiceLoop>>,
    pub audio_source: Option<SourceFactory>,

    /// One permit: the capture device has a single owner
    pub stream_slot: Arc<Semaphore>,

    /// Stop signal of the running stream, if any
    pub active_stream: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("artifacts", &self.artifacts)
            .field("speech", &self.speech.is_some())
            .field("voice_loop", &self.voice_loop.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    advisor: Arc<Advisor>,
    artifacts: AudioArtifacts,
    port: u16,
    speech: Option<Arc<SpeechPipeline>>,
    voice_loop: Option<Arc<VoiceLoop>>,
    audio_source: Option<SourceFactory>,
    static_dir: Option<PathBuf>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(advisor: Arc<Advisor>, artifacts: AudioArtifacts, port: u16) -> Self {
        Self {
            advisor,
            artifacts,
            port,
            speech: None,
            voice_loop: None,
            audio_source: None,
            static_dir: None,
        }
    }

    /// Enable `/speech`
    #[must_use]
    pub fn speech(mut self, pipeline: Arc<SpeechPipeline>) -> Self {
        self.speech = Some(pipeline);
        self
    }

    /// Enable `/stream` with audio from `source`
    #[must_use]
    pub fn voice_loop(mut self, voice_loop: Arc<VoiceLoop>, source: SourceFactory) -> Self {
        self.voice_loop = Some(voice_loop);
        self.audio_source = Some(source);
        self
    }

    /// Set the static files directory for serving the web UI
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let state = Arc::new(ApiState {
            advisor: self.advisor,
            artifacts: self.artifacts,
            speech: self.speech,
            voice_loop: self.voice_loop,
            audio_source: self.audio_source,
            stream_slot: Arc::new(Semaphore::new(1)),
            active_stream: Mutex::new(None),
        });

        ApiServer {
            state,
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    #[must_use]
    pub fn state(&self) -> &Arc<ApiState> {
        &self.state
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .merge(chat::router(self.state.clone()))
            .merge(voice::router(self.state.clone()))
            .merge(health::router(self.state.clone()));

        // Serve static files if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(
            port = self.port,
            speech = self.state.speech.is_some(),
            stream = self.state.voice_loop.is_some(),
            "API server listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}

/// Error response rendered as `{"error": {"code", "message"}}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// A feature that is switched off or not configured
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "not_configured",
            message: message.into(),
        }
    }

    /// Malformed request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let (status, code) = match error.class() {
            ErrorClass::Input => (StatusCode::BAD_REQUEST, "invalid_input"),
            ErrorClass::Unintelligible => (StatusCode::BAD_REQUEST, "unintelligible"),
            ErrorClass::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorClass::Conflict => (StatusCode::CONFLICT, "conflict"),
            ErrorClass::Upstream => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            ErrorClass::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            tracing::error!(error = %error, code, "request failed");
        } else {
            tracing::debug!(error = %error, code, "request rejected");
        }

        Self {
            status,
            code,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        (
            self.status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code: self.code,
                    message: self.message,
                },
            }),
        )
            .into_response()
    }
}
