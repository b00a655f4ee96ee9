//! Daemon - the main finguide service
//!
//! Assembles memory, responder, speech backends and the voice loop from
//! configuration, then serves the HTTP API.

use std::sync::Arc;

use crate::agent::{Advisor, ChatCompletionsResponder};
use crate::api::{ApiServer, ApiServerBuilder, SourceFactory};
use crate::config::{
    ApiKeys, Config, EmbeddingConfig, EmbeddingProvider, MemoryBackend, MemoryConfig, SttBackend,
    TtsBackend, VoiceConfig,
};
use crate::memory::{
    Embedder, HashingEmbedder, InMemoryVectorStore, MemoryRecorder, OpenAiEmbedder,
    RetrievalAugmenter, SqliteVectorStore, VectorStore,
};
use crate::sessions::ChatStore;
use crate::voice::{
    AudioArtifacts, AudioSource, LocalPlayback, MicrophoneCapture, Presenter, SilentPresenter,
    SpeechPipeline, SpeechToText, Synthesizer, TextToSpeech, Transcriber, VoiceLoop,
    VoiceLoopConfig,
};
use crate::{Error, Result};

/// The finguide daemon
pub struct Daemon {
    config: Config,
    advisor: Arc<Advisor>,
    artifacts: AudioArtifacts,
    speech: Option<Arc<SpeechPipeline>>,
}

impl Daemon {
    /// Wire every component from `config`
    ///
    /// Speech is optional: missing STT or TTS keys only disable the voice
    /// endpoints.
    ///
    /// # Errors
    ///
    /// Returns error if the completion token is missing or memory, the chat
    /// log or the audio directory cannot be opened
    pub fn new(config: Config) -> Result<Self> {
        let token = config.completion_token()?;
        let responder = Arc::new(ChatCompletionsResponder::new(&config.llm, token)?);

        let embedder = build_embedder(&config.embedding, &config.api_keys)?;
        let store = build_store(&config.memory, embedder.dimension())?;
        tracing::info!(
            backend = ?config.memory.backend,
            records = store.len()?,
            dimension = store.dimension(),
            "vector memory ready"
        );

        let chats = Arc::new(ChatStore::open(&config.server.chats_file)?);
        let advisor = Arc::new(
            Advisor::new(
                RetrievalAugmenter::new(Arc::clone(&embedder), Arc::clone(&store)),
                MemoryRecorder::new(embedder, store),
                responder,
                chats,
                config.memory.top_k,
            )
            .with_voice_recording(config.memory.record_voice),
        );

        let artifacts = AudioArtifacts::new(&config.server.audio_dir)?;

        let speech = match (
            build_transcriber(&config.voice, &config.api_keys),
            build_synthesizer(&config.voice, &config.api_keys),
        ) {
            (Ok(transcriber), Ok(synthesizer)) => Some(Arc::new(SpeechPipeline::new(
                transcriber,
                synthesizer,
                artifacts.clone(),
                Arc::clone(&advisor),
                config.voice.language.clone(),
            ))),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "speech disabled");
                None
            }
        };

        Ok(Self {
            config,
            advisor,
            artifacts,
            speech,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn advisor(&self) -> &Arc<Advisor> {
        &self.advisor
    }

    #[must_use]
    pub const fn speech(&self) -> Option<&Arc<SpeechPipeline>> {
        self.speech.as_ref()
    }

    /// Build the HTTP server; the voice loop needs speech and `voice.enabled`
    #[must_use]
    pub fn api_server(&self) -> ApiServer {
        let mut builder = ApiServerBuilder::new(
            Arc::clone(&self.advisor),
            self.artifacts.clone(),
            self.config.server.port,
        )
        .static_dir(self.config.server.static_dir.clone());

        if let Some(speech) = &self.speech {
            builder = builder.speech(Arc::clone(speech));

            if self.config.voice.enabled {
                let presenter: Arc<dyn Presenter> = if self.config.voice.playback {
                    Arc::new(LocalPlayback)
                } else {
                    Arc::new(SilentPresenter)
                };
                let voice_loop = Arc::new(VoiceLoop::new(
                    Arc::clone(speech),
                    presenter,
                    VoiceLoopConfig::from(&self.config.voice),
                ));
                let microphone: SourceFactory = Arc::new(|| {
                    MicrophoneCapture::open().map(|m| Box::new(m) as Box<dyn AudioSource>)
                });
                builder = builder.voice_loop(voice_loop, microphone);
            }
        }

        builder.build()
    }

    /// Serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let server = self.api_server();
        server
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                tracing::info!("shutting down");
            })
            .await
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .field("speech", &self.speech.is_some())
            .finish_non_exhaustive()
    }
}

/// Build the configured embedding provider
///
/// # Errors
///
/// Returns error if the `OpenAI` provider is selected without a key
pub fn build_embedder(config: &EmbeddingConfig, keys: &ApiKeys) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::OpenAi => {
            let key = keys.openai.clone().ok_or_else(|| {
                Error::Config("OPENAI_API_KEY required for openai embeddings".to_string())
            })?;
            Ok(Arc::new(OpenAiEmbedder::with_model(
                key,
                config.base_url.clone(),
                config.model.clone(),
                config.dimension,
            )?))
        }
        EmbeddingProvider::Hashing => {
            tracing::info!(dimension = config.dimension, "using local hashing embeddings");
            Ok(Arc::new(HashingEmbedder::new(config.dimension)))
        }
    }
}

/// Open the configured vector store
///
/// # Errors
///
/// Returns error if the database cannot be opened or holds vectors of a
/// different dimension
pub fn build_store(config: &MemoryConfig, dimension: usize) -> Result<Arc<dyn VectorStore>> {
    match config.backend {
        MemoryBackend::InMemory => Ok(Arc::new(InMemoryVectorStore::new(dimension))),
        MemoryBackend::Sqlite => Ok(Arc::new(SqliteVectorStore::open(
            &config.db_path,
            dimension,
        )?)),
    }
}

/// Build the configured speech-to-text backend
///
/// # Errors
///
/// Returns error if the backend's key is missing
pub fn build_transcriber(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Arc<dyn Transcriber>> {
    let stt = match voice.stt_provider {
        SttBackend::Whisper => SpeechToText::new_whisper(
            keys.openai.clone().unwrap_or_default(),
            voice.stt_model.clone(),
            voice.language.clone(),
        )?,
        SttBackend::Deepgram => SpeechToText::new_deepgram(
            keys.deepgram.clone().unwrap_or_default(),
            voice.stt_model.clone(),
            voice.language.clone(),
        )?,
    };
    Ok(Arc::new(stt))
}

/// Build the configured text-to-speech backend
///
/// # Errors
///
/// Returns error if the backend's key is missing
pub fn build_synthesizer(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Arc<dyn Synthesizer>> {
    let tts = match voice.tts_provider {
        TtsBackend::OpenAi => TextToSpeech::new_openai_with_model(
            keys.openai.clone().unwrap_or_default(),
            voice.tts_voice.clone(),
            voice.tts_speed,
            voice.tts_model.clone(),
        )?,
        TtsBackend::ElevenLabs => TextToSpeech::new_elevenlabs_with_model(
            keys.elevenlabs.clone().unwrap_or_default(),
            voice.tts_voice.clone(),
            voice.tts_model.clone(),
        )?,
    };
    Ok(Arc::new(tts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::FinguideConfigFile;

    #[test]
    fn test_openai_embedder_requires_key() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        };
        assert!(build_embedder(&config, &ApiKeys::default()).is_err());
    }

    #[test]
    fn test_hashing_embedder_needs_no_key() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Hashing,
            base_url: String::new(),
            model: String::new(),
            dimension: 64,
        };
        let embedder = build_embedder(&config, &ApiKeys::default()).unwrap();
        assert_eq!(embedder.dimension(), 64);
    }

    #[test]
    fn test_speech_backends_require_keys() {
        let voice = VoiceConfig::default();
        assert!(build_transcriber(&voice, &ApiKeys::default()).is_err());
        assert!(build_synthesizer(&voice, &ApiKeys::default()).is_err());

        let keys = ApiKeys {
            openai: Some("sk-test".to_string()),
            ..ApiKeys::default()
        };
        assert!(build_transcriber(&voice, &keys).is_ok());
        assert!(build_synthesizer(&voice, &keys).is_ok());
    }

    #[test]
    fn test_daemon_requires_completion_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::from_sources(FinguideConfigFile::default(), |_| None).unwrap();
        config.server.chats_file = dir.path().join("chats.json");
        config.server.audio_dir = dir.path().join("audio");
        assert!(matches!(Daemon::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_daemon_without_speech_keys() {
        let dir = tempfile::tempdir().unwrap();
        let env = |key: &str| (key == "HF_TOKEN").then(|| "hf_test".to_string());
        let mut config = Config::from_sources(FinguideConfigFile::default(), env).unwrap();
        config.memory.backend = MemoryBackend::InMemory;
        config.server.chats_file = dir.path().join("chats.json");
        config.server.audio_dir = dir.path().join("audio");

        let daemon = Daemon::new(config).unwrap();
        assert!(daemon.speech().is_none());
        assert!(daemon.api_server().state().voice_loop.is_none());
    }
}
