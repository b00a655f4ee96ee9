//! Configuration management for FinGuide
//!
//! Values resolve as env > toml > default. CLI flags are applied on top by
//! the binary.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

use file::FinguideConfigFile;

/// Default OpenAI-compatible completion endpoint
pub const DEFAULT_LLM_BASE_URL: &str = "https://router.huggingface.co/v1";

/// Default completion model
pub const DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2:featherless-ai";

/// FinGuide configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Completion endpoint configuration
    pub llm: LlmConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Vector memory configuration
    pub memory: MemoryConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// HTTP server and on-disk locations
    pub server: ServerConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Completion endpoint configuration
///
/// Sampling parameters are fixed per process; requests cannot override them.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1200,
            temperature: 0.75,
            top_p: 0.9,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Which embedding provider to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings` endpoint
    OpenAi,
    /// Local feature-hashing embedder
    Hashing,
}

impl FromStr for EmbeddingProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "hashing" | "local" => Ok(Self::Hashing),
            other => Err(Error::Config(format!("unknown embedding provider: {other}"))),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
}

/// Which vector store backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBackend {
    /// Process-local, lost on restart
    InMemory,
    /// `SQLite` file with sqlite-vec ranking
    Sqlite,
}

impl FromStr for MemoryBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::InMemory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::Config(format!("unknown memory backend: {other}"))),
        }
    }
}

/// Vector memory configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub backend: MemoryBackend,
    pub db_path: PathBuf,

    /// Number of past exchanges retrieved per turn
    pub top_k: usize,

    /// Write voice exchanges into memory as well as text ones
    pub record_voice: bool,
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttBackend {
    Whisper,
    Deepgram,
}

impl FromStr for SttBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Text-to-speech backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsBackend {
    OpenAi,
    ElevenLabs,
}

impl FromStr for TtsBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable the streaming voice loop
    pub enabled: bool,

    pub stt_provider: SttBackend,
    pub stt_model: String,

    pub tts_provider: TtsBackend,
    pub tts_model: String,
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Spoken language code
    pub language: String,

    /// Ambient-noise sampling window before `Ready`
    pub calibration: Duration,

    /// Interval between `Listening` heartbeats
    pub heartbeat: Duration,

    /// Silence that closes an utterance
    pub pause: Duration,

    /// Lower bound for the calibrated energy threshold (RMS, f32 samples)
    pub min_energy_threshold: f32,

    /// Play replies on the local output device
    pub playback: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stt_provider: SttBackend::Whisper,
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsBackend::OpenAi,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            language: "en".to_string(),
            calibration: Duration::from_millis(1000),
            heartbeat: Duration::from_millis(1000),
            pause: Duration::from_millis(800),
            min_energy_threshold: 0.01,
            playback: true,
        }
    }
}

/// HTTP server configuration and on-disk locations
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,

    /// Path to data directory (memory database, chat log)
    pub data_dir: PathBuf,

    /// Scoped directory for synthesized audio artifacts
    pub audio_dir: PathBuf,

    /// JSON chat log
    pub chats_file: PathBuf,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Hugging Face router token (completion endpoint)
    pub hf: Option<String>,

    /// `OpenAI` API key (embeddings, Whisper and TTS)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl Config {
    /// Load configuration from the TOML file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a provider or backend name is not recognised, or the
    /// data directory cannot be created
    pub fn load(disable_voice: bool) -> Result<Self> {
        let fc = file::load_config_file();
        let mut config = Self::from_sources(fc, |key| std::env::var(key).ok())?;

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
            config.voice.enabled = false;
        }

        config.ensure_data_dir()?;

        Ok(config)
    }

    /// Create the data directory holding the memory database and chat log
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the directory if it cannot be created
    pub fn ensure_data_dir(&self) -> Result<()> {
        let dir = &self.server.data_dir;
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::Config(format!("cannot create data directory {}: {e}", dir.display()))
        })
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider or backend name is not recognised
    #[allow(clippy::too_many_lines)]
    pub fn from_sources(
        fc: FinguideConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env_parse = |key: &str| env(key).and_then(|v| v.parse::<u64>().ok());
        let env_flag = |key: &str| env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let api_keys = ApiKeys {
            hf: env("HF_TOKEN").or(fc.api_keys.hf),
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let llm_default = LlmConfig::default();
        let llm = LlmConfig {
            base_url: env("FINGUIDE_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or(llm_default.base_url),
            model: env("FINGUIDE_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(llm_default.model),
            max_tokens: fc.llm.max_tokens.unwrap_or(llm_default.max_tokens),
            temperature: fc.llm.temperature.unwrap_or(llm_default.temperature),
            top_p: fc.llm.top_p.unwrap_or(llm_default.top_p),
            timeout: fc
                .llm
                .timeout_secs
                .map_or(llm_default.timeout, Duration::from_secs),
        };

        // Remote embeddings when an OpenAI key is around, local hashing otherwise
        let provider = match env("FINGUIDE_EMBEDDING_PROVIDER").or(fc.embedding.provider) {
            Some(name) => name.parse()?,
            None if api_keys.openai.is_some() => EmbeddingProvider::OpenAi,
            None => EmbeddingProvider::Hashing,
        };
        let default_dimension = match provider {
            EmbeddingProvider::OpenAi => crate::memory::OPENAI_EMBEDDING_DIM,
            EmbeddingProvider::Hashing => crate::memory::HASHING_EMBEDDING_DIM,
        };
        let embedding = EmbeddingConfig {
            provider,
            base_url: fc
                .embedding
                .base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: fc
                .embedding
                .model
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            dimension: fc.embedding.dimension.unwrap_or(default_dimension),
        };

        // Determine data directory (~/.local/share/finguide on Linux)
        let data_dir = env("FINGUIDE_DATA_DIR")
            .or(fc.server.data_dir)
            .map_or_else(
                || {
                    directories::BaseDirs::new()
                        .map_or_else(
                            || PathBuf::from(".finguide"),
                            |d| d.data_dir().join("finguide"),
                        )
                },
                PathBuf::from,
            );

        let server = ServerConfig {
            port: env("FINGUIDE_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(5000),
            audio_dir: fc.server.audio_dir.map_or_else(
                || std::env::temp_dir().join("finguide_audio"),
                PathBuf::from,
            ),
            chats_file: fc
                .server
                .chats_file
                .map_or_else(|| data_dir.join("chats.json"), PathBuf::from),
            static_dir: env("FINGUIDE_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
            data_dir: data_dir.clone(),
        };

        let memory = MemoryConfig {
            backend: env("FINGUIDE_MEMORY_BACKEND")
                .or(fc.memory.backend)
                .map_or(Ok(MemoryBackend::InMemory), |s| s.parse())?,
            db_path: fc
                .memory
                .db_path
                .map_or_else(|| data_dir.join("memory.db"), PathBuf::from),
            top_k: fc.memory.top_k.unwrap_or(3),
            record_voice: fc.memory.record_voice.unwrap_or(false),
        };

        let voice_default = VoiceConfig::default();
        let fv = fc.voice;
        let voice = VoiceConfig {
            enabled: !env_flag("FINGUIDE_DISABLE_VOICE").unwrap_or(false)
                && fv.enabled.unwrap_or(voice_default.enabled),
            stt_provider: fv
                .stt_provider
                .map_or(Ok(voice_default.stt_provider), |s| s.parse())?,
            stt_model: env("FINGUIDE_STT_MODEL")
                .or(fv.stt_model)
                .unwrap_or(voice_default.stt_model),
            tts_provider: fv
                .tts_provider
                .map_or(Ok(voice_default.tts_provider), |s| s.parse())?,
            tts_model: env("FINGUIDE_TTS_MODEL")
                .or(fv.tts_model)
                .unwrap_or(voice_default.tts_model),
            tts_voice: fv.tts_voice.unwrap_or(voice_default.tts_voice),
            tts_speed: fv.tts_speed.unwrap_or(voice_default.tts_speed),
            language: fv.language.unwrap_or(voice_default.language),
            calibration: fv
                .calibration_ms
                .map_or(voice_default.calibration, Duration::from_millis),
            heartbeat: env_parse("FINGUIDE_HEARTBEAT_MS")
                .or(fv.heartbeat_ms)
                .map_or(voice_default.heartbeat, Duration::from_millis),
            pause: fv.pause_ms.map_or(voice_default.pause, Duration::from_millis),
            min_energy_threshold: fv
                .min_energy_threshold
                .unwrap_or(voice_default.min_energy_threshold),
            playback: fv.playback.unwrap_or(voice_default.playback),
        };

        Ok(Self {
            llm,
            embedding,
            memory,
            voice,
            server,
            api_keys,
        })
    }

    /// Token for the completion endpoint
    ///
    /// # Errors
    ///
    /// Returns error if neither `HF_TOKEN` nor `[api_keys] hf` is set
    pub fn completion_token(&self) -> Result<&str> {
        self.api_keys
            .hf
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Config("HF_TOKEN not set. Add to config or environment.".to_string())
            })
    }
}
