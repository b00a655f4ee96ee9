//! TOML configuration file loading
//!
//! Supports `~/.config/finguide/config.toml` as a persistent config source
//! (override the path with `FINGUIDE_CONFIG`).
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FinguideConfigFile {
    /// Completion endpoint configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingFileConfig,

    /// Vector memory configuration
    #[serde(default)]
    pub memory: MemoryFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL (e.g. "https://router.huggingface.co/v1")
    pub base_url: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Embedding provider configuration
#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingFileConfig {
    /// "openai" or "hashing"
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub dimension: Option<usize>,
}

/// Vector memory configuration
#[derive(Debug, Default, Deserialize)]
pub struct MemoryFileConfig {
    /// "memory" or "sqlite"
    pub backend: Option<String>,
    pub db_path: Option<String>,
    pub top_k: Option<usize>,

    /// Also write voice exchanges into memory
    pub record_voice: Option<bool>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable the streaming voice loop
    pub enabled: Option<bool>,

    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,

    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,

    /// Spoken language code (e.g. "en")
    pub language: Option<String>,

    pub calibration_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub pause_ms: Option<u64>,
    pub min_energy_threshold: Option<f32>,

    /// Play synthesized replies on the local output device
    pub playback: Option<bool>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    pub data_dir: Option<String>,
    pub audio_dir: Option<String>,
    pub chats_file: Option<String>,
    pub static_dir: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub hf: Option<String>,
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `FinguideConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> FinguideConfigFile {
    let Some(path) = config_file_path() else {
        return FinguideConfigFile::default();
    };

    if !path.exists() {
        return FinguideConfigFile::default();
    }

    load_from(&path)
}

/// Load and parse a specific config file, falling back to defaults on error
pub fn load_from(path: &Path) -> FinguideConfigFile {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                FinguideConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FinguideConfigFile::default()
        }
    }
}

/// Return the config file path: `$FINGUIDE_CONFIG` or `~/.config/finguide/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FINGUIDE_CONFIG") {
        return Some(PathBuf::from(path));
    }

    directories::BaseDirs::new().map(|d| d.config_dir().join("finguide").join("config.toml"))
}
