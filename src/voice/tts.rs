//! Text-to-speech (TTS) processing

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::TtsBackend;
use crate::{Error, Result};

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static REPEATED_PERIODS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(?:\s*\.)+").expect("valid regex"));

/// Turns reply text into spoken audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Speak `text` in `language`; returns MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if nothing speakable remains after
    /// sanitising, or `Tts` if the backend fails
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;
}

/// Strip markup so a reply reads naturally when spoken
///
/// Emphasis, heading and code markers are removed, underscores become
/// spaces, line breaks become sentence breaks, and runs of whitespace or
/// periods collapse to one.
#[must_use]
pub fn sanitize_for_speech(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '#' | '`'))
        .map(|c| if c == '_' { ' ' } else { c })
        .collect();

    let sentences = stripped.replace("\r\n", "\n").replace("\n\n", ". ").replace('\n', ". ");
    let collapsed = WHITESPACE.replace_all(&sentences, " ");
    let collapsed = REPEATED_PERIODS.replace_all(&collapsed, ".");

    collapsed.trim().trim_start_matches(['.', ' ']).trim().to_string()
}

/// Synthesizer backed by a hosted TTS API
#[derive(Debug, Clone)]
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsBackend,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: String, speed: f32) -> Result<Self> {
        Self::new_openai_with_model(api_key, voice, speed, "tts-1".to_string())
    }

    /// Create a new TTS instance using `OpenAI` with custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai_with_model(
        api_key: String,
        voice: String,
        speed: f32,
        model: String,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            provider: TtsBackend::OpenAi,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String) -> Result<Self> {
        Self::new_elevenlabs_with_model(api_key, voice_id, "eleven_multilingual_v2".to_string())
    }

    /// Create a new TTS instance using ElevenLabs with custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs_with_model(
        api_key: String,
        voice_id: String,
        model: String,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            speed: 1.0,
            model,
            provider: TtsBackend::ElevenLabs,
        })
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        // OpenAI voices follow the language of the input text
        tracing::trace!(language, "OpenAI TTS ignores explicit language");

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            language_code: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            language_code: language,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        let speech = sanitize_for_speech(text);
        if speech.is_empty() {
            return Err(Error::InvalidInput("nothing to speak".to_string()));
        }

        tracing::debug!(chars = speech.len(), provider = ?self.provider, "synthesizing speech");
        let audio = match self.provider {
            TtsBackend::OpenAi => self.synthesize_openai(&speech, language).await?,
            TtsBackend::ElevenLabs => self.synthesize_elevenlabs(&speech, language).await?,
        };

        if audio.is_empty() {
            return Err(Error::Tts("backend returned no audio".to_string()));
        }
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_markup() {
        let text = "## Budget\n\n**Save** 20% of `income`_monthly_.";
        assert_eq!(sanitize_for_speech(text), "Budget. Save 20% of income monthly .");
    }

    #[test]
    fn test_sanitize_line_breaks_become_sentences() {
        assert_eq!(
            sanitize_for_speech("First point\nSecond point\n\nThird"),
            "First point. Second point. Third"
        );
    }

    #[test]
    fn test_sanitize_collapses_periods_and_space() {
        assert_eq!(sanitize_for_speech("Done.\n\nNext...   step"), "Done. Next. step");
    }

    #[test]
    fn test_sanitize_output_is_clean() {
        let samples = [
            "# Title\n- *one*\n- _two_\n\n```code```",
            "plain text",
            "\n\n\n",
            "a..b....c",
        ];
        for text in samples {
            let out = sanitize_for_speech(text);
            assert!(!out.contains(['*', '#', '`', '_', '\n']), "{out:?}");
            assert!(!out.contains(".."), "{out:?}");
            assert!(!out.contains("  "), "{out:?}");
            assert_eq!(out, out.trim());
        }
    }

    #[test]
    fn test_sanitize_generated_markdown_is_clean() {
        const PIECES: [&str; 14] = [
            "*", "**", "#", "## ", "_", "`", "```", "\n", "\n\n", "\r\n", " ", "...", "save",
            "fund. ",
        ];

        // xorshift keeps the inputs identical across runs
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..500 {
            let len = next() % 24;
            #[allow(clippy::cast_possible_truncation)]
            let text: String = (0..len)
                .map(|_| PIECES[(next() % PIECES.len() as u64) as usize])
                .collect();

            let out = sanitize_for_speech(&text);
            assert!(!out.contains(['*', '#', '`', '_', '\n', '\r']), "{text:?} -> {out:?}");
            assert!(!out.contains(".."), "{text:?} -> {out:?}");
            assert!(!out.contains("  "), "{text:?} -> {out:?}");
            assert!(!out.starts_with('.'), "{text:?} -> {out:?}");
            assert_eq!(out, out.trim(), "{text:?}");
        }
    }

    #[test]
    fn test_sanitize_markup_only_is_empty() {
        assert_eq!(sanitize_for_speech("**##``"), "");
    }

    #[tokio::test]
    async fn test_nothing_to_speak_rejected() {
        let tts = TextToSpeech::new_openai("sk-test".into(), "alloy".into(), 1.0).unwrap();
        assert!(matches!(
            tts.synthesize("***", "en").await,
            Err(Error::InvalidInput(_))
        ));
    }
}
