//! Speech-to-text (STT) processing

use async_trait::async_trait;

use super::convert::normalize_to_wav;
use crate::config::SttBackend;
use crate::{Error, Result};

/// Turns recorded speech into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio in any supported container
    ///
    /// # Errors
    ///
    /// Returns `AudioFormat` if the audio cannot be normalised,
    /// `Unintelligible` if no speech was recognised, or `Stt` if the backend
    /// failed
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcriber backed by a hosted ASR API
#[derive(Debug, Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: String,
    provider: SttBackend,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String, language: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
            provider: SttBackend::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String, language: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "Deepgram API key required".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
            provider: SttBackend::Deepgram,
        })
    }

    /// Send canonical WAV bytes to the configured backend
    async fn transcribe_wav(&self, wav: &[u8]) -> Result<String> {
        match self.provider {
            SttBackend::Whisper => self.transcribe_whisper(wav).await,
            SttBackend::Deepgram => self.transcribe_deepgram(wav).await,
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::Stt(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            Error::Stt(e.to_string())
        })?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&language={}&punctuate=true",
            self.model, self.language
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                Error::Stt(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            Error::Stt(e.to_string())
        })?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        // Decoding and resampling are CPU-bound
        let audio = audio.to_vec();
        let wav = tokio::task::spawn_blocking(move || normalize_to_wav(&audio))
            .await
            .map_err(|e| Error::Audio(format!("audio normalisation task failed: {e}")))??;
        let text = self.transcribe_wav(&wav).await?;
        non_empty_transcript(&text)
    }
}

/// Treat an empty recognition result as unintelligible speech
///
/// # Errors
///
/// Returns `Unintelligible` if `text` is blank
pub fn non_empty_transcript(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        Err(Error::Unintelligible)
    } else {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_transcript_is_unintelligible() {
        assert!(matches!(non_empty_transcript("  \n"), Err(Error::Unintelligible)));
        assert_eq!(non_empty_transcript(" Hello. ").unwrap(), "Hello.");
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(SpeechToText::new_whisper(String::new(), "whisper-1".into(), "en".into()).is_err());
        assert!(SpeechToText::new_deepgram(String::new(), "nova-2".into(), "en".into()).is_err());
    }

    #[test]
    fn test_deepgram_response_shape() {
        let json = r#"{"results":{"channels":[{"alternatives":[{"transcript":"buy low"}]}]}}"#;
        let parsed: DeepgramResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.channels[0].alternatives[0].transcript, "buy low");
    }

    #[tokio::test]
    async fn test_unsupported_audio_fails_before_request() {
        let stt =
            SpeechToText::new_whisper("sk-test".into(), "whisper-1".into(), "en".into()).unwrap();
        assert!(matches!(
            stt.transcribe(b"definitely not audio").await,
            Err(Error::AudioFormat(_))
        ));
    }
}
