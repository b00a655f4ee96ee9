//! Spoken turns: transcribe, answer, synthesize

use std::sync::Arc;

use serde::Serialize;

use super::artifacts::AudioArtifacts;
use super::stt::Transcriber;
use super::tts::Synthesizer;
use crate::Result;
use crate::agent::Advisor;

/// Result of a complete spoken turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeechTurn {
    pub transcribed_text: String,
    pub response_text: String,

    /// Where the synthesized reply can be fetched
    pub audio_response_url: String,
}

/// A synthesized reply saved as an artifact
#[derive(Debug, Clone)]
pub struct SpokenReply {
    pub filename: String,
    pub url: String,
    pub mp3: Vec<u8>,
}

/// Speech front end around an [`Advisor`]
///
/// Shared by the `/speech` upload handler and the streaming voice loop.
pub struct SpeechPipeline {
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
    artifacts: AudioArtifacts,
    advisor: Arc<Advisor>,
    language: String,
}

impl SpeechPipeline {
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        artifacts: AudioArtifacts,
        advisor: Arc<Advisor>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            transcriber,
            synthesizer,
            artifacts,
            advisor,
            language: language.into(),
        }
    }

    #[must_use]
    pub const fn artifacts(&self) -> &AudioArtifacts {
        &self.artifacts
    }

    /// Transcribe captured or uploaded audio
    ///
    /// # Errors
    ///
    /// Returns the transcriber's error
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        self.transcriber.transcribe(audio).await
    }

    /// Generate a speakable reply to a transcript
    ///
    /// # Errors
    ///
    /// Returns the advisor's error
    pub async fn answer(&self, transcript: &str) -> Result<String> {
        self.advisor.answer_voice(transcript).await
    }

    /// Synthesize and save a reply, then record the exchange if enabled
    ///
    /// # Errors
    ///
    /// Returns the synthesizer's error or an error saving the artifact
    pub async fn speak(&self, transcript: &str, reply: &str) -> Result<SpokenReply> {
        let mp3 = self.synthesizer.synthesize(reply, &self.language).await?;
        let filename = self.artifacts.save(&mp3).await?;
        let url = AudioArtifacts::url_for(&filename);

        self.advisor
            .record_voice(transcript, reply, Some(url.clone()))
            .await;

        Ok(SpokenReply { filename, url, mp3 })
    }

    /// Run a whole turn for one uploaded recording
    ///
    /// # Errors
    ///
    /// Returns the first failing stage's error; nothing is recorded then
    pub async fn turn(&self, audio: &[u8]) -> Result<SpeechTurn> {
        let transcribed_text = self.transcribe(audio).await?;
        let response_text = self.answer(&transcribed_text).await?;
        let spoken = self.speak(&transcribed_text, &response_text).await?;

        tracing::info!(audio = %spoken.filename, "speech turn answered");
        Ok(SpeechTurn {
            transcribed_text,
            response_text,
            audio_response_url: spoken.url,
        })
    }
}

impl std::fmt::Debug for SpeechPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechPipeline")
            .field("artifacts", &self.artifacts)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}
