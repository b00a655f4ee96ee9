//! One advisory turn: retrieve, prompt, respond, record

use std::sync::Arc;

use crate::memory::{MemoryRecord, MemoryRecorder, MemorySource, RetrievalAugmenter};
use crate::prompt::{PromptStyle, build_system_prompt};
use crate::sessions::ChatStore;
use crate::{Error, Result};

use super::Responder;

/// Result of a text turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextAnswer {
    pub response: String,

    /// Session that received the exchange
    pub chat_id: String,
}

/// Orchestrates text and voice turns against the shared memory
///
/// Retrieval always happens before the reply exists and recording after, so
/// a turn never sees its own exchange as context.
pub struct Advisor {
    augmenter: RetrievalAugmenter,
    recorder: MemoryRecorder,
    responder: Arc<dyn Responder>,
    chats: Arc<ChatStore>,
    top_k: usize,
    record_voice: bool,
}

impl Advisor {
    #[must_use]
    pub fn new(
        augmenter: RetrievalAugmenter,
        recorder: MemoryRecorder,
        responder: Arc<dyn Responder>,
        chats: Arc<ChatStore>,
        top_k: usize,
    ) -> Self {
        Self {
            augmenter,
            recorder,
            responder,
            chats,
            top_k,
            record_voice: false,
        }
    }

    /// Also write voice exchanges into memory
    #[must_use]
    pub const fn with_voice_recording(mut self, enabled: bool) -> Self {
        self.record_voice = enabled;
        self
    }

    /// Shared chat log
    #[must_use]
    pub fn chats(&self) -> &Arc<ChatStore> {
        &self.chats
    }

    /// Answer a typed prompt and record the exchange
    ///
    /// The exchange is appended to `chat_id`, or to a new session titled
    /// after the prompt when the id is missing or unknown.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a blank prompt, the responder's error, or
    /// an error writing the chat log
    pub async fn answer_text(&self, prompt: &str, chat_id: Option<&str>) -> Result<TextAnswer> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::InvalidInput("No prompt provided".to_string()));
        }

        let context = self.augmenter.augment(prompt, self.top_k).await;
        let system_prompt = build_system_prompt(PromptStyle::Text, &context);
        let response = self.responder.respond(&system_prompt, prompt).await?;

        self.recorder
            .record(prompt, &response, MemorySource::Text, None)
            .await;
        let chat_id = self.chats.append(chat_id, prompt, &response)?;

        tracing::info!(%chat_id, context = !context.is_empty(), "text turn answered");
        Ok(TextAnswer { response, chat_id })
    }

    /// Answer a transcribed utterance with a speakable reply
    ///
    /// Nothing is written; see [`Self::record_voice`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a blank transcript or the responder's error
    pub async fn answer_voice(&self, transcript: &str) -> Result<String> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(Error::InvalidInput("empty transcript".to_string()));
        }

        let context = self.augmenter.augment(transcript, self.top_k).await;
        let system_prompt = build_system_prompt(PromptStyle::Voice, &context);
        self.responder.respond(&system_prompt, transcript).await
    }

    /// Record a voice exchange if voice recording is enabled
    ///
    /// Returns whether a record was written.
    pub async fn record_voice(
        &self,
        input: &str,
        response: &str,
        audio_url: Option<String>,
    ) -> bool {
        if !self.record_voice {
            return false;
        }
        self.recorder
            .record(input, response, MemorySource::Voice, audio_url)
            .await
    }

    /// Stored exchanges, newest first
    ///
    /// # Errors
    ///
    /// Returns the store's error
    pub fn history(&self) -> Result<Vec<MemoryRecord>> {
        self.recorder.history()
    }
}

impl std::fmt::Debug for Advisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advisor")
            .field("top_k", &self.top_k)
            .field("record_voice", &self.record_voice)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::memory::{Embedder, HashingEmbedder, InMemoryVectorStore, VectorStore};

    #[derive(Default)]
    struct EchoResponder {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Responder for EchoResponder {
        async fn respond(&self, system_prompt: &str, user_text: &str) -> Result<String> {
            self.prompts.lock().push(system_prompt.to_string());
            Ok(format!("answer to {user_text}"))
        }
    }

    fn advisor(dir: &tempfile::TempDir) -> (Advisor, Arc<EchoResponder>, Arc<InMemoryVectorStore>) {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let store = Arc::new(InMemoryVectorStore::new(64));
        let responder = Arc::new(EchoResponder::default());
        let chats = Arc::new(ChatStore::open(dir.path().join("chats.json")).unwrap());
        let advisor = Advisor::new(
            RetrievalAugmenter::new(embedder.clone(), store.clone()),
            MemoryRecorder::new(embedder, store.clone()),
            responder.clone(),
            chats,
            3,
        );
        (advisor, responder, store)
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (advisor, responder, store) = advisor(&dir);
        assert!(matches!(
            advisor.answer_text("   ", None).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(responder.prompts.lock().is_empty());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_text_turn_reads_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let (advisor, responder, store) = advisor(&dir);

        let answer = advisor.answer_text("What is an index fund?", None).await.unwrap();
        assert_eq!(answer.response, "answer to What is an index fund?");
        assert_eq!(store.len().unwrap(), 1);

        // First turn saw an empty store, so no context block
        assert!(!responder.prompts.lock()[0].contains("past context"));
        assert_eq!(advisor.chats().messages(&answer.chat_id).len(), 1);
    }

    #[tokio::test]
    async fn test_voice_turn_does_not_record_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let (advisor, responder, store) = advisor(&dir);

        let reply = advisor.answer_voice("save for a house").await.unwrap();
        assert!(!advisor.record_voice("save for a house", &reply, None).await);
        assert_eq!(store.len().unwrap(), 0);
        assert!(responder.prompts.lock()[0].contains("suitable for speaking"));
    }

    #[tokio::test]
    async fn test_voice_recording_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let (advisor, _, store) = advisor(&dir);
        let advisor = advisor.with_voice_recording(true);

        assert!(advisor
            .record_voice("q", "a", Some("/audio/resp-x.mp3".to_string()))
            .await);
        let records = store.get_all().unwrap();
        assert_eq!(records[0].metadata.source, MemorySource::Voice);
        assert_eq!(records[0].metadata.audio_url.as_deref(), Some("/audio/resp-x.mp3"));
    }
}
