//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use finguide::memory::{HashingEmbedder, InMemoryVectorStore, MemoryRecorder, RetrievalAugmenter};
use finguide::voice::{
    AudioArtifacts, AudioSource, Presenter, SegmenterConfig, SpeechPipeline, Synthesizer,
    Transcriber, VoiceLoopConfig,
};
use finguide::{Advisor, ChatStore, Error, Responder, Result};

pub const TEST_RATE: u32 = 16_000;

/// 100 ms frames
pub const FRAME: usize = 1_600;

pub const EMBEDDING_DIM: usize = 256;

/// Everything a test needs around an [`Advisor`]
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<InMemoryVectorStore>,
    pub chats: Arc<ChatStore>,
    pub responder: Arc<FakeResponder>,
    pub advisor: Arc<Advisor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_responder(FakeResponder::new())
    }

    pub fn with_responder(responder: FakeResponder) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let embedder = Arc::new(HashingEmbedder::new(EMBEDDING_DIM));
        let store = Arc::new(InMemoryVectorStore::new(EMBEDDING_DIM));
        let chats =
            Arc::new(ChatStore::open(dir.path().join("chats.json")).expect("failed to open chats"));
        let responder = Arc::new(responder);

        let advisor = Arc::new(Advisor::new(
            RetrievalAugmenter::new(embedder.clone(), store.clone()),
            MemoryRecorder::new(embedder, store.clone()),
            responder.clone(),
            chats.clone(),
            3,
        ));

        Self {
            dir,
            store,
            chats,
            responder,
            advisor,
        }
    }

    pub fn artifacts(&self) -> AudioArtifacts {
        AudioArtifacts::new(self.dir.path().join("audio")).expect("failed to create audio dir")
    }

    pub fn pipeline(
        &self,
        transcriber: Arc<FakeTranscriber>,
        synthesizer: Arc<FakeSynthesizer>,
    ) -> Arc<SpeechPipeline> {
        Arc::new(SpeechPipeline::new(
            transcriber,
            synthesizer,
            self.artifacts(),
            self.advisor.clone(),
            "en",
        ))
    }
}

/// Responder that echoes the prompt and records every call
///
/// With a gate, each call waits for one permit before answering.
#[derive(Default)]
pub struct FakeResponder {
    pub calls: Mutex<Vec<(String, String)>>,
    gate: Option<Arc<Semaphore>>,
    fail: bool,
}

impl FakeResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn system_prompts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(s, _)| s.clone()).collect()
    }
}

#[async_trait]
impl Responder for FakeResponder {
    async fn respond(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.calls
            .lock()
            .push((system_prompt.to_string(), user_prompt.to_string()));

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.fail {
            return Err(Error::GenerationFailed("model offline".to_string()));
        }
        Ok(format!("Advice about: {user_prompt}"))
    }
}

/// Transcriber returning scripted results in order
///
/// Once the script is exhausted every call is unintelligible.
#[derive(Default)]
pub struct FakeTranscriber {
    script: Mutex<VecDeque<Result<String>>>,
    pub calls: Mutex<Vec<usize>>,
}

impl FakeTranscriber {
    pub fn new(script: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn saying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok((*t).to_string())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        self.calls.lock().push(audio.len());
        if audio.is_empty() {
            return Err(Error::AudioFormat("empty audio payload".to_string()));
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(text)) if text.trim().is_empty() => Err(Error::Unintelligible),
            Some(result) => result,
            None => Err(Error::Unintelligible),
        }
    }
}

/// Synthesizer producing a fixed fake MP3 payload
#[derive(Default)]
pub struct FakeSynthesizer {
    pub spoken: Mutex<Vec<String>>,
}

pub const FAKE_MP3: &[u8] = b"ID3\x04fake-mp3-payload";

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<Vec<u8>> {
        self.spoken.lock().push(text.to_string());
        Ok(FAKE_MP3.to_vec())
    }
}

/// Presenter that remembers what it was asked to play
#[derive(Default)]
pub struct RecordingPresenter {
    pub presented: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPresenter {
    pub fn count(&self) -> usize {
        self.presented.lock().len()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&self, mp3: Vec<u8>) {
        self.presented.lock().push(mp3);
    }
}

/// Audio source replaying prepared frames
///
/// After the script ends it either reports exhaustion or stays silent
/// forever, like an idle microphone.
pub struct ScriptedAudioSource {
    frames: VecDeque<Vec<f32>>,
    frame_delay: Option<Duration>,
    hold_open: bool,
    released: Option<Arc<AtomicBool>>,
}

impl ScriptedAudioSource {
    pub fn new(frames: Vec<Vec<f32>>) -> Self {
        Self {
            frames: frames.into(),
            frame_delay: None,
            hold_open: false,
            released: None,
        }
    }

    /// Set `flag` when the source is dropped
    pub fn on_release(mut self, flag: Arc<AtomicBool>) -> Self {
        self.released = Some(flag);
        self
    }

    /// Deliver frames no faster than `delay` apart
    pub fn paced(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }

    /// Never end; block once the script is played
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl AudioSource for ScriptedAudioSource {
    fn sample_rate(&self) -> u32 {
        TEST_RATE
    }

    async fn next_frame(&mut self) -> Option<Vec<f32>> {
        if let Some(delay) = self.frame_delay {
            tokio::time::sleep(delay).await;
        }
        match self.frames.pop_front() {
            Some(frame) => Some(frame),
            None if self.hold_open => std::future::pending().await,
            None => None,
        }
    }
}

impl Drop for ScriptedAudioSource {
    fn drop(&mut self) {
        if let Some(flag) = &self.released {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Frames of silence
pub fn silence(frames: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; FRAME]; frames]
}

/// Frames of loud constant-energy "speech"
pub fn speech(frames: usize) -> Vec<Vec<f32>> {
    vec![vec![0.3; FRAME]; frames]
}

/// Calibration window followed by `utterances` separated by pauses
pub fn utterance_script(utterances: usize) -> Vec<Vec<f32>> {
    let mut frames = silence(2);
    for _ in 0..utterances {
        frames.extend(speech(4));
        frames.extend(silence(4));
    }
    frames
}

/// Fast loop timings for tests; heartbeats effectively off
pub fn loop_config() -> VoiceLoopConfig {
    VoiceLoopConfig {
        calibration: Duration::from_millis(200),
        heartbeat: Duration::from_secs(3_600),
        segmenter: SegmenterConfig {
            pause: Duration::from_millis(300),
            min_speech: Duration::from_millis(200),
            ..SegmenterConfig::default()
        },
    }
}
