//! Voice processing module
//!
//! Audio normalisation, utterance segmentation, speech-to-text and
//! text-to-speech backends, local capture and playback, and the streaming
//! voice loop that ties them together.

mod artifacts;
mod capture;
mod convert;
mod events;
mod playback;
mod segmenter;
mod speech;
mod stream;
mod stt;
mod tts;

pub use artifacts::{AUDIO_ROUTE, AudioArtifacts};
pub use capture::{AudioSource, MicrophoneCapture};
pub use convert::{
    SAMPLE_RATE, decode_mp3, is_canonical_wav, normalize_to_wav, resample, samples_to_wav,
};
pub use events::{LoopState, StreamEvent};
pub use playback::{
    LocalPlayback, Presenter, SilentPresenter, play_mp3_blocking, play_samples_blocking,
};
pub use segmenter::{DetectorState, SegmenterConfig, UtteranceDetector, calculate_energy};
pub use speech::{SpeechPipeline, SpeechTurn, SpokenReply};
pub use stream::{VoiceEvents, VoiceLoop, VoiceLoopConfig, VoiceSession};
pub use stt::{SpeechToText, Transcriber, non_empty_transcript};
pub use tts::{Synthesizer, TextToSpeech, sanitize_for_speech};
