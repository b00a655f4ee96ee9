//! Streaming voice loop
//!
//! One loop owns one audio source. A capture task splits the source into
//! utterances and hands them to a serial processing task over a small bounded
//! queue, so capture keeps running while a reply is generated. A heartbeat
//! task reports liveness on the same event channel.
//!
//! Stopping is cooperative. Capture halts at its next frame boundary and no
//! further utterances are taken, but an utterance already being processed
//! finishes and still emits its events.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{OwnedSemaphorePermit, mpsc, watch};
use tokio::time::{Instant, interval_at};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::capture::AudioSource;
use super::convert::samples_to_wav;
use super::events::{LoopState, StreamEvent};
use super::playback::Presenter;
use super::segmenter::{SegmenterConfig, UtteranceDetector};
use super::speech::SpeechPipeline;
use crate::Error;
use crate::config::VoiceConfig;

/// Utterances waiting for processing; a full queue holds capture back
const SEGMENT_QUEUE: usize = 4;

/// Events buffered for a slow client
const EVENT_QUEUE: usize = 32;

/// Timing and segmentation settings for a voice loop
#[derive(Debug, Clone, Copy)]
pub struct VoiceLoopConfig {
    /// Ambient noise sampled before listening
    pub calibration: Duration,

    /// Interval between `Listening` heartbeats
    pub heartbeat: Duration,

    /// Utterance detection; the sample rate is taken from the source
    pub segmenter: SegmenterConfig,
}

impl Default for VoiceLoopConfig {
    fn default() -> Self {
        Self {
            calibration: Duration::from_secs(1),
            heartbeat: Duration::from_secs(1),
            segmenter: SegmenterConfig::default(),
        }
    }
}

impl From<&VoiceConfig> for VoiceLoopConfig {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            calibration: config.calibration,
            heartbeat: config.heartbeat,
            segmenter: SegmenterConfig {
                pause: config.pause,
                min_threshold: config.min_energy_threshold,
                ..SegmenterConfig::default()
            },
        }
    }
}

/// Starts voice loops against a shared speech pipeline
pub struct VoiceLoop {
    pipeline: Arc<SpeechPipeline>,
    presenter: Arc<dyn Presenter>,
    config: VoiceLoopConfig,
}

impl VoiceLoop {
    #[must_use]
    pub fn new(
        pipeline: Arc<SpeechPipeline>,
        presenter: Arc<dyn Presenter>,
        config: VoiceLoopConfig,
    ) -> Self {
        Self {
            pipeline,
            presenter,
            config,
        }
    }

    /// Start a loop that owns `source` until it is stopped or exhausted
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(&self, source: Box<dyn AudioSource>) -> VoiceSession {
        self.spawn(source, None)
    }

    /// Like [`start`](Self::start), holding `permit` until `source` is
    /// dropped
    ///
    /// The permit outlives the event stream: it is released only once the
    /// capture task has let go of the device.
    #[must_use]
    pub fn start_exclusive(
        &self,
        source: Box<dyn AudioSource>,
        permit: OwnedSemaphorePermit,
    ) -> VoiceSession {
        self.spawn(source, Some(permit))
    }

    fn spawn(
        &self,
        source: Box<dyn AudioSource>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> VoiceSession {
        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let (state_tx, state_rx) = watch::channel(LoopState::Idle);

        let driver = Driver {
            pipeline: Arc::clone(&self.pipeline),
            presenter: Arc::clone(&self.presenter),
            config: self.config,
            events: event_tx,
            state: Arc::new(state_tx),
            cancel: cancel.clone(),
            permit,
        };
        tokio::spawn(driver.run(source));

        VoiceSession {
            events: event_rx,
            state: state_rx,
            cancel,
        }
    }
}

impl std::fmt::Debug for VoiceLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceLoop")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to one running loop
#[derive(Debug)]
pub struct VoiceSession {
    events: mpsc::Receiver<StreamEvent>,
    state: watch::Receiver<LoopState>,
    cancel: CancellationToken,
}

impl VoiceSession {
    /// Token that stops the loop when cancelled
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Observe state transitions
    #[must_use]
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Stop capturing; in-flight processing still completes
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Consume the session as an event stream
    ///
    /// Dropping the stream stops the loop.
    #[must_use]
    pub fn into_events(self) -> VoiceEvents {
        VoiceEvents {
            inner: ReceiverStream::new(self.events),
            _guard: self.cancel.drop_guard(),
        }
    }
}

/// Events of one loop; ends once the loop has fully wound down
#[derive(Debug)]
pub struct VoiceEvents {
    inner: ReceiverStream<StreamEvent>,
    _guard: DropGuard,
}

impl Stream for VoiceEvents {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// State owned by the tasks of one loop
struct Driver {
    pipeline: Arc<SpeechPipeline>,
    presenter: Arc<dyn Presenter>,
    config: VoiceLoopConfig,
    events: mpsc::Sender<StreamEvent>,
    state: Arc<watch::Sender<LoopState>>,
    cancel: CancellationToken,

    /// Exclusive device ownership, released after the source is dropped
    permit: Option<OwnedSemaphorePermit>,
}

impl Driver {
    async fn run(self, source: Box<dyn AudioSource>) {
        self.capture(source).await;
        tracing::debug!("capture released");
        drop(self.permit);
    }

    /// Calibrate and feed utterances to processing; consumes the source
    async fn capture(&self, mut source: Box<dyn AudioSource>) {
        self.state.send_replace(LoopState::Calibrating);

        let sample_rate = source.sample_rate();
        let mut detector = UtteranceDetector::new(SegmenterConfig {
            sample_rate,
            ..self.config.segmenter
        });

        let Some(ambient) = self.sample_ambient(source.as_mut(), sample_rate).await else {
            self.finish();
            return;
        };
        let threshold = detector.calibrate(&ambient);
        tracing::info!(threshold, sample_rate, "voice loop calibrated");

        if !emit(&self.events, StreamEvent::Ready).await {
            self.finish();
            return;
        }
        self.state.send_replace(LoopState::Listening);

        let (segment_tx, segment_rx) = mpsc::channel(SEGMENT_QUEUE);
        tokio::spawn(heartbeat(
            self.events.clone(),
            self.cancel.clone(),
            self.config.heartbeat,
        ));
        tokio::spawn(
            Processor {
                pipeline: Arc::clone(&self.pipeline),
                presenter: Arc::clone(&self.presenter),
                events: self.events.clone(),
                state: Arc::clone(&self.state),
                cancel: self.cancel.clone(),
                sample_rate,
            }
            .run(segment_rx),
        );

        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                frame = source.next_frame() => frame,
            };

            let segment = match frame {
                Some(frame) => detector.push(&frame),
                None => {
                    tracing::debug!("audio source exhausted");
                    let tail = detector.flush();
                    if let Some(segment) = tail
                        && segment_tx.send(segment).await.is_err()
                    {
                        tracing::debug!("processor gone, trailing utterance dropped");
                    }
                    break;
                }
            };

            if let Some(segment) = segment {
                tracing::debug!(samples = segment.len(), "utterance captured");
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    sent = segment_tx.send(segment) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        drop(source);
        if self.cancel.is_cancelled() {
            self.state.send_replace(LoopState::Stopped);
        }
    }

    /// Collect the calibration window; `None` if stopped first
    async fn sample_ambient(
        &self,
        source: &mut dyn AudioSource,
        sample_rate: u32,
    ) -> Option<Vec<f32>> {
        let wanted = duration_samples(self.config.calibration, sample_rate);
        let mut ambient = Vec::with_capacity(wanted);

        while ambient.len() < wanted {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                frame = source.next_frame() => frame,
            };
            match frame {
                Some(frame) => ambient.extend_from_slice(&frame),
                None => break,
            }
        }
        Some(ambient)
    }

    fn finish(&self) {
        self.cancel.cancel();
        self.state.send_replace(LoopState::Stopped);
    }
}

/// Serial consumer of captured utterances
struct Processor {
    pipeline: Arc<SpeechPipeline>,
    presenter: Arc<dyn Presenter>,
    events: mpsc::Sender<StreamEvent>,
    state: Arc<watch::Sender<LoopState>>,
    cancel: CancellationToken,
    sample_rate: u32,
}

impl Processor {
    async fn run(self, mut segments: mpsc::Receiver<Vec<f32>>) {
        loop {
            let segment = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                segment = segments.recv() => segment,
            };
            let Some(segment) = segment else {
                // Capture ended on its own and the queue is drained
                self.cancel.cancel();
                break;
            };

            self.state.send_replace(LoopState::Processing);
            if let Err(e) = self.process(&segment).await {
                tracing::warn!(error = %e, "utterance processing failed");
                emit(&self.events, StreamEvent::Error(e.to_string())).await;
            }
            if !self.cancel.is_cancelled() {
                self.state.send_replace(LoopState::Listening);
            }
        }
        self.state.send_replace(LoopState::Stopped);
    }

    /// Answer one utterance; unintelligible audio is dropped silently
    async fn process(&self, segment: &[f32]) -> crate::Result<()> {
        let wav = samples_to_wav(segment, self.sample_rate)?;

        let transcript = match self.pipeline.transcribe(&wav).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(Error::Unintelligible) => {
                tracing::debug!("no speech recognised, segment dropped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        emit(&self.events, StreamEvent::Heard(transcript.clone())).await;

        let reply = self.pipeline.answer(&transcript).await?;
        emit(&self.events, StreamEvent::Assistant(reply.clone())).await;

        let spoken = self.pipeline.speak(&transcript, &reply).await?;
        self.presenter.present(spoken.mp3);
        Ok(())
    }
}

async fn heartbeat(events: mpsc::Sender<StreamEvent>, cancel: CancellationToken, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticks = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {
                if !emit(&events, StreamEvent::Listening).await {
                    break;
                }
            }
        }
    }
}

/// Deliver an event; `false` once the client has gone away
async fn emit(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    match events.send(event).await {
        Ok(()) => true,
        Err(mpsc::error::SendError(event)) => {
            tracing::debug!(event = %event, "client disconnected, event not delivered");
            false
        }
    }
}

/// Number of samples covering `duration` at `sample_rate`
fn duration_samples(duration: Duration, sample_rate: u32) -> usize {
    let samples = duration.as_millis() * u128::from(sample_rate) / 1000;
    usize::try_from(samples).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_samples() {
        assert_eq!(duration_samples(Duration::from_secs(1), 16_000), 16_000);
        assert_eq!(duration_samples(Duration::from_millis(250), 16_000), 4_000);
        assert_eq!(duration_samples(Duration::ZERO, 48_000), 0);
    }

    #[tokio::test]
    async fn test_emit_reports_closed_client() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(emit(&tx, StreamEvent::Ready).await);
        assert_eq!(rx.recv().await, Some(StreamEvent::Ready));

        drop(rx);
        assert!(!emit(&tx, StreamEvent::Listening).await);
    }

    #[test]
    fn test_config_from_voice_settings() {
        let voice = VoiceConfig {
            heartbeat: Duration::from_millis(500),
            pause: Duration::from_millis(600),
            ..VoiceConfig::default()
        };
        let config = VoiceLoopConfig::from(&voice);
        assert_eq!(config.heartbeat, Duration::from_millis(500));
        assert_eq!(config.segmenter.pause, Duration::from_millis(600));
        assert_eq!(config.segmenter.max_segment, Duration::from_secs(30));
    }
}
