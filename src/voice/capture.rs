//! Audio capture from microphone

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tokio::sync::mpsc;

use super::SAMPLE_RATE;
use crate::{Error, Result};

/// Frames buffered between the device callback and the async consumer
const FRAME_QUEUE: usize = 64;

/// A source of mono f32 audio frames
///
/// `None` means the source is exhausted or the device went away.
#[async_trait]
pub trait AudioSource: Send {
    /// Sample rate of produced frames
    fn sample_rate(&self) -> u32;

    /// Wait for the next frame
    async fn next_frame(&mut self) -> Option<Vec<f32>>;
}

/// Captures audio from the default input device
///
/// The cpal stream lives on a dedicated thread for as long as this value is
/// alive. The device callback never blocks: frames are dropped when the
/// consumer falls behind.
pub struct MicrophoneCapture {
    frames: mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
    dropped: Arc<AtomicU64>,
    _shutdown: std::sync::mpsc::Sender<()>,
}

impl MicrophoneCapture {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open() -> Result<Self> {
        let (frame_tx, frames) = mpsc::channel(FRAME_QUEUE);
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<u32>>(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_cb = Arc::clone(&dropped);

        std::thread::Builder::new()
            .name("finguide-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(frame_tx, dropped_cb) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Blocks until the owning `MicrophoneCapture` is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })
            .map_err(|e| Error::Audio(format!("failed to spawn capture thread: {e}")))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited".to_string()))??;

        Ok(Self {
            frames,
            sample_rate,
            dropped,
            _shutdown: shutdown_tx,
        })
    }

    /// Frames discarded because the consumer was too slow
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        let dropped = self.dropped_frames();
        if dropped > 0 {
            tracing::debug!(dropped, "capture frames dropped while consumer was busy");
        }
    }
}

#[async_trait]
impl AudioSource for MicrophoneCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }
}

/// Build and start the cpal stream; returns it with its sample rate
fn build_input_stream(
    frame_tx: mpsc::Sender<Vec<f32>>,
    dropped: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    // Prefer mono 16 kHz; otherwise take the device default and down-mix
    let preferred = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)));

    let supported = match preferred {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?,
    };

    if supported.sample_format() != SampleFormat::F32 {
        return Err(Error::Audio(format!(
            "unsupported input sample format {:?}",
            supported.sample_format()
        )));
    }

    let config: StreamConfig = supported.config();
    let channels = usize::from(config.channels.max(1));
    let sample_rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                #[allow(clippy::cast_precision_loss)]
                let frame: Vec<f32> = if channels == 1 {
                    data.to_vec()
                } else {
                    data.chunks(channels)
                        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
                        .collect()
                };
                if frame_tx.try_send(frame).is_err() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!("audio capture started");

    Ok((stream, sample_rate))
}
