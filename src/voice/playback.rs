//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::convert::{decode_mp3, resample};
use crate::{Error, Result};

/// Best-effort delivery of a synthesized reply to the local user
///
/// Fire-and-forget: implementations must return immediately and never fail
/// the caller.
pub trait Presenter: Send + Sync {
    fn present(&self, mp3: Vec<u8>);
}

/// Plays replies on the default output device from a background thread
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPlayback;

impl Presenter for LocalPlayback {
    fn present(&self, mp3: Vec<u8>) {
        let spawned = std::thread::Builder::new()
            .name("finguide-playback".to_string())
            .spawn(move || {
                if let Err(e) = play_mp3_blocking(&mp3) {
                    tracing::warn!(error = %e, "local playback failed");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn playback thread");
        }
    }
}

/// Discards replies; used when local playback is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPresenter;

impl Presenter for SilentPresenter {
    fn present(&self, _mp3: Vec<u8>) {}
}

/// Decode MP3 bytes and play them, returning when playback ends
///
/// # Errors
///
/// Returns error if decoding fails or no output device is usable
pub fn play_mp3_blocking(mp3_data: &[u8]) -> Result<()> {
    let (samples, rate) = decode_mp3(mp3_data)?;
    play_samples_blocking(&samples, rate)
}

/// Play mono f32 samples, returning when playback ends
///
/// # Errors
///
/// Returns error if no output device is usable
pub fn play_samples_blocking(samples: &[f32], sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(Error::Audio(format!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        )));
    }

    let config = supported.config();
    let channels = usize::from(config.channels.max(1));
    let device_rate = config.sample_rate.0;

    let samples: Arc<Vec<f32>> = Arc::new(if device_rate == sample_rate {
        samples.to_vec()
    } else {
        resample(samples, sample_rate, device_rate)?
    });

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels,
        "audio playback initialized"
    );

    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Poll for completion with timeout
    let duration_ms = (samples.len() as u64 * 1000) / u64::from(device_rate.max(1));
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();
    while !finished.load(Ordering::Relaxed) && start.elapsed() < timeout {
        std::thread::sleep(Duration::from_millis(50));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = samples.len(), "playback complete");
    Ok(())
}
