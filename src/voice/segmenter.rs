//! Utterance segmentation
//!
//! Splits a continuous microphone stream into silence-delimited segments
//! using an RMS energy gate. The gate threshold is calibrated from ambient
//! noise before listening starts.

use std::time::Duration;

/// Ambient RMS is multiplied by this to get the speech threshold
const AMBIENT_MULTIPLIER: f32 = 1.5;

/// Tuning for [`UtteranceDetector`]
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    pub sample_rate: u32,

    /// Trailing silence that ends an utterance
    pub pause: Duration,

    /// Utterances with less voiced audio than this are discarded
    pub min_speech: Duration,

    /// Utterances are cut at this length even without a pause
    pub max_segment: Duration,

    /// Lowest threshold calibration may settle on
    pub min_threshold: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: super::SAMPLE_RATE,
            pause: Duration::from_millis(800),
            min_speech: Duration::from_millis(300),
            max_segment: Duration::from_secs(30),
            min_threshold: 0.01,
        }
    }
}

/// State of the utterance detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance, accumulating
    Speaking,
}

/// Energy-gated utterance detector
#[derive(Debug)]
pub struct UtteranceDetector {
    threshold: f32,
    state: DetectorState,
    buffer: Vec<f32>,
    voiced_samples: usize,
    silence_samples: usize,
    pause_samples: usize,
    min_speech_samples: usize,
    max_samples: usize,
    min_threshold: f32,
}

impl UtteranceDetector {
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        let to_samples = |d: Duration| {
            let n = d.as_millis() * u128::from(config.sample_rate) / 1000;
            usize::try_from(n).unwrap_or(usize::MAX).max(1)
        };

        Self {
            threshold: config.min_threshold,
            state: DetectorState::Idle,
            buffer: Vec::new(),
            voiced_samples: 0,
            silence_samples: 0,
            pause_samples: to_samples(config.pause),
            min_speech_samples: to_samples(config.min_speech),
            max_samples: to_samples(config.max_segment),
            min_threshold: config.min_threshold,
        }
    }

    /// Set the speech threshold from a window of ambient noise
    ///
    /// Returns the new threshold.
    pub fn calibrate(&mut self, ambient: &[f32]) -> f32 {
        let ambient_rms = calculate_energy(ambient);
        self.threshold = (ambient_rms * AMBIENT_MULTIPLIER).max(self.min_threshold);
        tracing::debug!(ambient_rms, threshold = self.threshold, "energy threshold calibrated");
        self.threshold
    }

    /// Feed one frame; returns a finished utterance if this frame closed one
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.voiced_samples = samples.len();
                    self.silence_samples = 0;
                    tracing::trace!(energy, "speech started");
                }
                None
            }
            DetectorState::Speaking => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.voiced_samples += samples.len();
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += samples.len();
                }

                if self.silence_samples >= self.pause_samples
                    || self.buffer.len() >= self.max_samples
                {
                    self.finish()
                } else {
                    None
                }
            }
        }
    }

    /// Close any in-progress utterance, e.g. when the source ends
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        match self.state {
            DetectorState::Idle => None,
            DetectorState::Speaking => self.finish(),
        }
    }

    fn finish(&mut self) -> Option<Vec<f32>> {
        let voiced = self.voiced_samples;
        let segment = std::mem::take(&mut self.buffer);
        self.reset();

        if voiced >= self.min_speech_samples {
            tracing::debug!(samples = segment.len(), voiced, "utterance complete");
            Some(segment)
        } else {
            tracing::trace!(voiced, "utterance too short, discarded");
            None
        }
    }

    /// Reset detector to idle state
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.buffer.clear();
        self.voiced_samples = 0;
        self.silence_samples = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Current speech threshold
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 100 ms frames at 16 kHz
    const FRAME: usize = 1600;

    fn detector() -> UtteranceDetector {
        UtteranceDetector::new(SegmenterConfig::default())
    }

    fn feed(d: &mut UtteranceDetector, level: f32, frames: usize) -> Vec<Vec<f32>> {
        (0..frames).filter_map(|_| d.push(&vec![level; FRAME])).collect()
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&[0.0; 100]) < 0.001);
        assert!(calculate_energy(&[0.5; 100]) > 0.4);
        assert!(calculate_energy(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_calibration_floor() {
        let mut d = detector();
        assert!((d.calibrate(&[0.0; 1000]) - 0.01).abs() < f32::EPSILON);
        assert!((d.calibrate(&[0.1; 1000]) - 0.15).abs() < 1e-4);
    }

    #[test]
    fn test_pause_closes_utterance() {
        let mut d = detector();
        assert!(feed(&mut d, 0.3, 5).is_empty());
        assert_eq!(d.state(), DetectorState::Speaking);

        // 700 ms of silence is not yet a pause
        assert!(feed(&mut d, 0.0, 7).is_empty());
        let segments = feed(&mut d, 0.0, 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 13 * FRAME);
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn test_short_blip_discarded() {
        let mut d = detector();
        assert!(feed(&mut d, 0.3, 2).is_empty());
        assert!(feed(&mut d, 0.0, 10).is_empty());
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn test_max_segment_cuts() {
        let mut d = UtteranceDetector::new(SegmenterConfig {
            max_segment: Duration::from_secs(1),
            ..SegmenterConfig::default()
        });
        let segments = feed(&mut d, 0.3, 25);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 10 * FRAME);
    }

    #[test]
    fn test_flush_returns_pending_speech() {
        let mut d = detector();
        feed(&mut d, 0.3, 4);
        assert_eq!(d.flush().map(|s| s.len()), Some(4 * FRAME));
        assert!(d.flush().is_none());
    }

    #[test]
    fn test_quiet_speech_below_threshold_ignored() {
        let mut d = detector();
        d.calibrate(&[0.2; 1000]);
        assert!(feed(&mut d, 0.25, 10).is_empty());
        assert_eq!(d.state(), DetectorState::Idle);
    }
}
