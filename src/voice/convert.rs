//! Audio normalisation to canonical speech PCM
//!
//! Everything handed to a transcriber is 16 kHz mono 16-bit WAV. Uploads in
//! other WAV layouts or MP3 are decoded, down-mixed and resampled; input that
//! is already canonical is passed through untouched.

use std::io::Cursor;

use crate::{Error, Result};

/// Sample rate for speech audio (16kHz)
pub const SAMPLE_RATE: u32 = 16000;

const RESAMPLE_CHUNK: usize = 1024;

/// Source rates accepted for decoding; anything outside is a corrupt header
const MIN_SOURCE_RATE: u32 = 4_000;
const MAX_SOURCE_RATE: u32 = 384_000;

/// Normalise an uploaded audio payload to canonical WAV bytes
///
/// # Errors
///
/// Returns `AudioFormat` if the payload is empty, not WAV or MP3, or cannot
/// be decoded
pub fn normalize_to_wav(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(Error::AudioFormat("empty audio payload".to_string()));
    }

    if is_wav(data) {
        if is_canonical_wav(data) {
            tracing::trace!(bytes = data.len(), "audio already canonical");
            return Ok(data.to_vec());
        }
        let (samples, rate) = decode_wav(data)?;
        return encode_canonical(&samples, rate);
    }

    if is_mp3(data) {
        let (samples, rate) = decode_mp3(data)?;
        return encode_canonical(&samples, rate);
    }

    Err(Error::AudioFormat(
        "unrecognised container, expected WAV or MP3".to_string(),
    ))
}

/// Whether `data` is a 16 kHz mono 16-bit PCM WAV file
#[must_use]
pub fn is_canonical_wav(data: &[u8]) -> bool {
    hound::WavReader::new(Cursor::new(data)).is_ok_and(|reader| {
        let spec = reader.spec();
        spec.channels == 1
            && spec.sample_rate == SAMPLE_RATE
            && spec.bits_per_sample == 16
            && spec.sample_format == hound::SampleFormat::Int
    })
}

fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

fn is_mp3(data: &[u8]) -> bool {
    data.starts_with(b"ID3") || (data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0)
}

fn encode_canonical(samples: &[f32], rate: u32) -> Result<Vec<u8>> {
    if samples.is_empty() {
        return Err(Error::AudioFormat("no audio samples".to_string()));
    }

    let resampled = if rate == SAMPLE_RATE {
        samples.to_vec()
    } else {
        resample(samples, rate, SAMPLE_RATE)?
    };

    tracing::debug!(
        from_rate = rate,
        samples_in = samples.len(),
        samples_out = resampled.len(),
        "audio normalised"
    );
    samples_to_wav(&resampled, SAMPLE_RATE)
}

/// Decode any PCM WAV into mono f32 samples and its sample rate
#[allow(clippy::cast_precision_loss)]
fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::AudioFormat(format!("invalid WAV: {e}")))?;
    let spec = reader.spec();
    check_source_rate(spec.sample_rate)?;
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::AudioFormat(format!("invalid WAV samples: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::AudioFormat(format!("invalid WAV samples: {e}")))?
        }
    };

    let rate = check_source_rate(spec.sample_rate)?;
    Ok((downmix(&interleaved, channels), rate))
}

fn check_source_rate(rate: u32) -> Result<u32> {
    if (MIN_SOURCE_RATE..=MAX_SOURCE_RATE).contains(&rate) {
        Ok(rate)
    } else {
        Err(Error::AudioFormat(format!("unsupported sample rate {rate} Hz")))
    }
}

/// Decode MP3 bytes to mono f32 samples and the stream's sample rate
///
/// # Errors
///
/// Returns `AudioFormat` if no frame decodes
pub fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(mp3_data);
    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate.get_or_insert(u32::try_from(frame.sample_rate).unwrap_or(0));
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::AudioFormat(format!("MP3 decode error: {e}"))),
        }
    }

    match sample_rate {
        Some(rate) if !samples.is_empty() => Ok((samples, check_source_rate(rate)?)),
        _ => Err(Error::AudioFormat("no decodable MP3 frames".to_string())),
    }
}

#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample mono audio using rubato
///
/// The result holds exactly `ceil(len * to_rate / from_rate)` samples,
/// aligned to the input: the resampler's delay and flush padding are cut.
///
/// # Errors
///
/// Returns `AudioFormat` if the resampler rejects the rates
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::AudioFormat(format!("resampler init failed: {e}")))?;

    let expected = resampled_len(samples.len(), from_rate, to_rate);
    let delay = resampler.output_delay();

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::with_capacity(delay + expected + 2 * RESAMPLE_CHUNK);

    let mut chunks = input.chunks_exact(RESAMPLE_CHUNK);
    for chunk in chunks.by_ref() {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::AudioFormat(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let result = resampler
            .process_partial(Some(&[tail]), None)
            .map_err(|e| Error::AudioFormat(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush the resampler's internal delay
    while output.len() < delay + expected {
        let result = resampler
            .process_partial::<&[f64]>(None, None)
            .map_err(|e| Error::AudioFormat(format!("resample failed: {e}")))?;
        if result[0].is_empty() {
            break;
        }
        output.extend_from_slice(&result[0]);
    }

    Ok(output
        .iter()
        .skip(delay)
        .take(expected)
        .map(|&s| s as f32)
        .collect())
}

/// Output length for `len` input samples converted between rates
#[allow(clippy::cast_possible_truncation)]
fn resampled_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    let scaled = (len as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate.max(1)));
    usize::try_from(scaled).unwrap_or(usize::MAX)
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
