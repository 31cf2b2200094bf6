//! Waveform-to-log-mel frontend for VGGish.
//!
//! Reproduces the torchvggish input pipeline: mono 16 kHz waveform, 25 ms
//! Hann-windowed STFT frames with a 10 ms hop, a 64-band mel spectrogram
//! over 125–7500 Hz, log compression, and 0.96 s example windows taken with
//! 50% overlap. Output shape is `(examples, 96, 64)`.

use crate::error::{ProviderError, Result};
use ndarray::Array3;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::path::Path;

pub const SAMPLE_RATE: u32 = 16_000;
pub const WINDOW_LENGTH: usize = 400; // 25 ms at 16 kHz
pub const HOP_LENGTH: usize = 160; // 10 ms at 16 kHz
pub const FFT_LENGTH: usize = 512;
pub const NUM_MEL_BINS: usize = 64;
pub const MEL_MIN_HZ: f32 = 125.0;
pub const MEL_MAX_HZ: f32 = 7500.0;
pub const LOG_OFFSET: f32 = 0.01;
pub const EXAMPLE_WINDOW_FRAMES: usize = 96; // 0.96 s of 10 ms frames
pub const EXAMPLE_HOP_FRAMES: usize = 48; // 50% overlap between examples

/// Decode a WAV file to a mono waveform resampled to [`SAMPLE_RATE`].
pub fn load_waveform(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path).map_err(|e| {
        ProviderError::AudioError(format!("failed to open WAV '{}': {e}", path.display()))
    })?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                ProviderError::AudioError(format!(
                    "failed to read float samples from '{}': {e}",
                    path.display()
                ))
            })?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| {
                    ProviderError::AudioError(format!(
                        "failed to read PCM samples from '{}': {e}",
                        path.display()
                    ))
                })?
        }
    };

    let mono = downmix_mono(&interleaved, channels);
    Ok(resample_linear(&mono, spec.sample_rate, SAMPLE_RATE))
}

/// Compute the `(examples, 96, 64)` log-mel example tensor for one waveform.
pub fn log_mel_examples(waveform: &[f32]) -> Result<Array3<f32>> {
    let frames = stft_magnitudes(waveform);
    if frames.len() < EXAMPLE_WINDOW_FRAMES {
        return Err(ProviderError::AudioError(format!(
            "audio too short: {} spectral frames, need at least {EXAMPLE_WINDOW_FRAMES} (~0.96 s)",
            frames.len()
        )));
    }

    let filterbank = mel_filterbank();
    let log_mel: Vec<Vec<f32>> = frames
        .iter()
        .map(|magnitudes| {
            filterbank
                .iter()
                .map(|band| {
                    let energy: f32 = band
                        .iter()
                        .zip(magnitudes.iter())
                        .map(|(weight, magnitude)| weight * magnitude)
                        .sum();
                    (energy + LOG_OFFSET).ln()
                })
                .collect()
        })
        .collect();

    let num_examples = 1 + (log_mel.len() - EXAMPLE_WINDOW_FRAMES) / EXAMPLE_HOP_FRAMES;
    let mut values = Vec::with_capacity(num_examples * EXAMPLE_WINDOW_FRAMES * NUM_MEL_BINS);
    for example in 0..num_examples {
        let start = example * EXAMPLE_HOP_FRAMES;
        for frame in &log_mel[start..start + EXAMPLE_WINDOW_FRAMES] {
            values.extend_from_slice(frame);
        }
    }

    Array3::from_shape_vec((num_examples, EXAMPLE_WINDOW_FRAMES, NUM_MEL_BINS), values)
        .map_err(|e| ProviderError::AudioError(format!("example tensor shape error: {e}")))
}

fn downmix_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let position = i as f64 * ratio;
        let index = position.floor() as usize;
        let fraction = (position - index as f64) as f32;
        let current = samples[index];
        let next = samples.get(index + 1).copied().unwrap_or(current);
        out.push(current + (next - current) * fraction);
    }
    out
}

/// Magnitude spectra of Hann-windowed frames, one row per 10 ms hop.
fn stft_magnitudes(waveform: &[f32]) -> Vec<Vec<f32>> {
    if waveform.len() < WINDOW_LENGTH {
        return Vec::new();
    }
    let window = hann_window(WINDOW_LENGTH);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_LENGTH);
    let num_frames = 1 + (waveform.len() - WINDOW_LENGTH) / HOP_LENGTH;
    let spectrum_bins = FFT_LENGTH / 2 + 1;

    let mut frames = Vec::with_capacity(num_frames);
    let mut buffer = vec![Complex::new(0.0f32, 0.0f32); FFT_LENGTH];
    for frame in 0..num_frames {
        let start = frame * HOP_LENGTH;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let sample = if i < WINDOW_LENGTH {
                waveform[start + i] * window[i]
            } else {
                0.0
            };
            *slot = Complex::new(sample, 0.0);
        }
        fft.process(&mut buffer);
        frames.push(buffer[..spectrum_bins].iter().map(|bin| bin.norm()).collect());
    }
    frames
}

fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / length as f32;
            0.5 - 0.5 * phase.cos()
        })
        .collect()
}

/// Triangular mel filterbank, `NUM_MEL_BINS` rows over the FFT magnitude bins.
fn mel_filterbank() -> Vec<Vec<f32>> {
    let spectrum_bins = FFT_LENGTH / 2 + 1;
    let nyquist = SAMPLE_RATE as f32 / 2.0;
    let mel_low = hz_to_mel(MEL_MIN_HZ);
    let mel_high = hz_to_mel(MEL_MAX_HZ);

    // Band edges, evenly spaced on the mel scale.
    let edges: Vec<f32> = (0..NUM_MEL_BINS + 2)
        .map(|i| mel_low + (mel_high - mel_low) * i as f32 / (NUM_MEL_BINS + 1) as f32)
        .collect();

    let mut bank = vec![vec![0.0f32; spectrum_bins]; NUM_MEL_BINS];
    for (band, weights) in bank.iter_mut().enumerate() {
        let lower = edges[band];
        let center = edges[band + 1];
        let upper = edges[band + 2];
        for (bin, weight) in weights.iter_mut().enumerate() {
            let mel = hz_to_mel(bin as f32 * nyquist / (spectrum_bins - 1) as f32);
            *weight = if mel <= lower || mel >= upper {
                0.0
            } else if mel <= center {
                (mel - lower) / (center - lower)
            } else {
                (upper - mel) / (upper - center)
            };
        }
    }
    bank
}

fn hz_to_mel(hz: f32) -> f32 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sine_wav(path: &Path, seconds: f32, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total = (seconds * sample_rate as f32) as usize;
        for i in 0..total {
            let t = i as f32 / sample_rate as f32;
            let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin();
            writer.write_sample((sample * i16::MAX as f32 * 0.5) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn hann_window_is_symmetric_and_bounded() {
        let window = hann_window(WINDOW_LENGTH);
        assert_eq!(window.len(), WINDOW_LENGTH);
        assert!(window[0].abs() < 1e-6);
        assert!(window.iter().all(|v| (0.0..=1.0).contains(v)));
        for i in 1..WINDOW_LENGTH / 2 {
            assert!((window[i] - window[WINDOW_LENGTH - i]).abs() < 1e-4);
        }
    }

    #[test]
    fn mel_filterbank_covers_the_band() {
        let bank = mel_filterbank();
        assert_eq!(bank.len(), NUM_MEL_BINS);
        for band in &bank {
            assert_eq!(band.len(), FFT_LENGTH / 2 + 1);
            assert!(band.iter().sum::<f32>() > 0.0, "empty mel band");
        }
        // Nothing below MEL_MIN_HZ contributes.
        let first_bin_hz = SAMPLE_RATE as f32 / 2.0 / (FFT_LENGTH / 2) as f32;
        assert!(first_bin_hz < MEL_MIN_HZ);
        assert!(bank.iter().all(|band| band[0] == 0.0));
    }

    #[test]
    fn resample_doubles_length_from_8k() {
        let samples: Vec<f32> = (0..8000).map(|i| (i as f32 / 100.0).sin()).collect();
        let out = resample_linear(&samples, 8000, 16000);
        assert!((out.len() as i64 - 16000).unsigned_abs() < 4);
    }

    #[test]
    fn one_second_yields_one_example() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 1.0, SAMPLE_RATE);

        let waveform = load_waveform(&path).unwrap();
        let examples = log_mel_examples(&waveform).unwrap();
        assert_eq!(examples.dim(), (1, EXAMPLE_WINDOW_FRAMES, NUM_MEL_BINS));
    }

    #[test]
    fn two_seconds_yield_overlapping_examples() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 2.0, SAMPLE_RATE);

        let waveform = load_waveform(&path).unwrap();
        let examples = log_mel_examples(&waveform).unwrap();
        // 2 s is ~198 frames: examples start at frames 0, 48 and 96.
        assert_eq!(examples.dim().0, 3);
    }

    #[test]
    fn short_audio_is_an_explicit_error() {
        let waveform = vec![0.0f32; SAMPLE_RATE as usize / 4];
        let err = log_mel_examples(&waveform).expect_err("quarter second");
        assert!(err.to_string().contains("audio too short"));
    }

    #[test]
    fn stereo_is_downmixed() {
        let interleaved = vec![1.0, 0.0, 0.5, 0.5, 0.0, 1.0];
        let mono = downmix_mono(&interleaved, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.5]);
    }
}
