// Motion feature extraction
//
// Features are computed over the acceleration magnitude series of a
// sample run: overall energy (RMS), peak magnitude, mean jerk, zero-cross
// rate of the mean-removed series, and the dominant movement frequency
// from an FFT of the same series. The heuristic model's decision rules
// are written against exactly these five numbers.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::codec::SensorSample;

/// FFT window size for cadence extraction
pub const FFT_SIZE: usize = 256;

/// How many leading channels form the acceleration vector
const ACCEL_CHANNELS: usize = 3;

/// Features extracted from one window segment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionFeatures {
    /// RMS of the acceleration magnitude
    pub rms: f32,
    /// Largest single magnitude in the segment
    pub peak: f32,
    /// Mean absolute magnitude change per second
    pub mean_jerk: f32,
    /// Zero-cross rate of the mean-removed magnitude, 0..1
    pub zcr: f32,
    /// Dominant movement frequency in Hz (0 when the segment is flat)
    pub dominant_hz: f32,
}

impl MotionFeatures {
    pub fn zeroed() -> Self {
        Self {
            rms: 0.0,
            peak: 0.0,
            mean_jerk: 0.0,
            zcr: 0.0,
            dominant_hz: 0.0,
        }
    }
}

/// FFT processor that computes magnitude spectra from motion windows
///
/// Applies a pre-computed Hann window to reduce spectral leakage, then
/// returns the magnitude spectrum for positive frequencies only.
pub struct FftProcessor {
    planner: Mutex<FftPlanner<f32>>,
    fft_size: usize,
    window: Vec<f32>,
}

impl FftProcessor {
    pub fn new(fft_size: usize) -> Self {
        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (fft_size as f32 - 1.0)).cos())
            })
            .collect();

        Self {
            planner: Mutex::new(FftPlanner::new()),
            fft_size,
            window,
        }
    }

    /// Magnitude spectrum of `series` (zero-padded to the FFT size)
    ///
    /// # Returns
    /// Spectrum of size `fft_size / 2 + 1`
    pub fn compute_magnitude_spectrum(&self, series: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = Vec::with_capacity(self.fft_size);
        for (i, &value) in series.iter().take(self.fft_size).enumerate() {
            buffer.push(Complex::new(value * self.window[i], 0.0));
        }
        buffer.resize(self.fft_size, Complex::new(0.0, 0.0));

        let fft = self
            .planner
            .lock()
            .expect("fft planner poisoned")
            .plan_fft_forward(self.fft_size);
        fft.process(&mut buffer);

        buffer
            .iter()
            .take(self.fft_size / 2 + 1)
            .map(|c| c.norm())
            .collect()
    }
}

/// Extracts `MotionFeatures` from runs of sensor samples
pub struct FeatureExtractor {
    fft: FftProcessor,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            fft: FftProcessor::new(FFT_SIZE),
        }
    }

    /// Extract features from a run of samples
    ///
    /// Fewer than two samples yields zeroed features; the classifier's
    /// minimum-window gate keeps that case out of real inference.
    pub fn extract(&self, samples: &[SensorSample]) -> MotionFeatures {
        if samples.len() < 2 {
            return MotionFeatures::zeroed();
        }

        let magnitudes = magnitude_series(samples);
        let n = magnitudes.len() as f32;

        let rms = (magnitudes.iter().map(|m| m * m).sum::<f32>() / n).sqrt();
        let peak = magnitudes.iter().cloned().fold(0.0_f32, f32::max);
        let mean = magnitudes.iter().sum::<f32>() / n;

        let sample_rate = sample_rate_hz(samples);

        let mut crossings = 0usize;
        let mut jerk_sum = 0.0_f32;
        for pair in magnitudes.windows(2) {
            jerk_sum += (pair[1] - pair[0]).abs();
            if (pair[0] - mean) * (pair[1] - mean) < 0.0 {
                crossings += 1;
            }
        }
        let zcr = crossings as f32 / (n - 1.0);
        let mean_jerk = jerk_sum / (n - 1.0) * sample_rate;

        let dominant_hz = self.dominant_frequency(&magnitudes, mean, sample_rate);

        MotionFeatures {
            rms,
            peak,
            mean_jerk,
            zcr,
            dominant_hz,
        }
    }

    /// Dominant frequency of the mean-removed magnitude series
    fn dominant_frequency(&self, magnitudes: &[f32], mean: f32, sample_rate: f32) -> f32 {
        if sample_rate <= 0.0 {
            return 0.0;
        }
        let centered: Vec<f32> = magnitudes.iter().map(|m| m - mean).collect();
        let spectrum = self.fft.compute_magnitude_spectrum(&centered);

        // Skip the DC bin; a flat series has no dominant movement
        let mut best_bin = 0usize;
        let mut best_mag = 0.0_f32;
        for (bin, &mag) in spectrum.iter().enumerate().skip(1) {
            if mag > best_mag {
                best_mag = mag;
                best_bin = bin;
            }
        }
        if best_mag <= f32::EPSILON {
            return 0.0;
        }
        best_bin as f32 * sample_rate / FFT_SIZE as f32
    }
}

/// Acceleration magnitude per sample over the leading motion channels
fn magnitude_series(samples: &[SensorSample]) -> Vec<f32> {
    samples
        .iter()
        .map(|sample| {
            sample
                .channels
                .iter()
                .take(ACCEL_CHANNELS)
                .map(|c| c * c)
                .sum::<f32>()
                .sqrt()
        })
        .collect()
}

/// Sample rate estimated from the run's timestamps
fn sample_rate_hz(samples: &[SensorSample]) -> f32 {
    let first = samples.first().map(|s| s.timestamp_us).unwrap_or(0);
    let last = samples.last().map(|s| s.timestamp_us).unwrap_or(0);
    let span_us = last.saturating_sub(first);
    if span_us == 0 {
        return 0.0;
    }
    (samples.len() as f32 - 1.0) / (span_us as f32 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;

    fn samples_from_magnitudes(values: &[f32], rate_hz: u64) -> Vec<SensorSample> {
        let step_us = 1_000_000 / rate_hz;
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                SensorSample::new(
                    DeviceId::new("D1"),
                    i as u64 * step_us,
                    i as u32 + 1,
                    // Put the whole magnitude on one axis
                    vec![value, 0.0, 0.0],
                )
            })
            .collect()
    }

    #[test]
    fn test_too_few_samples_is_zeroed() {
        let extractor = FeatureExtractor::new();
        let samples = samples_from_magnitudes(&[1.0], 50);
        assert_eq!(extractor.extract(&samples), MotionFeatures::zeroed());
    }

    #[test]
    fn test_constant_series() {
        let extractor = FeatureExtractor::new();
        let samples = samples_from_magnitudes(&[2.0; 64], 50);
        let features = extractor.extract(&samples);

        assert!((features.rms - 2.0).abs() < 1e-4);
        assert!((features.peak - 2.0).abs() < 1e-4);
        assert!(features.mean_jerk.abs() < 1e-4);
        assert_eq!(features.zcr, 0.0);
        assert_eq!(features.dominant_hz, 0.0);
    }

    #[test]
    fn test_impulse_raises_peak_and_jerk() {
        let extractor = FeatureExtractor::new();
        let mut values = vec![0.5; 64];
        values[32] = 9.0;
        let samples = samples_from_magnitudes(&values, 50);
        let features = extractor.extract(&samples);

        assert!((features.peak - 9.0).abs() < 1e-4);
        assert!(features.mean_jerk > 1.0);
    }

    #[test]
    fn test_dominant_frequency_of_sine() {
        let extractor = FeatureExtractor::new();
        let rate = 50u64;
        let freq = 4.0_f32;
        let values: Vec<f32> = (0..128)
            .map(|i| {
                2.0 + (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin()
            })
            .collect();
        let samples = samples_from_magnitudes(&values, rate);
        let features = extractor.extract(&samples);

        assert!(
            (features.dominant_hz - freq).abs() < 0.5,
            "dominant {} Hz, expected ~{} Hz",
            features.dominant_hz,
            freq
        );
        assert!(features.zcr > 0.0);
    }

    #[test]
    fn test_magnitude_uses_three_axes() {
        let samples = vec![
            SensorSample::new(DeviceId::new("D1"), 0, 1, vec![3.0, 4.0, 0.0]),
            SensorSample::new(DeviceId::new("D1"), 20_000, 2, vec![3.0, 4.0, 0.0]),
        ];
        let magnitudes = magnitude_series(&samples);
        assert!((magnitudes[0] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_sample_rate_estimate() {
        let samples = samples_from_magnitudes(&[0.0; 51], 50);
        let rate = sample_rate_hz(&samples);
        assert!((rate - 50.0).abs() < 0.5);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let extractor = FeatureExtractor::new();
        let values: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin() + 1.2).collect();
        let samples = samples_from_magnitudes(&values, 50);

        let first = extractor.extract(&samples);
        let second = extractor.extract(&samples);
        assert_eq!(first, second);
    }
}
