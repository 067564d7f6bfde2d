//! Goertzel filter bank.
//!
//! Several filters share one pass over the samples: each window weight is
//! looked up once and applied to every filter of the batch.

use std::f32::consts::PI;

use crate::error::{ModemError, Result};
use crate::window::Window;

/// Widest batch run in a single pass.
pub const MAX_BATCH: usize = 6;

/// `2 cos(2 pi f / fs)` for one Goertzel filter.
pub fn coefficient(freq_hz: f32, sample_rate: u32) -> f32 {
    2.0 * (2.0 * PI * freq_hz / sample_rate as f32).cos()
}

/// Run `N` filters over `samples` in one pass.
///
/// Energies are `q1^2 + q2^2 - coeff * q1 * q2`, scaled by the window's
/// normalization over the sample count.
pub fn batch<const N: usize>(samples: &[f32], coeffs: &[f32; N], window: &Window) -> [f32; N] {
    let len = samples.len();
    let mut q1 = [0.0f32; N];
    let mut q2 = [0.0f32; N];
    for (i, &sample) in samples.iter().enumerate() {
        let x = sample * window.weight(i, len);
        for k in 0..N {
            let q0 = coeffs[k] * q1[k] - q2[k] + x;
            q2[k] = q1[k];
            q1[k] = q0;
        }
    }
    if len == 0 {
        return [0.0; N];
    }
    let scale = window.normalization() / len as f32;
    let mut energies = [0.0f32; N];
    for k in 0..N {
        energies[k] = (q1[k] * q1[k] + q2[k] * q2[k] - coeffs[k] * q1[k] * q2[k]) * scale;
    }
    energies
}

/// One filter of a segmented pass: `len` samples from `start` at `freq_hz`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: usize,
    pub freq_hz: f32,
}

fn batch_segments<const N: usize>(
    samples: &[f32],
    segments: &[Segment; N],
    len: usize,
    sample_rate: u32,
    window: &Window,
) -> [f32; N] {
    let coeffs: [f32; N] = std::array::from_fn(|k| coefficient(segments[k].freq_hz, sample_rate));
    let mut q1 = [0.0f32; N];
    let mut q2 = [0.0f32; N];
    for i in 0..len {
        let weight = window.weight(i, len);
        for k in 0..N {
            let q0 = coeffs[k] * q1[k] - q2[k] + samples[segments[k].start + i] * weight;
            q2[k] = q1[k];
            q1[k] = q0;
        }
    }
    let scale = window.normalization() / len as f32;
    std::array::from_fn(|k| (q1[k] * q1[k] + q2[k] * q2[k] - coeffs[k] * q1[k] * q2[k]) * scale)
}

/// Energies of filters that each read their own `len`-sample window of
/// `samples`, batched six, two and one at a time over a shared loop.
pub fn segment_energies(
    samples: &[f32],
    segments: &[Segment],
    len: usize,
    sample_rate: u32,
    window: &Window,
) -> Result<Vec<f32>> {
    if len == 0 || segments.iter().any(|s| s.start + len > samples.len()) {
        return Err(ModemError::InsufficientData);
    }
    let mut out = Vec::with_capacity(segments.len());
    let mut rest = segments;
    while !rest.is_empty() {
        if let Some((head, tail)) = rest.split_first_chunk::<MAX_BATCH>() {
            out.extend(batch_segments(samples, head, len, sample_rate, window));
            rest = tail;
        } else if let Some((head, tail)) = rest.split_first_chunk::<2>() {
            out.extend(batch_segments(samples, head, len, sample_rate, window));
            rest = tail;
        } else if let Some((head, tail)) = rest.split_first_chunk::<1>() {
            out.extend(batch_segments(samples, head, len, sample_rate, window));
            rest = tail;
        }
    }
    Ok(out)
}

/// Energies at a tone pair, in `(f0, f1)` order.
pub fn tone_pair(samples: &[f32], f0: u32, f1: u32, sample_rate: u32, window: &Window) -> (f32, f32) {
    let coeffs = [
        coefficient(f0 as f32, sample_rate),
        coefficient(f1 as f32, sample_rate),
    ];
    let [e0, e1] = batch(samples, &coeffs, window);
    (e0, e1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowFunction;

    const FS: u32 = 120_000;

    fn tone(freq: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * freq * n as f32 / FS as f32).sin())
            .collect()
    }

    #[test]
    fn test_tone_energy_scales_with_length() {
        // A unit sine on a bin centre gives len / 4.
        let window = Window::new(WindowFunction::Rectangular);
        let samples = tone(30_000.0, 1200, 1.0);
        let (e0, e1) = tone_pair(&samples, 30_000, 33_000, FS, &window);
        assert!((e0 - 300.0).abs() < 3.0, "e0 = {e0}");
        assert!(e1 < 1.0, "e1 = {e1}");
    }

    #[test]
    fn test_batches_match_single_filters() {
        let window = Window::new(WindowFunction::Hann);
        let samples: Vec<f32> = tone(31_000.0, 1200, 0.7)
            .iter()
            .zip(tone(32_300.0, 1200, 0.3))
            .map(|(a, b)| a + b)
            .collect();
        let freqs: Vec<f32> = (0..9).map(|i| 30_500.0 + 250.0 * i as f32).collect();
        let segments: Vec<Segment> = freqs
            .iter()
            .map(|&freq_hz| Segment { start: 0, freq_hz })
            .collect();
        let batched = segment_energies(&samples, &segments, samples.len(), FS, &window).unwrap();
        assert_eq!(batched.len(), 9);
        for (freq, energy) in freqs.iter().zip(&batched) {
            let [single] = batch(&samples, &[coefficient(*freq, FS)], &window);
            assert!((single - energy).abs() <= 1e-3 * single.max(1.0));
        }
    }

    #[test]
    fn test_segments_read_their_own_windows() {
        let window = Window::new(WindowFunction::Rectangular);
        let mut samples = tone(30_000.0, 600, 1.0);
        samples.extend(tone(33_000.0, 600, 1.0));
        let segments: Vec<Segment> = [(0, 30_000.0), (600, 33_000.0), (0, 33_000.0)]
            .iter()
            .map(|&(start, freq_hz)| Segment { start, freq_hz })
            .collect();
        let energies = segment_energies(&samples, &segments, 600, FS, &window).unwrap();
        assert!((energies[0] - 150.0).abs() < 2.0);
        assert!((energies[1] - 150.0).abs() < 2.0);
        assert!(energies[2] < 1.0);
    }

    #[test]
    fn test_segment_past_end_is_rejected() {
        let window = Window::new(WindowFunction::Rectangular);
        let segments = [Segment {
            start: 10,
            freq_hz: 30_000.0,
        }];
        assert_eq!(
            segment_energies(&[0.0; 32], &segments, 30, FS, &window),
            Err(ModemError::InsufficientData)
        );
    }

    #[test]
    fn test_empty_input() {
        let window = Window::new(WindowFunction::Rectangular);
        assert_eq!(tone_pair(&[], 30_000, 31_000, FS, &window), (0.0, 0.0));
        assert!(segment_energies(&[1.0; 8], &[], 8, FS, &window).unwrap().is_empty());
    }
}
