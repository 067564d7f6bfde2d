//! Rectangular, Hann and Hamming windows served from a fixed lookup table.

use std::f32::consts::PI;

use crate::config::WindowFunction;

/// Entries in the window lookup table. A window of any length is sampled
/// from it at `i * WINDOW_TABLE_LEN / len`.
pub const WINDOW_TABLE_LEN: usize = 512;

/// Hamming's `a0`, kept as the exact ratio.
const HAMMING_A0: f32 = 25.0 / 46.0;

/// Analysis window applied before Goertzel filtering.
#[derive(Debug, Clone)]
pub struct Window {
    kind: WindowFunction,
    table: Vec<f32>,
}

impl Window {
    pub fn new(kind: WindowFunction) -> Self {
        let last = (WINDOW_TABLE_LEN - 1) as f32;
        let table = (0..WINDOW_TABLE_LEN)
            .map(|i| {
                let x = i as f32 / last;
                match kind {
                    WindowFunction::Rectangular => 1.0,
                    WindowFunction::Hann => (PI * x).sin().powi(2),
                    WindowFunction::Hamming => HAMMING_A0 - (1.0 - HAMMING_A0) * (2.0 * PI * x).cos(),
                }
            })
            .collect();
        Self { kind, table }
    }

    pub fn kind(&self) -> WindowFunction {
        self.kind
    }

    /// Weight of sample `index` in a window of `len` samples.
    pub fn weight(&self, index: usize, len: usize) -> f32 {
        if len == 0 {
            return 0.0;
        }
        self.table[(index * WINDOW_TABLE_LEN / len).min(WINDOW_TABLE_LEN - 1)]
    }

    /// Gain restoring the power a tapered window removes.
    pub fn normalization(&self) -> f32 {
        match self.kind {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Hann => 1.63,
            WindowFunction::Hamming => 1.59,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangular_is_flat() {
        let window = Window::new(WindowFunction::Rectangular);
        assert!((0..100).all(|i| window.weight(i, 100) == 1.0));
        assert_eq!(window.normalization(), 1.0);
    }

    #[test]
    fn test_hann_shape() {
        let window = Window::new(WindowFunction::Hann);
        assert!(window.weight(0, 1200).abs() < 1e-6);
        assert!((window.weight(600, 1200) - 1.0).abs() < 1e-3);
        assert!(window.weight(1199, 1200) < 1e-3);
    }

    #[test]
    fn test_hamming_endpoints() {
        let window = Window::new(WindowFunction::Hamming);
        let edge = 2.0 * HAMMING_A0 - 1.0;
        assert!((window.weight(0, 64) - edge).abs() < 1e-6);
        assert!((window.weight(32, 64) - 1.0).abs() < 1e-3);
    }
}
