//! Rolling in-band background noise estimate.
//!
//! Consecutive blocks of samples are run through a short real FFT and the
//! in-band bins averaged. Blocks accumulate into entries of a fixed duration,
//! and the entries feed a running average once a warm-up has passed.

use std::sync::Arc;

use log::debug;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{ModemError, Result};
use crate::sample_buffer::SampleSource;

/// Source of the noise floor the synchronizer scores against.
pub trait NoiseEstimator {
    /// Current average in-band energy per bin.
    fn get(&self) -> f32;

    /// `true` once a full rolling average has been collected.
    fn ready(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseConfig {
    /// FFT length of one analysis block.
    pub block_len: usize,
    /// Duration covered by one history entry.
    pub entry_ms: u32,
    /// Entries in the running average; the estimate is ready once it is full.
    pub average_entries: usize,
    /// Entries discarded before averaging starts.
    pub warmup_entries: usize,
    /// First and last in-band FFT bins, inclusive.
    pub first_bin: usize,
    pub last_bin: usize,
    /// Divisor applied to the per-bin energies.
    pub bin_divisor: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            block_len: 128,
            entry_ms: 100,
            average_entries: 30,
            warmup_entries: 10,
            first_bin: 28,
            last_bin: 38,
            bin_divisor: 12.0,
        }
    }
}

pub struct RollingNoiseEstimator {
    config: NoiseConfig,
    blocks_per_entry: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    cursor: Option<usize>,
    entry_energy: f32,
    entry_blocks: usize,
    completed_entries: usize,
    average: f32,
    averaged: usize,
}

impl RollingNoiseEstimator {
    pub fn new(config: NoiseConfig, sample_rate: u32) -> Result<Self> {
        if config.block_len < 2 || config.last_bin >= config.block_len / 2 + 1 {
            return Err(ModemError::InvalidConfig(format!(
                "noise bins {}..={} do not fit a {}-point FFT",
                config.first_bin, config.last_bin, config.block_len
            )));
        }
        if config.first_bin > config.last_bin || config.average_entries == 0 {
            return Err(ModemError::InvalidConfig("empty noise average".to_string()));
        }
        let samples_per_entry = sample_rate as usize * config.entry_ms as usize / 1000;
        let blocks_per_entry = (samples_per_entry / config.block_len).max(1);
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(config.block_len);
        Ok(Self {
            input: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            fft,
            blocks_per_entry,
            config,
            cursor: None,
            entry_energy: 0.0,
            entry_blocks: 0,
            completed_entries: 0,
            average: 0.0,
            averaged: 0,
        })
    }

    pub fn config(&self) -> &NoiseConfig {
        &self.config
    }

    /// Consume every complete block written to `source` since the last call.
    pub fn update(&mut self, source: &dyn SampleSource) -> Result<()> {
        let head = source.head();
        let mut cursor = self.cursor.unwrap_or_else(|| source.tail());
        let block_len = self.config.block_len;
        let mut block = vec![0.0f32; block_len];
        while head.wrapping_sub(cursor) >= block_len {
            let complete = block.iter_mut().enumerate().all(|(i, slot)| {
                source
                    .get_absolute(cursor.wrapping_add(i))
                    .map(|sample| *slot = sample)
                    .is_some()
            });
            if complete {
                self.process_block(&block)?;
                cursor = cursor.wrapping_add(block_len);
            } else {
                // Fell behind the producer; resume at the oldest unread sample.
                let resume = source.tail();
                if resume == cursor {
                    break;
                }
                cursor = resume;
            }
        }
        self.cursor = Some(cursor);
        Ok(())
    }

    /// Continue from the current tail, skipping whatever was consumed while
    /// a message was being received or sent.
    pub fn skip_to_tail(&mut self, source: &dyn SampleSource) {
        self.cursor = Some(source.tail());
    }

    /// Add one block of `block_len` samples to the current entry.
    pub fn process_block(&mut self, block: &[f32]) -> Result<()> {
        if block.len() != self.config.block_len {
            return Err(ModemError::InvalidLength(block.len()));
        }
        self.input.copy_from_slice(block);
        self.fft
            .process(&mut self.input, &mut self.spectrum)
            .map_err(|e| ModemError::FftError(format!("noise FFT failed: {e:?}")))?;

        let n = self.config.block_len as f32;
        let in_band: f32 = self.spectrum[self.config.first_bin..=self.config.last_bin]
            .iter()
            .map(|bin| bin.norm_sqr() / n / self.config.bin_divisor)
            .sum();
        self.entry_energy += in_band;
        self.entry_blocks += 1;

        if self.entry_blocks >= self.blocks_per_entry {
            self.finish_entry();
        }
        Ok(())
    }

    fn finish_entry(&mut self) {
        let warmed_up = self.completed_entries + 1 >= self.config.warmup_entries;
        if warmed_up || self.averaged != 0 {
            let energy = self.entry_energy / self.entry_blocks as f32;
            let n = self.averaged as f32;
            self.average = (self.average * n + energy) / (n + 1.0);
            let was_ready = self.ready();
            self.averaged = (self.averaged + 1).min(self.config.average_entries);
            if self.ready() && !was_ready {
                debug!("background noise ready at {:.4e}", self.average);
            }
        }
        self.completed_entries = self.completed_entries.saturating_add(1);
        self.entry_energy = 0.0;
        self.entry_blocks = 0;
    }

    pub fn reset(&mut self) {
        self.cursor = None;
        self.entry_energy = 0.0;
        self.entry_blocks = 0;
        self.completed_entries = 0;
        self.average = 0.0;
        self.averaged = 0;
    }
}

impl NoiseEstimator for RollingNoiseEstimator {
    fn get(&self) -> f32 {
        self.average
    }

    fn ready(&self) -> bool {
        self.averaged == self.config.average_entries
    }
}

/// Fixed noise floor, handy when the level is known in advance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedNoise(pub f32);

impl NoiseEstimator for FixedNoise {
    fn get(&self) -> f32 {
        self.0
    }

    fn ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_buffer::SampleRing;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn small_config() -> NoiseConfig {
        NoiseConfig {
            entry_ms: 1,
            average_entries: 4,
            warmup_entries: 2,
            ..NoiseConfig::default()
        }
    }

    #[test]
    fn test_rejects_bins_outside_fft() {
        let config = NoiseConfig {
            last_bin: 65,
            ..NoiseConfig::default()
        };
        assert!(RollingNoiseEstimator::new(config, 120_000).is_err());
    }

    #[test]
    fn test_warmup_then_ready() {
        // 120 samples per 1 ms entry round down to one 128-sample block.
        let mut estimator = RollingNoiseEstimator::new(small_config(), 120_000).unwrap();
        let block = vec![0.1f32; 128];
        // The first warm-up entry is discarded.
        estimator.process_block(&block).unwrap();
        assert_eq!(estimator.averaged, 0);
        for _ in 0..3 {
            estimator.process_block(&block).unwrap();
            assert!(!estimator.ready());
        }
        estimator.process_block(&block).unwrap();
        assert!(estimator.ready());
    }

    #[test]
    fn test_white_noise_level() {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(0.0f32, 0.5).unwrap();
        let config = NoiseConfig {
            entry_ms: 10,
            ..small_config()
        };
        let mut estimator = RollingNoiseEstimator::new(config, 120_000).unwrap();
        let samples: Vec<f32> = (0..128 * 9 * 8).map(|_| normal.sample(&mut rng)).collect();
        for block in samples.chunks(128) {
            estimator.process_block(block).unwrap();
        }
        assert!(estimator.ready());
        // 11 bins of variance 0.25 each, divided by 12.
        let expected = 0.25 * 11.0 / 12.0;
        let level = estimator.get();
        assert!((level - expected).abs() < 0.3 * expected, "level {level}");
    }

    #[test]
    fn test_update_reads_ring_blocks() {
        let ring = SampleRing::new(1024);
        let mut estimator = RollingNoiseEstimator::new(small_config(), 120_000).unwrap();
        ring.push_slice(&[0.2; 300]).unwrap();
        estimator.update(&ring).unwrap();
        assert_eq!(estimator.completed_entries, 2);
        ring.push_slice(&[0.2; 100]).unwrap();
        estimator.update(&ring).unwrap();
        assert_eq!(estimator.completed_entries, 3);
        // Reading noise never consumes samples.
        assert_eq!(ring.available_samples(), 400);
    }

    #[test]
    fn test_skip_to_tail_ignores_consumed_samples() {
        let ring = SampleRing::new(1024);
        let mut estimator = RollingNoiseEstimator::new(small_config(), 120_000).unwrap();
        ring.push_slice(&[0.2; 256]).unwrap();
        ring.tail_advance(256);
        estimator.skip_to_tail(&ring);
        estimator.update(&ring).unwrap();
        assert_eq!(estimator.completed_entries, 0);
        ring.push_slice(&[0.2; 128]).unwrap();
        estimator.update(&ring).unwrap();
        assert_eq!(estimator.completed_entries, 1);
    }

    #[test]
    fn test_reset_forgets_average() {
        let mut estimator = RollingNoiseEstimator::new(small_config(), 120_000).unwrap();
        for _ in 0..6 {
            estimator.process_block(&[0.3; 128]).unwrap();
        }
        assert!(estimator.ready());
        estimator.reset();
        assert!(!estimator.ready());
        assert_eq!(estimator.get(), 0.0);
    }
}
