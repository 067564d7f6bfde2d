//! Per-symbol bit decision from a pair of Goertzel energies.

use log::trace;

use crate::config::{DemodDecision, DspConfig};
use crate::error::Result;
use crate::frequency::FrequencySelector;
use crate::goertzel;
use crate::window::Window;

/// Past symbols kept per tone pair for the historical comparison.
pub const HISTORY_LEN: usize = 8;

/// Energy ratio beyond which the amplitude decision is trusted outright.
pub const OVERWHELMING_ENERGY_RATIO: f32 = 6.25;

/// Result of demodulating one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Demodulation {
    pub bit: bool,
    pub energy_f0: f32,
    pub energy_f1: f32,
    pub f0: u32,
    pub f1: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct HistoryEntry {
    energy_f0: f32,
    energy_f1: f32,
}

pub struct Demodulator {
    decision: DemodDecision,
    threshold: f32,
    sample_rate: u32,
    window: Window,
    selector: FrequencySelector,
    history: Vec<[HistoryEntry; HISTORY_LEN]>,
}

impl Demodulator {
    pub fn new(cfg: &DspConfig) -> Result<Self> {
        let selector = FrequencySelector::new(cfg)?;
        Ok(Self {
            decision: cfg.demod_decision,
            threshold: cfg.historical_threshold,
            sample_rate: cfg.sample_rate,
            window: Window::new(cfg.window),
            history: vec![[HistoryEntry::default(); HISTORY_LEN]; selector.num_tones()],
            selector,
        })
    }

    /// Demodulate one symbol period of samples carrying bit `bit_index`.
    pub fn demodulate(&mut self, samples: &[f32], bit_index: usize) -> Demodulation {
        let (f0, f1) = self.selector.tone_pair(bit_index);
        let (energy_f0, energy_f1) = goertzel::tone_pair(samples, f0, f1, self.sample_rate, &self.window);
        let bit = self.decide(energy_f0, energy_f1, bit_index);
        trace!("bit {bit_index}: e0 {energy_f0:.3} e1 {energy_f1:.3} -> {}", u8::from(bit));
        Demodulation {
            bit,
            energy_f0,
            energy_f1,
            f0,
            f1,
        }
    }

    /// Turn a pair of energies into a bit, updating the tone's history.
    pub fn decide(&mut self, energy_f0: f32, energy_f1: f32, bit_index: usize) -> bool {
        let amplitude = energy_f1 > energy_f0;
        match self.decision {
            DemodDecision::AmplitudeComparison => amplitude,
            DemodDecision::HistoricalComparison => {
                self.historical(amplitude, energy_f0, energy_f1, bit_index)
            }
        }
    }

    fn historical(&mut self, amplitude: bool, energy_f0: f32, energy_f1: f32, bit_index: usize) -> bool {
        let num_tones = self.history.len();
        let tone = bit_index % num_tones;
        let occurrence = bit_index / num_tones;
        let slot = occurrence % HISTORY_LEN;

        let mut bit = amplitude;
        let ratio = energy_f0 / energy_f1;
        let comparable = ratio < OVERWHELMING_ENERGY_RATIO && ratio > 1.0 / OVERWHELMING_ENERGY_RATIO;
        if occurrence >= 1 && comparable {
            let previous = self.history[tone][(slot + HISTORY_LEN - 1) % HISTORY_LEN];
            let delta_f0 = energy_f0 - previous.energy_f0;
            let delta_f1 = energy_f1 - previous.energy_f1;
            let scale = energy_f0.max(energy_f1);
            let swing = (delta_f0.abs() + delta_f1.abs()) / scale;
            if swing > self.threshold {
                if delta_f0 > 0.0 && delta_f1 <= 0.0 {
                    bit = false;
                } else if delta_f0 <= 0.0 && delta_f1 > 0.0 {
                    bit = true;
                }
            }
        }

        self.history[tone][slot] = HistoryEntry {
            energy_f0,
            energy_f1,
        };
        bit
    }

    /// Forget every stored energy.
    pub fn reset(&mut self) {
        for entries in self.history.iter_mut() {
            *entries = [HistoryEntry::default(); HISTORY_LEN];
        }
    }

    pub fn selector(&self) -> &FrequencySelector {
        &self.selector
    }
}
