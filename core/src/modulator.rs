//! Waveform steps for the transducer driver.
//!
//! A transmission is rendered as a list of constant-tone steps: the sync
//! chips first, then one step per coded bit. The list is published into a
//! snapshot shared with the stepper that feeds the waveform generator.

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::config::DspConfig;
use crate::error::{ModemError, Result};
use crate::frequency::FrequencySelector;
use crate::packet::BitMessage;
use crate::sync;

pub const DEFAULT_OUTPUT_AMPLITUDE: f32 = 0.1;
pub const MIN_OUTPUT_AMPLITUDE: f32 = 0.02;
pub const MAX_OUTPUT_AMPLITUDE: f32 = 0.5;

/// One constant tone held for `duration_us`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WaveformStep {
    pub freq_hz: u32,
    pub relative_amplitude: f32,
    pub duration_us: u32,
}

pub struct Modulator {
    selector: FrequencySelector,
    chips: Vec<u32>,
    amplitude: f32,
    duration_us: u32,
}

impl Modulator {
    pub fn new(cfg: &DspConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            selector: FrequencySelector::new(cfg)?,
            chips: sync::chip_frequencies(cfg)?,
            amplitude: DEFAULT_OUTPUT_AMPLITUDE,
            duration_us: cfg.symbol_duration_us(),
        })
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Result<Self> {
        if !(MIN_OUTPUT_AMPLITUDE..=MAX_OUTPUT_AMPLITUDE).contains(&amplitude) {
            return Err(ModemError::InvalidConfig(format!(
                "output amplitude {amplitude} outside {MIN_OUTPUT_AMPLITUDE}..={MAX_OUTPUT_AMPLITUDE}"
            )));
        }
        self.amplitude = amplitude;
        Ok(self)
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    /// Lowest and highest data tone.
    pub fn band_edges(&self) -> (u32, u32) {
        self.selector.band_edges()
    }

    /// Steps for the whole transmission of `packet`.
    pub fn steps(&self, packet: &BitMessage) -> Result<Vec<WaveformStep>> {
        let bits = packet.bit_count();
        let mut steps = Vec::with_capacity(self.chips.len() + bits);
        steps.extend(self.chips.iter().map(|&freq_hz| self.step(freq_hz)));
        for index in 0..bits {
            let bit = packet.get_bit(index)?;
            steps.push(self.step(self.selector.frequency(bit, index)));
        }
        debug!(
            "{} waveform steps ({} sync), {} us each",
            steps.len(),
            self.chips.len(),
            self.duration_us
        );
        Ok(steps)
    }

    fn step(&self, freq_hz: u32) -> WaveformStep {
        WaveformStep {
            freq_hz,
            relative_amplitude: self.amplitude,
            duration_us: self.duration_us,
        }
    }
}

/// Transmission in flight, shared with the waveform stepper.
#[derive(Debug, Clone, Default)]
pub struct TransmitSnapshot {
    config: Option<DspConfig>,
    steps: Vec<WaveformStep>,
    next: usize,
}

impl TransmitSnapshot {
    pub fn config(&self) -> Option<&DspConfig> {
        self.config.as_ref()
    }

    pub fn remaining(&self) -> usize {
        self.steps.len() - self.next
    }
}

/// Take the snapshot lock without waiting. Contention means two tasks are
/// driving the transducer at once, which is never retried.
fn lock(shared: &Mutex<TransmitSnapshot>) -> Result<MutexGuard<'_, TransmitSnapshot>> {
    shared.try_lock().map_err(|_| ModemError::LockContention)
}

/// Replace the snapshot contents with a new transmission.
pub fn publish(shared: &Mutex<TransmitSnapshot>, cfg: &DspConfig, steps: Vec<WaveformStep>) -> Result<()> {
    let mut snapshot = lock(shared)?;
    snapshot.config = Some(cfg.clone());
    snapshot.steps = steps;
    snapshot.next = 0;
    Ok(())
}

/// Consumer side of the transmit snapshot, run from the waveform generator.
#[derive(Debug, Clone)]
pub struct WaveformStepper {
    shared: Arc<Mutex<TransmitSnapshot>>,
}

impl WaveformStepper {
    pub fn new(shared: Arc<Mutex<TransmitSnapshot>>) -> Self {
        Self { shared }
    }

    /// Next step to play, `None` once the transmission is over.
    pub fn next_step(&self) -> Result<Option<WaveformStep>> {
        let mut snapshot = lock(&self.shared)?;
        let step = snapshot.steps.get(snapshot.next).copied();
        if step.is_some() {
            snapshot.next += 1;
        }
        Ok(step)
    }

    pub fn is_done(&self) -> Result<bool> {
        Ok(lock(&self.shared)?.remaining() == 0)
    }
}
