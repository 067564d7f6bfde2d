//! Configuration snapshot shared by every stage of the coder pipeline.
//!
//! A [`DspConfig`] is taken once per transmission or reception and passed by
//! reference into each stage, so a whole packet is framed consistently.

use crate::error::{ModemError, Result};
use crate::frequency::FrequencySelector;

/// Default ADC/DAC sampling rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 120_000;

pub const DEFAULT_BAUD_RATE: f32 = 100.0;
pub const MIN_BAUD_RATE: f32 = 10.0;
pub const MAX_BAUD_RATE: f32 = 1000.0;

pub const DEFAULT_FSK_F0: u32 = 29_000;
pub const DEFAULT_FSK_F1: u32 = 30_000;
pub const MIN_FSK_FREQUENCY: u32 = 25_000;
pub const MAX_FSK_FREQUENCY: u32 = 38_000;

pub const DEFAULT_FC: u32 = 31_500;
pub const MIN_FC: u32 = 30_000;
pub const MAX_FC: u32 = 33_000;

pub const DEFAULT_FHBFSK_FREQ_SPACING: u8 = 1;
pub const MIN_FHBFSK_FREQ_SPACING: u8 = 1;
pub const MAX_FHBFSK_FREQ_SPACING: u8 = 10;

pub const DEFAULT_FHBFSK_NUM_TONES: u8 = 5;
pub const MIN_FHBFSK_NUM_TONES: u8 = 2;
pub const MAX_FHBFSK_NUM_TONES: u8 = 30;

pub const DEFAULT_FHBFSK_DWELL_TIME: u8 = 1;
pub const MIN_FHBFSK_DWELL_TIME: u8 = 1;
pub const MAX_FHBFSK_DWELL_TIME: u8 = 4;

pub const DEFAULT_HIST_CMP_THRESH: f32 = 0.15;
pub const MIN_HIST_CMP_THRESH: f32 = 0.0;
pub const MAX_HIST_CMP_THRESH: f32 = 10.0;

pub const MAX_MODEM_ID: u8 = 15;

/// Fewest samples a symbol may span before Goertzel bins stop resolving tones.
pub const MIN_SAMPLES_PER_SYMBOL: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Modulation {
    #[default]
    Fsk,
    Fhbfsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Hopper {
    #[default]
    Increment,
    Galois,
    Prime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DetectionMethod {
    #[default]
    None,
    Crc8,
    Crc16,
    Crc32,
    Checksum8,
    Checksum16,
    Checksum32,
}

impl DetectionMethod {
    /// Width in bits of the trailing code.
    pub fn width(self) -> usize {
        match self {
            DetectionMethod::None => 0,
            DetectionMethod::Crc8 | DetectionMethod::Checksum8 => 8,
            DetectionMethod::Crc16 | DetectionMethod::Checksum16 => 16,
            DetectionMethod::Crc32 | DetectionMethod::Checksum32 => 32,
        }
    }
}

/// Convolutional codes the correction layer knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConvolutionalCode {
    /// Rate 1/2, K = 9, generators 0x1AF / 0x11D.
    #[default]
    Janus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CorrectionMethod {
    #[default]
    None,
    Hamming,
    Convolutional(ConvolutionalCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Protocol {
    #[default]
    Custom,
    Janus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncMethod {
    #[default]
    None,
    Pn32Janus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DemodDecision {
    AmplitudeComparison,
    #[default]
    HistoricalComparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WindowFunction {
    #[default]
    Rectangular,
    Hann,
    Hamming,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DspConfig {
    pub sample_rate: u32,
    pub baud_rate: f32,
    pub modulation: Modulation,
    pub fsk_f0: u32,
    pub fsk_f1: u32,
    pub fc: u32,
    pub fhbfsk_freq_spacing: u8,
    pub fhbfsk_num_tones: u8,
    pub fhbfsk_dwell_time: u8,
    pub hopper: Hopper,
    pub preamble_validation: DetectionMethod,
    pub cargo_validation: DetectionMethod,
    pub preamble_ecc: CorrectionMethod,
    pub cargo_ecc: CorrectionMethod,
    pub interleaver_enabled: bool,
    pub protocol: Protocol,
    pub sync_method: SyncMethod,
    pub demod_decision: DemodDecision,
    pub window: WindowFunction,
    /// Normalized energy swing that lets the historical comparison override
    /// the amplitude decision.
    pub historical_threshold: f32,
}

impl DspConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject snapshots outside the modem's supported ranges.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BAUD_RATE..=MAX_BAUD_RATE).contains(&self.baud_rate) {
            return Err(ModemError::InvalidConfig(format!(
                "baud rate {} outside {MIN_BAUD_RATE}..={MAX_BAUD_RATE}",
                self.baud_rate
            )));
        }
        if self.samples_per_symbol() < MIN_SAMPLES_PER_SYMBOL {
            return Err(ModemError::InvalidConfig(format!(
                "{} samples per symbol is too short",
                self.samples_per_symbol()
            )));
        }
        match self.modulation {
            Modulation::Fsk => {
                for f in [self.fsk_f0, self.fsk_f1] {
                    if !(MIN_FSK_FREQUENCY..=MAX_FSK_FREQUENCY).contains(&f) {
                        return Err(ModemError::InvalidConfig(format!(
                            "FSK frequency {f} Hz outside {MIN_FSK_FREQUENCY}..={MAX_FSK_FREQUENCY}"
                        )));
                    }
                }
                if self.fsk_f0 == self.fsk_f1 {
                    return Err(ModemError::InvalidConfig(
                        "FSK tones must differ".to_string(),
                    ));
                }
            }
            Modulation::Fhbfsk => {
                if !(MIN_FHBFSK_NUM_TONES..=MAX_FHBFSK_NUM_TONES).contains(&self.fhbfsk_num_tones)
                {
                    return Err(ModemError::InvalidConfig(format!(
                        "tone count {} outside {MIN_FHBFSK_NUM_TONES}..={MAX_FHBFSK_NUM_TONES}",
                        self.fhbfsk_num_tones
                    )));
                }
                if !(MIN_FHBFSK_DWELL_TIME..=MAX_FHBFSK_DWELL_TIME)
                    .contains(&self.fhbfsk_dwell_time)
                {
                    return Err(ModemError::InvalidConfig(format!(
                        "dwell time {} outside {MIN_FHBFSK_DWELL_TIME}..={MAX_FHBFSK_DWELL_TIME}",
                        self.fhbfsk_dwell_time
                    )));
                }
            }
        }
        if !(MIN_FC..=MAX_FC).contains(&self.fc) {
            return Err(ModemError::InvalidConfig(format!(
                "center frequency {} Hz outside {MIN_FC}..={MAX_FC}",
                self.fc
            )));
        }
        if !(MIN_FHBFSK_FREQ_SPACING..=MAX_FHBFSK_FREQ_SPACING).contains(&self.fhbfsk_freq_spacing)
        {
            return Err(ModemError::InvalidConfig(format!(
                "tone spacing {} outside {MIN_FHBFSK_FREQ_SPACING}..={MAX_FHBFSK_FREQ_SPACING}",
                self.fhbfsk_freq_spacing
            )));
        }
        if !(MIN_HIST_CMP_THRESH..=MAX_HIST_CMP_THRESH).contains(&self.historical_threshold) {
            return Err(ModemError::InvalidConfig(format!(
                "historical threshold {} outside {MIN_HIST_CMP_THRESH}..={MAX_HIST_CMP_THRESH}",
                self.historical_threshold
            )));
        }
        let mut bands = vec![FrequencySelector::new(self)?.band_edges()];
        if self.sync_method == SyncMethod::Pn32Janus {
            bands.push(FrequencySelector::janus_chips(self)?.band_edges());
        }
        let nyquist = self.sample_rate / 2;
        for (low, high) in bands {
            if low == 0 || high >= nyquist {
                return Err(ModemError::InvalidConfig(format!(
                    "tones {low}..{high} Hz do not fit below Nyquist ({nyquist} Hz)"
                )));
            }
        }
        Ok(())
    }

    /// Samples in one symbol period, rounded down.
    pub fn samples_per_symbol(&self) -> usize {
        (self.sample_rate as f32 / self.baud_rate) as usize
    }

    /// Symbol duration in microseconds.
    pub fn symbol_duration_us(&self) -> u32 {
        (1_000_000.0 / self.baud_rate).round() as u32
    }

    /// Tone count the hopper cycles through; FSK behaves as a single pair.
    pub fn num_tones(&self) -> usize {
        match self.modulation {
            Modulation::Fsk => 1,
            Modulation::Fhbfsk => usize::from(self.fhbfsk_num_tones),
        }
    }

    /// Validation applied to the preamble. JANUS always closes its
    /// 64-bit preamble with a CRC-8.
    pub fn effective_preamble_validation(&self) -> DetectionMethod {
        match self.protocol {
            Protocol::Custom => self.preamble_validation,
            Protocol::Janus => DetectionMethod::Crc8,
        }
    }

    /// Validation applied to the cargo. JANUS cargo always carries a CRC-16.
    pub fn effective_cargo_validation(&self) -> DetectionMethod {
        match self.protocol {
            Protocol::Custom => self.cargo_validation,
            Protocol::Janus => DetectionMethod::Crc16,
        }
    }

    /// A JANUS-flavoured preset: FHBFSK on 13 Galois-hopped tone pairs, JANUS
    /// convolutional code with interleaving, and PN-32 synchronization.
    pub fn janus() -> Self {
        Self {
            modulation: Modulation::Fhbfsk,
            fhbfsk_num_tones: 13,
            hopper: Hopper::Galois,
            preamble_ecc: CorrectionMethod::Convolutional(ConvolutionalCode::Janus),
            cargo_ecc: CorrectionMethod::Convolutional(ConvolutionalCode::Janus),
            interleaver_enabled: true,
            protocol: Protocol::Janus,
            sync_method: SyncMethod::Pn32Janus,
            ..Self::default()
        }
    }
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            baud_rate: DEFAULT_BAUD_RATE,
            modulation: Modulation::Fsk,
            fsk_f0: DEFAULT_FSK_F0,
            fsk_f1: DEFAULT_FSK_F1,
            fc: DEFAULT_FC,
            fhbfsk_freq_spacing: DEFAULT_FHBFSK_FREQ_SPACING,
            fhbfsk_num_tones: DEFAULT_FHBFSK_NUM_TONES,
            fhbfsk_dwell_time: DEFAULT_FHBFSK_DWELL_TIME,
            hopper: Hopper::Increment,
            preamble_validation: DetectionMethod::None,
            cargo_validation: DetectionMethod::Crc16,
            preamble_ecc: CorrectionMethod::None,
            cargo_ecc: CorrectionMethod::None,
            interleaver_enabled: false,
            protocol: Protocol::Custom,
            sync_method: SyncMethod::None,
            demod_decision: DemodDecision::HistoricalComparison,
            window: WindowFunction::Rectangular,
            historical_threshold: DEFAULT_HIST_CMP_THRESH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DspConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.samples_per_symbol(), 1200);
        assert_eq!(config.symbol_duration_us(), 10_000);
    }

    #[test]
    fn test_janus_preset_is_valid() {
        let config = DspConfig::janus();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_preamble_validation(), DetectionMethod::Crc8);
        assert_eq!(config.effective_cargo_validation(), DetectionMethod::Crc16);
        assert_eq!(config.num_tones(), 13);
    }

    #[test]
    fn test_rejects_out_of_range_baud() {
        let config = DspConfig {
            baud_rate: 5000.0,
            ..DspConfig::default()
        };
        assert!(matches!(config.validate(), Err(ModemError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_identical_fsk_tones() {
        let config = DspConfig {
            fsk_f0: 30_000,
            fsk_f1: 30_000,
            ..DspConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_tone_count() {
        let config = DspConfig {
            modulation: Modulation::Fhbfsk,
            fhbfsk_num_tones: 31,
            ..DspConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detection_widths() {
        assert_eq!(DetectionMethod::None.width(), 0);
        assert_eq!(DetectionMethod::Checksum8.width(), 8);
        assert_eq!(DetectionMethod::Crc16.width(), 16);
        assert_eq!(DetectionMethod::Crc32.width(), 32);
    }
}
