//! Tone selection for FSK and frequency-hopped BFSK.
//!
//! FHBFSK lays `N` adjacent tone pairs out around the center frequency. Bit
//! `i` is sent on pair `seq(i / dwell)` where the hopper decides `seq`, and
//! the bit value picks the lower or upper tone of the pair.

use crate::config::{DspConfig, Hopper, Modulation};
use crate::error::{ModemError, Result};
use crate::interleaver;

/// `(Q, primitive root, rows)` for the tone counts the Galois hopper supports.
/// Rows run through the non-zero powers of the root, so `rows = Q - 1`.
pub const GALOIS_TABLE: [(usize, usize, usize); 10] = [
    (2, 1, 1),
    (3, 2, 2),
    (5, 2, 4),
    (7, 3, 6),
    (11, 2, 10),
    (13, 2, 12),
    (17, 3, 16),
    (19, 2, 18),
    (23, 5, 22),
    (29, 2, 28),
];

/// Tone count JANUS hops across.
pub const JANUS_NUM_TONES: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GaloisParams {
    q: usize,
    powers: [usize; 32],
    rows: usize,
}

impl GaloisParams {
    fn lookup(num_tones: usize) -> Option<Self> {
        let &(q, root, rows) = GALOIS_TABLE.iter().find(|entry| entry.0 == num_tones)?;
        let mut powers = [0usize; 32];
        let mut value = 1;
        for power in powers.iter_mut().take(rows) {
            *power = value;
            value = value * root % q;
        }
        Some(Self { q, powers, rows })
    }

    fn sequence(&self, hop: usize) -> usize {
        let column = hop % self.q;
        let row = (hop / self.q) % self.rows;
        (self.powers[row] * column + row) % self.q
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HopSequence {
    Increment,
    Galois(GaloisParams),
    Prime(usize),
}

impl HopSequence {
    fn new(hopper: Hopper, num_tones: usize) -> Result<Self> {
        match hopper {
            Hopper::Increment => Ok(HopSequence::Increment),
            Hopper::Galois => GaloisParams::lookup(num_tones)
                .map(HopSequence::Galois)
                .ok_or_else(|| {
                    ModemError::InvalidConfig(format!(
                        "Galois hopper has no sequence for {num_tones} tones"
                    ))
                }),
            // Same rule as the interleaver depth: smallest prime p with
            // p * p > N that does not divide N, hence coprime with N.
            Hopper::Prime => interleaver::depth(num_tones)
                .map(HopSequence::Prime)
                .map_err(|_| {
                    ModemError::InvalidConfig(format!("no prime step for {num_tones} tones"))
                }),
        }
    }

    fn sequence(&self, hop: usize, num_tones: usize) -> usize {
        match self {
            HopSequence::Increment => hop % num_tones,
            HopSequence::Galois(params) => params.sequence(hop),
            HopSequence::Prime(step) => (step * hop) % num_tones,
        }
    }
}

/// Maps `(bit, bit index)` onto a transmit or receive frequency for one
/// configuration snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencySelector {
    modulation: Modulation,
    fsk: [u32; 2],
    start: u32,
    separation: u32,
    num_tones: usize,
    dwell: usize,
    hopper: HopSequence,
}

impl FrequencySelector {
    pub fn new(cfg: &DspConfig) -> Result<Self> {
        let num_tones = usize::from(cfg.fhbfsk_num_tones).max(1);
        let separation = ((f32::from(cfg.fhbfsk_freq_spacing) * cfg.baud_rate).round() as u32).max(1);
        let hopper = match cfg.modulation {
            Modulation::Fsk => HopSequence::Increment,
            Modulation::Fhbfsk => HopSequence::new(cfg.hopper, num_tones)?,
        };
        let half_span = separation * (2 * num_tones as u32 - 1) / 2;
        let start = cfg.fc.saturating_sub(half_span) / separation * separation;
        Ok(Self {
            modulation: cfg.modulation,
            fsk: [cfg.fsk_f0, cfg.fsk_f1],
            start,
            separation,
            num_tones,
            dwell: usize::from(cfg.fhbfsk_dwell_time).max(1),
            hopper,
        })
    }

    /// Selector for the PN-32 synchronization chips: 13 Galois-hopped pairs
    /// around the configured center frequency, one hop per chip.
    pub fn janus_chips(cfg: &DspConfig) -> Result<Self> {
        let chips = DspConfig {
            modulation: Modulation::Fhbfsk,
            fhbfsk_num_tones: JANUS_NUM_TONES,
            fhbfsk_dwell_time: 1,
            hopper: Hopper::Galois,
            ..cfg.clone()
        };
        Self::new(&chips)
    }

    /// Hop sequence index in `[0, N)` used for `bit_index`.
    pub fn sequence(&self, bit_index: usize) -> usize {
        match self.modulation {
            Modulation::Fsk => 0,
            Modulation::Fhbfsk => self.hopper.sequence(bit_index / self.dwell, self.num_tones),
        }
    }

    pub fn frequency(&self, bit: bool, bit_index: usize) -> u32 {
        match self.modulation {
            Modulation::Fsk => self.fsk[usize::from(bit)],
            Modulation::Fhbfsk => {
                let slot = 2 * self.sequence(bit_index) as u32 + u32::from(bit);
                self.start + self.separation * slot
            }
        }
    }

    /// `(f0, f1)` the demodulator compares at `bit_index`.
    pub fn tone_pair(&self, bit_index: usize) -> (u32, u32) {
        (self.frequency(false, bit_index), self.frequency(true, bit_index))
    }

    /// Lowest and highest tone the configuration can emit.
    pub fn band_edges(&self) -> (u32, u32) {
        match self.modulation {
            Modulation::Fsk => (self.fsk[0].min(self.fsk[1]), self.fsk[0].max(self.fsk[1])),
            Modulation::Fhbfsk => (
                self.start,
                self.start + self.separation * (2 * self.num_tones as u32 - 1),
            ),
        }
    }

    /// Tone pairs the hopper cycles through (1 for FSK).
    pub fn num_tones(&self) -> usize {
        match self.modulation {
            Modulation::Fsk => 1,
            Modulation::Fhbfsk => self.num_tones,
        }
    }
}
