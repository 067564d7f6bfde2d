//! Message-onset synchronization.
//!
//! With PN-32 sync the transmitter sends 32 chips before the packet, each on
//! a Galois-hopped JANUS tone chosen by the chip's PN bit. The receiver
//! correlates in two stages:
//!
//! * Stage 1 slides an 8-chip window in steps of `S / stage_1_subdivide` and
//!   keeps the best scoring candidate once `safety_margin` later offsets have
//!   failed to beat it.
//! * Stage 2 sweeps `±S / stage_1_subdivide` around that candidate in steps
//!   of `S / stage_2_subdivide`, scoring the remaining 24 chips one chip
//!   period at a time as samples arrive.
//!
//! Each chip scores as its Goertzel energy over the background noise. Without
//! a sync sequence the first data symbol's tones are watched instead.

use log::{debug, warn};

use crate::config::{DspConfig, SyncMethod};
use crate::error::{ModemError, Result};
use crate::frequency::FrequencySelector;
use crate::goertzel::{self, Segment};
use crate::noise::NoiseEstimator;
use crate::sample_buffer::SampleSource;
use crate::window::Window;

/// JANUS PN-32 chip sequence, first chip in the most significant bit.
pub const JANUS_PN_32: u32 = 0b1010_1110_1100_0111_1100_1101_0010_0000;

pub const PN_LENGTH: usize = 32;
/// Chips scored by stage 1.
pub const STAGE_1_CHIPS: usize = 8;
/// Stage-1 chips that must clear the target SNR.
pub const MIN_SYMBOLS_EXCEEDING_SNR: usize = 6;
/// Stage-2 chips (of the remaining 24) that must clear the target SNR.
pub const STAGE_2_MIN_EXCEEDING: usize = 18;

/// Consecutive half-symbol hops above threshold that mark an unsynchronized
/// message start.
pub const ONSET_HITS: usize = 2;
/// Fraction of the peak energy the refined onset window must reach.
const ONSET_PEAK_FRACTION: f32 = 0.9;
const ONSET_REFINE_STEPS: usize = 16;

/// Noise floor used when the estimate is zero.
const NOISE_EPSILON: f32 = 1e-12;

/// Sync steps sent ahead of the packet.
pub fn num_steps(method: SyncMethod) -> usize {
    match method {
        SyncMethod::None => 0,
        SyncMethod::Pn32Janus => PN_LENGTH,
    }
}

/// Bit carried by sync step `step`, `None` past the end of the sequence.
pub fn step_bit(method: SyncMethod, step: usize) -> Option<bool> {
    match method {
        SyncMethod::None => None,
        SyncMethod::Pn32Janus => {
            (step < PN_LENGTH).then(|| (JANUS_PN_32 >> (PN_LENGTH - 1 - step)) & 1 == 1)
        }
    }
}

/// Frequency of every sync chip for `cfg`.
pub fn chip_frequencies(cfg: &DspConfig) -> Result<Vec<u32>> {
    let steps = num_steps(cfg.sync_method);
    if steps == 0 {
        return Ok(Vec::new());
    }
    let selector = FrequencySelector::janus_chips(cfg)?;
    (0..steps)
        .map(|step| {
            step_bit(cfg.sync_method, step)
                .map(|bit| selector.frequency(bit, step))
                .ok_or(ModemError::InvalidField("sync step"))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Energy over noise a chip must exceed to count.
    pub target_snr: f32,
    /// Per-chip ceiling for the capped SNR sum.
    pub snr_cap: f32,
    pub stage_1_subdivide: usize,
    pub stage_2_subdivide: usize,
    /// Later stage-1 offsets that must fail to beat a candidate before it is
    /// taken. At least a full chip period (`stage_1_subdivide` offsets).
    pub safety_margin: usize,
    /// Bound on pending stage-1 candidates.
    pub max_results: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_snr: 10.0,
            snr_cap: 100.0,
            stage_1_subdivide: 8,
            stage_2_subdivide: 32,
            safety_margin: 8,
            max_results: 64,
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Searching,
    /// The first data symbol begins at this free-running sample index, which
    /// is also where the tail now points.
    Locked { start: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Score {
    exceeding: usize,
    capped: f32,
    uncapped: f32,
}

impl Score {
    fn beats(&self, other: &Score) -> bool {
        self.capped > other.capped || (self.capped == other.capped && self.uncapped > other.uncapped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    start: usize,
    score: Score,
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Coarse,
    Fine {
        coarse: usize,
        /// First swept offset, free-running.
        low: usize,
        next_chip: usize,
        scores: Vec<Score>,
    },
    Onset {
        first_hit: Option<usize>,
        hits: usize,
    },
}

pub struct Synchronizer {
    method: SyncMethod,
    config: SyncConfig,
    sample_rate: u32,
    samples_per_chip: usize,
    chips: Vec<f32>,
    onset_tones: (u32, u32),
    window: Window,
    stage: Stage,
    results: Vec<Candidate>,
    best: Option<usize>,
    since_best: usize,
    scan: usize,
}

impl Synchronizer {
    pub fn new(cfg: &DspConfig, config: SyncConfig) -> Result<Self> {
        let samples_per_chip = cfg.samples_per_symbol();
        if config.stage_1_subdivide == 0
            || config.stage_2_subdivide < config.stage_1_subdivide
            || samples_per_chip < config.stage_2_subdivide
        {
            return Err(ModemError::InvalidConfig(format!(
                "sync subdivisions {}/{} do not fit {samples_per_chip} samples per chip",
                config.stage_1_subdivide, config.stage_2_subdivide
            )));
        }
        if config.safety_margin < config.stage_1_subdivide {
            return Err(ModemError::InvalidConfig(format!(
                "sync safety margin {} is shorter than one chip ({} offsets)",
                config.safety_margin, config.stage_1_subdivide
            )));
        }
        let chips = chip_frequencies(cfg)?.into_iter().map(|f| f as f32).collect();
        let onset_tones = FrequencySelector::new(cfg)?.tone_pair(0);
        let stage = initial_stage(cfg.sync_method);
        Ok(Self {
            method: cfg.sync_method,
            config,
            sample_rate: cfg.sample_rate,
            samples_per_chip,
            chips,
            onset_tones,
            window: Window::new(cfg.window),
            stage,
            results: Vec::new(),
            best: None,
            since_best: 0,
            scan: 0,
        })
    }

    pub fn method(&self) -> SyncMethod {
        self.method
    }

    /// Drop all search state and start over at stage 1.
    pub fn reset(&mut self) {
        self.stage = initial_stage(self.method);
        self.clear_candidates();
    }

    fn clear_candidates(&mut self) {
        self.results.clear();
        self.best = None;
        self.since_best = 0;
        self.scan = 0;
    }

    fn coarse_step(&self) -> usize {
        self.samples_per_chip / self.config.stage_1_subdivide
    }

    fn fine_step(&self) -> usize {
        self.samples_per_chip / self.config.stage_2_subdivide
    }

    /// Run as far as the buffered samples allow.
    ///
    /// Samples that can no longer start a message are consumed from `source`.
    /// Overflowing the candidate buffer is fatal for this attempt and leaves
    /// the synchronizer reset.
    pub fn poll(&mut self, source: &dyn SampleSource, noise: &dyn NoiseEstimator) -> Result<SyncStatus> {
        let result = match self.stage {
            Stage::Onset { .. } => self.poll_onset(source, noise),
            Stage::Coarse | Stage::Fine { .. } => self.poll_pn(source, noise),
        };
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn poll_pn(&mut self, source: &dyn SampleSource, noise: &dyn NoiseEstimator) -> Result<SyncStatus> {
        loop {
            let progressed = match self.stage {
                Stage::Coarse => self.coarse(source, noise)?,
                Stage::Fine { .. } => match self.fine(source, noise)? {
                    Some(status) => return Ok(status),
                    None => false,
                },
                Stage::Onset { .. } => return Ok(SyncStatus::Searching),
            };
            if !progressed {
                return Ok(SyncStatus::Searching);
            }
        }
    }

    fn snr(&self, energy: f32, noise: f32) -> f32 {
        energy / noise.max(NOISE_EPSILON)
    }

    fn score(&self, energies: &[f32], noise: f32) -> Score {
        energies.iter().fold(
            Score {
                exceeding: 0,
                capped: 0.0,
                uncapped: 0.0,
            },
            |mut score, &energy| {
                let snr = self.snr(energy, noise);
                if snr > self.config.target_snr {
                    score.exceeding += 1;
                }
                score.capped += snr.min(self.config.snr_cap);
                score.uncapped += snr;
                score
            },
        )
    }

    /// Stage 1. Returns `true` once a candidate was handed to stage 2.
    fn coarse(&mut self, source: &dyn SampleSource, noise: &dyn NoiseEstimator) -> Result<bool> {
        let s = self.samples_per_chip;
        let span = STAGE_1_CHIPS * s;
        if !noise.ready() {
            // Nothing is scored until the floor is known.
            let available = source.available_samples();
            if available > 0 {
                source.tail_advance(available);
            }
            self.clear_candidates();
            return Ok(false);
        }
        let step = self.coarse_step();
        let floor = noise.get();
        let mut samples = vec![0.0f32; span];
        let segments: Vec<Segment> = (0..STAGE_1_CHIPS)
            .map(|k| Segment {
                start: k * s,
                freq_hz: self.chips[k],
            })
            .collect();

        while self.scan + span <= source.available_samples() {
            source.copy_window(self.scan, &mut samples)?;
            let energies = goertzel::segment_energies(&samples, &segments, s, self.sample_rate, &self.window)?;
            let score = self.score(&energies, floor);
            let start = source.tail().wrapping_add(self.scan);

            if score.exceeding >= MIN_SYMBOLS_EXCEEDING_SNR {
                if self.results.len() >= self.config.max_results {
                    return Err(ModemError::ResourceExhausted("sync candidates"));
                }
                self.results.push(Candidate { start, score });
                let improved = match self.best {
                    Some(best) => score.beats(&self.results[best].score),
                    None => true,
                };
                if improved {
                    self.best = Some(self.results.len() - 1);
                    self.since_best = 0;
                } else {
                    self.since_best += 1;
                }
            } else if self.best.is_some() {
                self.since_best += 1;
            } else {
                source.tail_advance(step);
                continue;
            }
            self.scan += step;

            if self.since_best >= self.config.safety_margin {
                if let Some(best) = self.best.map(|i| self.results[i]) {
                    debug!(
                        "sync stage 1 candidate at {} ({} chips, capped {:.1})",
                        best.start, best.score.exceeding, best.score.capped
                    );
                    self.enter_fine(source, best.start);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn enter_fine(&mut self, source: &dyn SampleSource, coarse: usize) {
        let reach = self.coarse_step();
        let tail = source.tail();
        // Never sweep behind samples already consumed.
        let behind = coarse.wrapping_sub(tail).min(reach);
        let low = coarse.wrapping_sub(behind);
        let count = (behind + reach) / self.fine_step() + 1;
        source.set_tail(low);
        self.clear_candidates();
        self.stage = Stage::Fine {
            coarse,
            low,
            next_chip: STAGE_1_CHIPS,
            scores: vec![
                Score {
                    exceeding: 0,
                    capped: 0.0,
                    uncapped: 0.0,
                };
                count
            ],
        };
    }

    /// Stage 2, one chip period per iteration.
    fn fine(&mut self, source: &dyn SampleSource, noise: &dyn NoiseEstimator) -> Result<Option<SyncStatus>> {
        let s = self.samples_per_chip;
        let fine_step = self.fine_step();
        let floor = noise.get();
        loop {
            let Stage::Fine {
                coarse,
                low,
                next_chip,
                ref scores,
            } = self.stage
            else {
                return Ok(None);
            };
            let count = scores.len();

            if next_chip == PN_LENGTH {
                return Ok(Some(self.finish_fine(source, coarse, low)));
            }

            // Chip `next_chip` of every swept offset, relative to the tail.
            let chip_base = low.wrapping_add(next_chip * s).wrapping_sub(source.tail());
            let needed = chip_base + (count - 1) * fine_step + s;
            if needed > source.available_samples() {
                return Ok(None);
            }
            let mut samples = vec![0.0f32; needed - chip_base];
            source.copy_window(chip_base, &mut samples)?;
            let segments: Vec<Segment> = (0..count)
                .map(|i| Segment {
                    start: i * fine_step,
                    freq_hz: self.chips[next_chip],
                })
                .collect();
            let energies = goertzel::segment_energies(&samples, &segments, s, self.sample_rate, &self.window)?;
            let snrs: Vec<f32> = energies.iter().map(|&e| self.snr(e, floor)).collect();

            let (target, cap) = (self.config.target_snr, self.config.snr_cap);
            if let Stage::Fine {
                next_chip,
                scores,
                ..
            } = &mut self.stage
            {
                for (score, snr) in scores.iter_mut().zip(snrs) {
                    if snr > target {
                        score.exceeding += 1;
                    }
                    score.capped += snr.min(cap);
                    score.uncapped += snr;
                }
                *next_chip += 1;
                // Samples before the next chip of the earliest offset are done.
                source.set_tail(low.wrapping_add(*next_chip * s));
            }
        }
    }

    fn finish_fine(&mut self, source: &dyn SampleSource, coarse: usize, low: usize) -> SyncStatus {
        let fine_step = self.fine_step();
        let best = match &self.stage {
            Stage::Fine { scores, .. } => scores
                .iter()
                .enumerate()
                .filter(|(_, score)| score.exceeding >= STAGE_2_MIN_EXCEEDING)
                .fold(None::<(usize, Score)>, |best, (i, &score)| match best {
                    Some((_, current)) if !score.beats(&current) => best,
                    _ => Some((i, score)),
                }),
            _ => None,
        };
        self.reset();
        match best {
            Some((index, score)) => {
                let offset = low.wrapping_add(index * fine_step);
                let start = offset.wrapping_add(PN_LENGTH * self.samples_per_chip);
                source.set_tail(start);
                debug!(
                    "sync locked: offset {offset}, data from {start} ({} chips, capped {:.1})",
                    score.exceeding + STAGE_1_CHIPS,
                    score.capped
                );
                SyncStatus::Locked { start }
            }
            None => {
                // The sweep has already consumed the samples past the candidate.
                warn!("sync stage 2 rejected candidate at {coarse}, resuming search");
                SyncStatus::Searching
            }
        }
    }

    /// Unsynchronized start: the first symbol's tones must clear the target
    /// SNR for consecutive half-symbol hops.
    fn poll_onset(&mut self, source: &dyn SampleSource, noise: &dyn NoiseEstimator) -> Result<SyncStatus> {
        let s = self.samples_per_chip;
        let hop = (s / 2).max(1);
        if !noise.ready() {
            let available = source.available_samples();
            if available > 0 {
                source.tail_advance(available);
            }
            self.stage = Stage::Onset {
                first_hit: None,
                hits: 0,
            };
            return Ok(SyncStatus::Searching);
        }
        let floor = noise.get();
        let mut samples = vec![0.0f32; s];
        loop {
            let Stage::Onset { first_hit, hits } = self.stage else {
                return Ok(SyncStatus::Searching);
            };
            // Refinement scans a full symbol past the first hit.
            let lookahead = 2 * s;
            if source.available_samples() < lookahead {
                return Ok(SyncStatus::Searching);
            }
            source.copy_window(0, &mut samples)?;
            let energy = self.onset_energy(&samples);
            if self.snr(energy, floor) > self.config.target_snr {
                let first = first_hit.unwrap_or_else(|| source.tail());
                if hits + 1 >= ONSET_HITS {
                    source.set_tail(first);
                    let start = self.refine_onset(source)?;
                    self.stage = initial_stage(self.method);
                    debug!("message onset at {start}");
                    return Ok(SyncStatus::Locked { start });
                }
                self.stage = Stage::Onset {
                    first_hit: Some(first),
                    hits: hits + 1,
                };
            } else {
                self.stage = Stage::Onset {
                    first_hit: None,
                    hits: 0,
                };
            }
            source.tail_advance(hop);
        }
    }

    fn onset_energy(&self, samples: &[f32]) -> f32 {
        let (f0, f1) = self.onset_tones;
        let (e0, e1) = goertzel::tone_pair(samples, f0, f1, self.sample_rate, &self.window);
        e0.max(e1)
    }

    /// Move the tail from the first hit window, which may overlap the message
    /// by only a few samples, to the earliest offset within the following
    /// symbol whose energy is close to the peak.
    fn refine_onset(&self, source: &dyn SampleSource) -> Result<usize> {
        let s = self.samples_per_chip;
        let step = (s / ONSET_REFINE_STEPS).max(1);
        let mut samples = vec![0.0f32; s];
        let mut energies = Vec::with_capacity(ONSET_REFINE_STEPS + 1);
        let mut offset = 0;
        while offset <= s {
            source.copy_window(offset, &mut samples)?;
            energies.push((offset, self.onset_energy(&samples)));
            offset += step;
        }
        let peak = energies.iter().map(|&(_, e)| e).fold(0.0f32, f32::max);
        let offset = energies
            .iter()
            .find(|&&(_, e)| e >= ONSET_PEAK_FRACTION * peak)
            .map_or(0, |&(offset, _)| offset);
        source.tail_advance(offset);
        Ok(source.tail())
    }
}

fn initial_stage(method: SyncMethod) -> Stage {
    match method {
        SyncMethod::None => Stage::Onset {
            first_hit: None,
            hits: 0,
        },
        SyncMethod::Pn32Janus => Stage::Coarse,
    }
}
