//! Cooperative modem state machine.
//!
//! The host feeds received samples into the shared ring and calls
//! [`Modem::tick`] regularly. Each tick does as much work as the buffered
//! samples allow and never blocks. Transmissions are handed to the waveform
//! generator through a [`WaveformStepper`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::config::DspConfig;
use crate::demodulator::Demodulator;
use crate::error::{ModemError, Result};
use crate::evaluate::EvalPattern;
use crate::message::Message;
use crate::modulator::{self, Modulator, TransmitSnapshot, WaveformStepper, DEFAULT_OUTPUT_AMPLITUDE};
use crate::noise::{FixedNoise, NoiseConfig, NoiseEstimator, RollingNoiseEstimator};
use crate::packet::BitMessage;
use crate::sample_buffer::{SampleRing, SampleSource, PROCESSING_BUFFER_SIZE};
use crate::sync::{SyncConfig, SyncStatus, Synchronizer, PN_LENGTH};

/// Depth of the transmit and receive message queues.
pub const MSG_QUEUE_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemState {
    Listening,
    Processing,
    DrivingTransducer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModemOptions {
    pub noise: NoiseConfig,
    pub sync: SyncConfig,
    pub output_amplitude: f32,
    /// Use this floor instead of measuring one.
    pub fixed_noise_floor: Option<f32>,
    /// Expect evaluation transmissions of this pattern instead of packets.
    pub evaluation: Option<EvalPattern>,
}

impl Default for ModemOptions {
    fn default() -> Self {
        Self {
            noise: NoiseConfig::default(),
            sync: SyncConfig::default(),
            output_amplitude: DEFAULT_OUTPUT_AMPLITUDE,
            fixed_noise_floor: None,
            evaluation: None,
        }
    }
}

/// Receive ring size for `cfg`: room for a whole sync sequence, and never
/// less than the default processing buffer.
pub fn ring_capacity(cfg: &DspConfig) -> usize {
    (PN_LENGTH * cfg.samples_per_symbol())
        .max(PROCESSING_BUFFER_SIZE)
        .next_power_of_two()
}

pub struct Modem {
    cfg: DspConfig,
    fixed_noise_floor: Option<f32>,
    evaluation: Option<EvalPattern>,
    ring: Arc<SampleRing>,
    noise: RollingNoiseEstimator,
    sync: Synchronizer,
    demodulator: Demodulator,
    modulator: Modulator,
    packet: Option<BitMessage>,
    bit_index: usize,
    symbol: Vec<f32>,
    tx_queue: VecDeque<BitMessage>,
    rx_queue: VecDeque<Message>,
    snapshot: Arc<Mutex<TransmitSnapshot>>,
    state: ModemState,
}

impl Modem {
    pub fn new(cfg: DspConfig, options: ModemOptions) -> Result<Self> {
        cfg.validate()?;
        let modulator = Modulator::new(&cfg)?.with_amplitude(options.output_amplitude)?;
        let ring = Arc::new(SampleRing::new(ring_capacity(&cfg)));
        info!(
            "modem: {:?} {:?} at {} baud, {} samples per symbol, ring of {}",
            cfg.protocol,
            cfg.modulation,
            cfg.baud_rate,
            cfg.samples_per_symbol(),
            ring.capacity()
        );
        Ok(Self {
            noise: RollingNoiseEstimator::new(options.noise, cfg.sample_rate)?,
            sync: Synchronizer::new(&cfg, options.sync)?,
            demodulator: Demodulator::new(&cfg)?,
            modulator,
            ring,
            fixed_noise_floor: options.fixed_noise_floor,
            evaluation: options.evaluation,
            packet: None,
            bit_index: 0,
            symbol: vec![0.0; cfg.samples_per_symbol()],
            tx_queue: VecDeque::with_capacity(MSG_QUEUE_SIZE),
            rx_queue: VecDeque::with_capacity(MSG_QUEUE_SIZE),
            snapshot: Arc::new(Mutex::new(TransmitSnapshot::default())),
            state: ModemState::Listening,
            cfg,
        })
    }

    pub fn config(&self) -> &DspConfig {
        &self.cfg
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    /// Producer handle for the sample source (ADC callback, file reader).
    pub fn ring(&self) -> Arc<SampleRing> {
        Arc::clone(&self.ring)
    }

    /// Push received samples. Samples arriving while the transducer is
    /// driven are our own transmission and are dropped.
    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        if self.state == ModemState::DrivingTransducer {
            return Ok(());
        }
        self.ring.push_slice(samples)
    }

    /// Consumer handle for the waveform generator.
    pub fn stepper(&self) -> WaveformStepper {
        WaveformStepper::new(Arc::clone(&self.snapshot))
    }

    pub fn set_evaluation(&mut self, pattern: Option<EvalPattern>) {
        self.evaluation = pattern;
    }

    /// Queue a message for transmission. The packet is built here, so a
    /// message the current configuration cannot carry is refused up front.
    pub fn send(&mut self, msg: Message) -> Result<()> {
        if self.tx_queue.len() >= MSG_QUEUE_SIZE {
            return Err(ModemError::QueueFull);
        }
        let packet = BitMessage::prepare_tx(&msg, &self.cfg)?;
        self.tx_queue.push_back(packet);
        Ok(())
    }

    /// Oldest received message, if any.
    pub fn receive(&mut self) -> Option<Message> {
        self.rx_queue.pop_front()
    }

    pub fn pending_rx(&self) -> usize {
        self.rx_queue.len()
    }

    /// Packet being received, if any.
    pub fn current_packet(&self) -> Option<&BitMessage> {
        self.packet.as_ref()
    }

    /// Run one scheduling step.
    pub fn tick(&mut self) -> Result<()> {
        match self.state {
            ModemState::Listening => self.listen(),
            ModemState::Processing => self.process(),
            ModemState::DrivingTransducer => {
                if self.stepper().is_done()? {
                    debug!("transmission finished");
                    // Whatever reached the ring meanwhile is our own echo.
                    self.ring.clear();
                    self.noise.skip_to_tail(&*self.ring);
                    self.sync.reset();
                    self.state = ModemState::Listening;
                }
                Ok(())
            }
        }
    }

    /// Drop the reception in progress and go back to listening.
    pub fn abort_reception(&mut self) {
        if self.packet.take().is_some() {
            debug!("reception aborted after {} bits", self.bit_index);
        }
        self.bit_index = 0;
        self.sync.reset();
        self.demodulator.reset();
        self.noise.skip_to_tail(&*self.ring);
        if self.state == ModemState::Processing {
            self.state = ModemState::Listening;
        }
    }

    fn listen(&mut self) -> Result<()> {
        if let Some(packet) = self.tx_queue.pop_front() {
            return self.transmit(&packet);
        }

        let status = match self.fixed_noise_floor {
            Some(floor) => self.sync.poll(&*self.ring, &FixedNoise(floor)),
            None => {
                self.noise.update(&*self.ring)?;
                self.sync.poll(&*self.ring, &self.noise)
            }
        };
        match status {
            Ok(SyncStatus::Searching) => Ok(()),
            Ok(SyncStatus::Locked { start }) => {
                debug!("locked at sample {start}, floor {:.3e}", self.floor());
                self.packet = Some(match self.evaluation {
                    Some(pattern) => BitMessage::prepare_eval_rx(&self.cfg, pattern)?,
                    None => BitMessage::prepare_rx(&self.cfg)?,
                });
                self.demodulator.reset();
                self.bit_index = 0;
                self.state = ModemState::Processing;
                self.process()
            }
            Err(e) => {
                warn!("synchronization abandoned: {e}");
                self.abort_reception();
                Err(e)
            }
        }
    }

    fn floor(&self) -> f32 {
        match self.fixed_noise_floor {
            Some(floor) => floor,
            None => self.noise.get(),
        }
    }

    fn process(&mut self) -> Result<()> {
        let s = self.symbol.len();
        while self.ring.available_samples() >= s {
            let Some(packet) = self.packet.as_mut() else {
                self.state = ModemState::Listening;
                return Ok(());
            };
            self.ring.copy_window(0, &mut self.symbol)?;
            self.ring.tail_advance(s);
            let symbol = self.demodulator.demodulate(&self.symbol, self.bit_index);
            self.bit_index += 1;
            if let Err(e) = packet.add_demodulated(&symbol) {
                warn!("reception failed at bit {}: {e}", self.bit_index - 1);
                self.abort_reception();
                return Err(e);
            }
            if packet.fully_received() {
                self.finish_reception();
                break;
            }
        }
        Ok(())
    }

    fn finish_reception(&mut self) {
        if let Some(mut packet) = self.packet.take() {
            match packet.to_message() {
                Some(msg) if self.rx_queue.len() < MSG_QUEUE_SIZE => {
                    info!(
                        "received {} bits, error {}, corrected {}",
                        packet.final_length(),
                        msg.error_detected,
                        msg.corrected
                    );
                    self.rx_queue.push_back(msg);
                    packet.mark_added_to_queue();
                }
                Some(_) => warn!("receive queue full, message dropped"),
                None => warn!("received packet could not be decoded"),
            }
        }
        self.abort_reception();
    }

    fn transmit(&mut self, packet: &BitMessage) -> Result<()> {
        let steps = match self.modulator.steps(packet) {
            Ok(steps) => steps,
            Err(e) => {
                warn!("message not sent: {e}");
                return Ok(());
            }
        };
        info!("transmitting {} steps", steps.len());
        modulator::publish(&self.snapshot, &self.cfg, steps)?;
        self.state = ModemState::DrivingTransducer;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PreambleFields;

    fn message(value: i32) -> Message {
        Message::from_integer(value).with_preamble(PreambleFields::custom(1, true))
    }

    #[test]
    fn test_ring_capacity() {
        let cfg = DspConfig::default();
        assert_eq!(ring_capacity(&cfg), 65536);
        let fast = DspConfig {
            baud_rate: 1000.0,
            ..DspConfig::default()
        };
        assert_eq!(ring_capacity(&fast), PROCESSING_BUFFER_SIZE.max(32 * 120).next_power_of_two());
    }

    #[test]
    fn test_tx_queue_is_bounded() {
        let mut modem = Modem::new(DspConfig::default(), ModemOptions::default()).unwrap();
        for value in 0..MSG_QUEUE_SIZE as i32 {
            modem.send(message(value)).unwrap();
        }
        assert_eq!(modem.send(message(9)), Err(ModemError::QueueFull));
    }

    #[test]
    fn test_transmit_cycle() {
        let mut modem = Modem::new(DspConfig::default(), ModemOptions::default()).unwrap();
        let stepper = modem.stepper();
        modem.send(message(7)).unwrap();
        modem.tick().unwrap();
        assert_eq!(modem.state(), ModemState::DrivingTransducer);

        // Own transmission is not recorded.
        modem.push_samples(&[0.3; 256]).unwrap();
        assert_eq!(modem.ring().available_samples(), 0);

        modem.tick().unwrap();
        assert_eq!(modem.state(), ModemState::DrivingTransducer);
        let mut played = 0;
        while stepper.next_step().unwrap().is_some() {
            played += 1;
        }
        assert!(played > 0);
        modem.tick().unwrap();
        assert_eq!(modem.state(), ModemState::Listening);
    }

    #[test]
    fn test_unsendable_message_is_refused() {
        let mut modem = Modem::new(DspConfig::default(), ModemOptions::default()).unwrap();
        // No header fields set.
        assert!(modem.send(Message::from_integer(1)).is_err());
        // Too long for the cargo.
        assert!(modem.send(Message::from_text(&"x".repeat(600)).with_preamble(PreambleFields::custom(1, true))).is_err());
        modem.tick().unwrap();
        assert_eq!(modem.state(), ModemState::Listening);
        assert!(modem.stepper().is_done().unwrap());
    }

    #[test]
    fn test_bad_amplitude_rejected() {
        let options = ModemOptions {
            output_amplitude: 0.9,
            ..ModemOptions::default()
        };
        assert!(Modem::new(DspConfig::default(), options).is_err());
    }

    #[test]
    fn test_abort_returns_to_listening() {
        let options = ModemOptions {
            fixed_noise_floor: Some(1e-6),
            ..ModemOptions::default()
        };
        let cfg = DspConfig {
            baud_rate: 1000.0,
            ..DspConfig::default()
        };
        let mut modem = Modem::new(cfg.clone(), options).unwrap();
        // A short tone on f0 looks like the start of a message, but stops
        // well before a header could be complete.
        let fs = cfg.sample_rate as f32;
        let tone: Vec<f32> = (0..600)
            .map(|n| 0.3 * (2.0 * std::f32::consts::PI * cfg.fsk_f0 as f32 * n as f32 / fs).sin())
            .collect();
        modem.push_samples(&tone).unwrap();
        modem.tick().unwrap();
        assert_eq!(modem.state(), ModemState::Processing);
        assert!(modem.current_packet().is_some());

        modem.abort_reception();
        assert_eq!(modem.state(), ModemState::Listening);
        assert!(modem.current_packet().is_none());
        assert_eq!(modem.pending_rx(), 0);
    }
}
