//! Packet assembly on transmit and incremental reassembly on receive.
//!
//! A packet is two sections, preamble then cargo. Each carries its own
//! validation code, is error-corrected on its own and interleaved on its own.
//! The raw buffer holds the sections as the codec sees them; the coded buffer
//! holds the bits that go on (or come off) the air.

use log::{debug, warn};

use crate::bits::BitBuffer;
use crate::cargo::{self, CargoLayout};
use crate::config::{CorrectionMethod, DspConfig, Protocol};
use crate::correction::CorrectionOutcome;
use crate::demodulator::Demodulation;
use crate::detection;
use crate::error::{ModemError, Result};
use crate::evaluate::{self, EvalPattern, EVAL_MESSAGE_LENGTH};
use crate::interleaver;
use crate::message::{DataType, EvalInfo, Message, MessageType};
use crate::preamble;

/// Capacity of both the raw and the coded bit buffer.
pub const PACKET_CAPACITY_BITS: usize = 8192;

/// Where one section sits in the raw and the coded buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionInfo {
    pub raw_start: usize,
    pub raw_len: usize,
    pub ecc_start: usize,
    pub ecc_len: usize,
}

/// Detected and corrected transmission errors, per section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    pub error_preamble: bool,
    pub error_message: bool,
    pub error_entire_message: bool,
    pub corrected_error_preamble: bool,
    pub corrected_error_message: bool,
}

#[derive(Debug, Clone)]
pub struct BitMessage {
    cfg: DspConfig,
    raw: BitBuffer,
    coded: BitBuffer,
    preamble: SectionInfo,
    cargo: SectionInfo,
    data_len_bits: usize,
    final_length: usize,
    eval: Option<EvalPattern>,
    message: Message,
    flags: PacketFlags,
    viterbi_metric: Option<f32>,
    preamble_received: bool,
    fully_received: bool,
    added_to_queue: bool,
}

impl BitMessage {
    fn empty(cfg: &DspConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            raw: BitBuffer::new(PACKET_CAPACITY_BITS),
            coded: BitBuffer::new(PACKET_CAPACITY_BITS),
            preamble: SectionInfo::default(),
            cargo: SectionInfo::default(),
            data_len_bits: 0,
            final_length: 0,
            eval: None,
            message: Message {
                msg_type: MessageType::ReceivedTransducer,
                ..Message::default()
            },
            flags: PacketFlags::default(),
            viterbi_metric: None,
            preamble_received: false,
            fully_received: false,
            added_to_queue: false,
        }
    }

    fn preamble_section(cfg: &DspConfig) -> SectionInfo {
        let raw_len = preamble::raw_length(cfg);
        SectionInfo {
            raw_start: 0,
            raw_len,
            ecc_start: 0,
            ecc_len: cfg.preamble_ecc.coded_length(raw_len),
        }
    }

    /// Place the cargo right after the preamble in both buffers.
    fn set_cargo_layout(&mut self, layout: &CargoLayout) -> Result<()> {
        self.cargo = SectionInfo {
            raw_start: self.preamble.raw_start + self.preamble.raw_len,
            raw_len: layout.raw_len,
            ecc_start: self.preamble.ecc_start + self.preamble.ecc_len,
            ecc_len: self.cfg.cargo_ecc.coded_length(layout.raw_len),
        };
        self.data_len_bits = layout.data_len_bits;
        self.final_length = self.preamble.ecc_len + self.cargo.ecc_len;
        if self.final_length > PACKET_CAPACITY_BITS {
            return Err(ModemError::BufferOverflow {
                capacity: PACKET_CAPACITY_BITS,
            });
        }
        Ok(())
    }

    /// Build the on-air bitstream for `msg`.
    ///
    /// The raw layout is preamble, cargo and both validation codes; each
    /// section is then error-corrected into the coded buffer and, when
    /// enabled, interleaved in place there.
    pub fn prepare_tx(msg: &Message, cfg: &DspConfig) -> Result<Self> {
        cfg.validate()?;
        if msg.data_type == DataType::Eval {
            return Self::prepare_eval_tx(msg, cfg);
        }

        let layout = CargoLayout::for_payload(cargo::payload_bits(msg, cfg)?, cfg)?;
        let mut header = msg.clone();
        match cfg.protocol {
            Protocol::Custom => header.preamble.cargo_length = Some(layout.length_index),
            Protocol::Janus => {
                header.preamble.reservation_time =
                    Some(preamble::reservation_seconds(layout.length_index, cfg.baud_rate));
            }
        }

        let mut packet = Self::empty(cfg);
        packet.message = header;
        packet.preamble = Self::preamble_section(cfg);
        packet.set_cargo_layout(&layout)?;
        let (pre, car) = (packet.preamble, packet.cargo);

        packet.raw.set_len(car.raw_start + car.raw_len)?;
        preamble::encode(&mut packet.raw, pre.raw_start, &packet.message, cfg)?;
        detection::add_detection(
            &mut packet.raw,
            pre.raw_start,
            pre.raw_len,
            cfg.effective_preamble_validation(),
        )?;
        cargo::encode(&mut packet.raw, car.raw_start, &layout, msg, cfg)?;
        detection::add_detection(
            &mut packet.raw,
            car.raw_start,
            car.raw_len,
            cfg.effective_cargo_validation(),
        )?;

        packet.coded.set_len(packet.final_length)?;
        packet.encode_section(pre, cfg.preamble_ecc)?;
        packet.encode_section(car, cfg.cargo_ecc)?;

        debug!(
            "packet: preamble {}/{} bits, cargo {}/{} bits (index {}), {} bits on air",
            pre.raw_len,
            pre.ecc_len,
            car.raw_len,
            car.ecc_len,
            layout.length_index,
            packet.final_length
        );
        packet.preamble_received = true;
        packet.fully_received = true;
        Ok(packet)
    }

    fn prepare_eval_tx(msg: &Message, cfg: &DspConfig) -> Result<Self> {
        let pattern = msg
            .eval_info
            .as_ref()
            .and_then(|info| EvalPattern::from_index(info.pattern))
            .ok_or(ModemError::InvalidField("eval pattern"))?;
        let mut packet = Self::eval_packet(cfg, pattern);
        pattern.fill(&mut packet.coded)?;
        packet.message = msg.clone();
        packet.fully_received = true;
        Ok(packet)
    }

    fn eval_packet(cfg: &DspConfig, pattern: EvalPattern) -> Self {
        let mut packet = Self::empty(cfg);
        packet.eval = Some(pattern);
        packet.cargo = SectionInfo {
            raw_start: 0,
            raw_len: EVAL_MESSAGE_LENGTH,
            ecc_start: 0,
            ecc_len: EVAL_MESSAGE_LENGTH,
        };
        packet.data_len_bits = EVAL_MESSAGE_LENGTH;
        packet.final_length = EVAL_MESSAGE_LENGTH;
        packet.preamble_received = true;
        packet
    }

    fn encode_section(&mut self, section: SectionInfo, method: CorrectionMethod) -> Result<()> {
        let written = method.code().encode(
            &self.raw,
            section.raw_start,
            section.raw_len,
            &mut self.coded,
            section.ecc_start,
        )?;
        if written != section.ecc_len {
            return Err(ModemError::InvalidLength(written));
        }
        if self.cfg.interleaver_enabled {
            interleaver::interleave(&mut self.coded, section.ecc_start, section.ecc_len)?;
        }
        Ok(())
    }

    /// Start an empty reception. Only the preamble size is known up front.
    pub fn prepare_rx(cfg: &DspConfig) -> Result<Self> {
        cfg.validate()?;
        let mut packet = Self::empty(cfg);
        packet.preamble = Self::preamble_section(cfg);
        packet.final_length = packet.preamble.ecc_len;
        Ok(packet)
    }

    /// Start receiving an evaluation pattern.
    pub fn prepare_eval_rx(cfg: &DspConfig, pattern: EvalPattern) -> Result<Self> {
        cfg.validate()?;
        let mut packet = Self::eval_packet(cfg, pattern);
        packet.message.data_type = DataType::Eval;
        packet.message.eval_info = Some(EvalInfo {
            len_bits: EVAL_MESSAGE_LENGTH,
            pattern: pattern.index(),
            ..EvalInfo::default()
        });
        Ok(packet)
    }

    /// Append one received bit and decode whatever section it completes.
    pub fn add_bit(&mut self, bit: bool) -> Result<()> {
        if self.fully_received {
            return Err(ModemError::BufferOverflow {
                capacity: self.final_length,
            });
        }
        self.coded.add_bit(bit)?;
        if !self.preamble_received && self.coded.len() >= self.preamble.ecc_len {
            self.decode_preamble()?;
        }
        if self.preamble_received && !self.fully_received && self.coded.len() >= self.final_length {
            self.decode_cargo()?;
        }
        Ok(())
    }

    /// Append a demodulated symbol, keeping its energies when evaluating.
    pub fn add_demodulated(&mut self, symbol: &Demodulation) -> Result<()> {
        if self.eval.is_some() {
            if let Some(info) = self.message.eval_info.as_mut() {
                info.energy_f0.push(symbol.energy_f0);
                info.energy_f1.push(symbol.energy_f1);
                info.f0.push(symbol.f0);
                info.f1.push(symbol.f1);
            }
        }
        self.add_bit(symbol.bit)
    }

    fn decode_section(&mut self, section: SectionInfo, method: CorrectionMethod) -> Result<CorrectionOutcome> {
        if self.cfg.interleaver_enabled {
            interleaver::deinterleave(&mut self.coded, section.ecc_start, section.ecc_len)?;
        }
        self.raw.set_len(section.raw_start + section.raw_len)?;
        let outcome = method.code().decode(
            &self.coded,
            section.ecc_start,
            section.ecc_len,
            &mut self.raw,
            section.raw_start,
        )?;
        if let Some(metric) = outcome.normalized_metric {
            self.viterbi_metric = Some(self.viterbi_metric.map_or(metric, |m| m.max(metric)));
        }
        Ok(outcome)
    }

    fn decode_preamble(&mut self) -> Result<()> {
        let section = self.preamble;
        let outcome = self.decode_section(section, self.cfg.preamble_ecc)?;
        let invalid = detection::check_detection(
            &self.raw,
            section.raw_start,
            section.raw_len,
            self.cfg.effective_preamble_validation(),
        )?;
        let mismatch = preamble::decode(&self.raw, section.raw_start, &mut self.message, &self.cfg)?;
        self.flags.error_preamble = outcome.error || invalid || mismatch;
        self.flags.corrected_error_preamble = outcome.corrected;
        self.preamble_received = true;

        match self.cargo_layout() {
            Ok(layout) => {
                self.set_cargo_layout(&layout)?;
                debug!(
                    "preamble received: cargo index {}, {} bits expected{}",
                    layout.length_index,
                    self.final_length,
                    if self.flags.error_preamble { " (preamble error)" } else { "" }
                );
            }
            Err(err) => {
                // Nothing to size the cargo by; close the packet as damaged.
                warn!("preamble carries no usable cargo length: {err}");
                self.flags.error_preamble = true;
                self.flags.error_entire_message = true;
                self.fully_received = true;
            }
        }
        Ok(())
    }

    fn cargo_layout(&self) -> Result<CargoLayout> {
        let fields = &self.message.preamble;
        let index = match self.cfg.protocol {
            Protocol::Custom => fields.cargo_length,
            Protocol::Janus => fields
                .reservation_time
                .map(|seconds| preamble::reservation_index(seconds, self.cfg.baud_rate))
                .transpose()?,
        }
        .ok_or(ModemError::InvalidField("cargo length"))?;
        CargoLayout::from_index(index, &self.cfg)
    }

    fn decode_cargo(&mut self) -> Result<()> {
        if let Some(pattern) = self.eval {
            let ber = evaluate::bit_error_rate(pattern, &self.coded, 0)?;
            let received = Message::from_bits(self.coded.as_bytes(), EVAL_MESSAGE_LENGTH);
            self.message.data = received.data;
            self.message.length_bits = received.length_bits;
            if let Some(info) = self.message.eval_info.as_mut() {
                info.bit_error_rate = ber;
            }
            debug!("evaluation pattern {} received, BER {ber:.3}", pattern.index());
            self.fully_received = true;
            return Ok(());
        }

        let section = self.cargo;
        let outcome = self.decode_section(section, self.cfg.cargo_ecc)?;
        let invalid = detection::check_detection(
            &self.raw,
            section.raw_start,
            section.raw_len,
            self.cfg.effective_cargo_validation(),
        )?;
        self.flags.error_message = outcome.error || invalid;
        self.flags.corrected_error_message = outcome.corrected;

        if let Err(err) = cargo::decode(
            &self.raw,
            section.raw_start,
            self.data_len_bits,
            &mut self.message,
            &self.cfg,
        ) {
            debug!("cargo could not be decoded: {err}");
            self.flags.error_message = true;
        }
        self.flags.error_entire_message = self.flags.error_preamble || self.flags.error_message;
        self.fully_received = true;
        Ok(())
    }

    /// The decoded message, once every bit has arrived.
    pub fn to_message(&self) -> Option<Message> {
        if !self.fully_received {
            return None;
        }
        let mut msg = self.message.clone();
        msg.msg_type = MessageType::ReceivedTransducer;
        msg.error_detected = self.flags.error_entire_message;
        msg.corrected = self.flags.corrected_error_preamble || self.flags.corrected_error_message;
        msg.viterbi_metric = self.viterbi_metric;
        Some(msg)
    }

    pub fn config(&self) -> &DspConfig {
        &self.cfg
    }

    /// Bits on the air, in transmission order.
    pub fn coded(&self) -> &BitBuffer {
        &self.coded
    }

    pub fn get_bit(&self, pos: usize) -> Result<bool> {
        self.coded.get_bit(pos)
    }

    pub fn bit_count(&self) -> usize {
        self.coded.len()
    }

    /// Total bits the packet spans once both sections are known.
    pub fn final_length(&self) -> usize {
        self.final_length
    }

    pub fn preamble(&self) -> SectionInfo {
        self.preamble
    }

    pub fn cargo(&self) -> SectionInfo {
        self.cargo
    }

    /// Payload bits of the cargo, validation excluded.
    pub fn data_len_bits(&self) -> usize {
        self.data_len_bits
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn is_eval(&self) -> bool {
        self.eval.is_some()
    }

    pub fn preamble_received(&self) -> bool {
        self.preamble_received
    }

    pub fn fully_received(&self) -> bool {
        self.fully_received
    }

    pub fn added_to_queue(&self) -> bool {
        self.added_to_queue
    }

    pub fn mark_added_to_queue(&mut self) {
        self.added_to_queue = true;
    }
}
