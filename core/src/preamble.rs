//! Table-driven preamble codec for the custom and JANUS header layouts.
//!
//! Each protocol owns one static field table. Encode and decode both walk that
//! table, so it is the only place the header layout is written down.

use log::debug;

use crate::bits::BitBuffer;
use crate::config::{DspConfig, Protocol};
use crate::error::{ModemError, Result};
use crate::message::{DataType, Message, SmsCoding};

/// Largest cargo the 7-bit length code can describe.
pub const MAX_CARGO_BYTES: usize = 480;

const LENGTH_CLASS_SHIFT: u8 = 5;
const LENGTH_MAGNITUDE_MASK: u8 = 0x1F;
const LENGTH_BASE_BYTES: usize = 32;
const LENGTH_MAX_CLASS: u32 = 3;

pub const JANUS_VERSION: u32 = 3;
/// Class user id assigned to underwater acoustic modems.
pub const JANUS_CLASS_USER_ID: u32 = 11;
/// Application type of the 011/01 SMS application.
pub const JANUS_APP_TYPE_SMS: u32 = 1;

/// Message fields a preamble entry can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldId {
    ModemId,
    MessageType,
    CargoLength,
    Stationary,
    Mobility,
    Schedule,
    TxRxCapable,
    Forwarding,
    SenderId,
    DestinationId,
    Coding,
    Encryption,
    Repeat,
    ReservationIndex,
}

/// Where the bits of a preamble entry come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    Message(FieldId),
    Fixed(u32),
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreambleFieldDescriptor {
    pub name: &'static str,
    pub bit_offset: usize,
    pub bit_width: usize,
    pub source: FieldSource,
}

const fn field(
    name: &'static str,
    bit_offset: usize,
    bit_width: usize,
    source: FieldSource,
) -> PreambleFieldDescriptor {
    PreambleFieldDescriptor {
        name,
        bit_offset,
        bit_width,
        source,
    }
}

pub const CUSTOM_PREAMBLE: [PreambleFieldDescriptor; 4] = [
    field("modem id", 0, 4, FieldSource::Message(FieldId::ModemId)),
    field("message type", 4, 4, FieldSource::Message(FieldId::MessageType)),
    field("cargo length", 8, 7, FieldSource::Message(FieldId::CargoLength)),
    field("stationary", 15, 1, FieldSource::Message(FieldId::Stationary)),
];

/// ANEP-87 baseline packet, class 11 / application 1. Bits 56..64 hold the
/// CRC-8 appended by the detection layer.
pub const JANUS_PREAMBLE: [PreambleFieldDescriptor; 14] = [
    field("version", 0, 4, FieldSource::Fixed(JANUS_VERSION)),
    field("mobility", 4, 1, FieldSource::Message(FieldId::Mobility)),
    field("schedule", 5, 1, FieldSource::Message(FieldId::Schedule)),
    field("tx/rx capable", 6, 1, FieldSource::Message(FieldId::TxRxCapable)),
    field("forwarding", 7, 1, FieldSource::Message(FieldId::Forwarding)),
    field("class user id", 8, 8, FieldSource::Fixed(JANUS_CLASS_USER_ID)),
    field("application type", 16, 6, FieldSource::Fixed(JANUS_APP_TYPE_SMS)),
    field("sender id", 22, 8, FieldSource::Message(FieldId::SenderId)),
    field("destination id", 30, 8, FieldSource::Message(FieldId::DestinationId)),
    field("coding", 38, 2, FieldSource::Message(FieldId::Coding)),
    field("encryption", 40, 3, FieldSource::Message(FieldId::Encryption)),
    field("reserved", 43, 5, FieldSource::Reserved),
    field("repeat", 48, 1, FieldSource::Message(FieldId::Repeat)),
    field("reservation", 49, 7, FieldSource::Message(FieldId::ReservationIndex)),
];

pub fn field_table(protocol: Protocol) -> &'static [PreambleFieldDescriptor] {
    match protocol {
        Protocol::Custom => &CUSTOM_PREAMBLE,
        Protocol::Janus => &JANUS_PREAMBLE,
    }
}

/// Bits covered by the field table.
pub fn field_bits(protocol: Protocol) -> usize {
    field_table(protocol)
        .iter()
        .map(|f| f.bit_offset + f.bit_width)
        .max()
        .unwrap_or(0)
}

/// Raw preamble length: field bits plus the preamble validation code.
pub fn raw_length(cfg: &DspConfig) -> usize {
    field_bits(cfg.protocol) + cfg.effective_preamble_validation().width()
}

/// Smallest length index whose cargo size holds `num_bytes` bytes.
///
/// The index is `(e << 5) | x`: class `e` counts in steps of `2^e` bytes on
/// top of the bytes covered by the lower classes (32, 64, 128).
pub fn minimum_length_index(num_bytes: usize) -> Result<u8> {
    if num_bytes > MAX_CARGO_BYTES {
        return Err(ModemError::InvalidLength(num_bytes));
    }
    let mut class = 0u32;
    let mut offset = LENGTH_BASE_BYTES;
    while offset < num_bytes && class < LENGTH_MAX_CLASS {
        class += 1;
        offset += LENGTH_BASE_BYTES << class;
    }
    offset -= LENGTH_BASE_BYTES << class;
    let magnitude = (num_bytes.saturating_sub(offset)).div_ceil(1 << class).saturating_sub(1);
    Ok(((class as u8) << LENGTH_CLASS_SHIFT) | magnitude as u8)
}

/// Cargo size in bytes described by a length index.
pub fn cargo_bytes(index: u8) -> usize {
    let class = u32::from((index >> LENGTH_CLASS_SHIFT) & 0x03);
    let magnitude = usize::from(index & LENGTH_MAGNITUDE_MASK);
    let offset: usize = (0..class).map(|i| LENGTH_BASE_BYTES << i).sum();
    (1usize << class) * (magnitude + 1) + offset
}

/// Reservation time in seconds that covers a cargo of `index` at `baud`.
pub fn reservation_seconds(index: u8, baud_rate: f32) -> f32 {
    (cargo_bytes(index) * 8) as f32 / baud_rate
}

/// Length index for a reservation time, converted back through the baud rate.
pub fn reservation_index(seconds: f32, baud_rate: f32) -> Result<u8> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(ModemError::InvalidField("reservation"));
    }
    let bytes = (seconds * baud_rate / 8.0).round() as usize;
    minimum_length_index(bytes.max(1))
}

fn flag(value: Option<bool>) -> Option<u32> {
    value.map(u32::from)
}

impl FieldId {
    fn read(self, msg: &Message, cfg: &DspConfig) -> Result<Option<u32>> {
        let fields = &msg.preamble;
        Ok(match self {
            FieldId::ModemId => fields.modem_id.map(u32::from),
            FieldId::MessageType => Some(u32::from(msg.data_type.code())),
            FieldId::CargoLength => fields.cargo_length.map(u32::from),
            FieldId::Stationary => flag(fields.stationary),
            FieldId::Mobility => flag(fields.mobility),
            FieldId::Schedule => flag(fields.schedule),
            FieldId::TxRxCapable => flag(fields.tx_rx_capable),
            FieldId::Forwarding => flag(fields.forwarding),
            FieldId::SenderId => fields.sender_id.map(u32::from),
            FieldId::DestinationId => fields.destination_id.map(u32::from),
            FieldId::Coding => fields.coding.map(|c| u32::from(c.code())),
            FieldId::Encryption => fields.encryption.map(u32::from),
            FieldId::Repeat => flag(fields.repeat),
            FieldId::ReservationIndex => match fields.reservation_time {
                Some(seconds) => Some(u32::from(reservation_index(seconds, cfg.baud_rate)?)),
                None => None,
            },
        })
    }

    fn write(self, msg: &mut Message, value: u32, cfg: &DspConfig) {
        let fields = &mut msg.preamble;
        let byte = value as u8;
        let bit = value != 0;
        match self {
            FieldId::ModemId => {
                fields.modem_id = Some(byte);
                msg.sender_id = byte;
            }
            FieldId::MessageType => msg.data_type = DataType::from_code(byte),
            FieldId::CargoLength => fields.cargo_length = Some(byte),
            FieldId::Stationary => fields.stationary = Some(bit),
            FieldId::Mobility => fields.mobility = Some(bit),
            FieldId::Schedule => fields.schedule = Some(bit),
            FieldId::TxRxCapable => fields.tx_rx_capable = Some(bit),
            FieldId::Forwarding => fields.forwarding = Some(bit),
            FieldId::SenderId => {
                fields.sender_id = Some(byte);
                msg.sender_id = byte;
            }
            FieldId::DestinationId => fields.destination_id = Some(byte),
            // Two bits always map onto one of the four codings.
            FieldId::Coding => fields.coding = SmsCoding::from_code(byte),
            FieldId::Encryption => fields.encryption = Some(byte),
            FieldId::Repeat => fields.repeat = Some(bit),
            FieldId::ReservationIndex => {
                fields.reservation_time = Some(reservation_seconds(byte, cfg.baud_rate));
            }
        }
    }
}

/// Write the preamble fields of `msg` into `buffer` starting at `start`.
///
/// All values are gathered before anything is written, so a missing or
/// oversized field leaves the buffer untouched.
pub fn encode(buffer: &mut BitBuffer, start: usize, msg: &Message, cfg: &DspConfig) -> Result<()> {
    let table = field_table(cfg.protocol);
    let mut values = Vec::with_capacity(table.len());
    for descriptor in table {
        let value = match descriptor.source {
            FieldSource::Message(id) => id
                .read(msg, cfg)?
                .ok_or(ModemError::InvalidField(descriptor.name))?,
            FieldSource::Fixed(value) => value,
            FieldSource::Reserved => 0,
        };
        if u64::from(value) >= 1u64 << descriptor.bit_width {
            return Err(ModemError::FieldOverflow {
                field: descriptor.name,
                value,
                width: descriptor.bit_width,
            });
        }
        values.push(value);
    }
    for (descriptor, value) in table.iter().zip(values) {
        buffer.write_bits(start + descriptor.bit_offset, value, descriptor.bit_width)?;
    }
    Ok(())
}

/// Read the preamble at `start` back into `msg`.
///
/// Returns `true` when a fixed field held an unexpected value. Decoding
/// continues past such a mismatch so the remaining fields are still filled in.
pub fn decode(buffer: &BitBuffer, start: usize, msg: &mut Message, cfg: &DspConfig) -> Result<bool> {
    let mut mismatch = false;
    for descriptor in field_table(cfg.protocol) {
        let value = buffer.read_bits(start + descriptor.bit_offset, descriptor.bit_width)?;
        match descriptor.source {
            FieldSource::Message(id) => id.write(msg, value, cfg),
            FieldSource::Fixed(expected) => {
                if value != expected {
                    debug!(
                        "preamble field '{}' is {value}, expected {expected}",
                        descriptor.name
                    );
                    mismatch = true;
                }
            }
            FieldSource::Reserved => {}
        }
    }
    Ok(mismatch)
}
