//! Structured messages exchanged with the modem's queues.

use crate::evaluate::{EvalPattern, EVAL_MESSAGE_LENGTH};

/// Direction and path of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    ReceivedTransducer,
    TransmitTransducer,
    ReceivedFeedback,
    TransmitFeedback,
    Error,
}

/// Interpretation of the payload bytes. The code is carried in the custom
/// preamble's 4-bit message-type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    Integer,
    String,
    Float,
    #[default]
    Bits,
    Unknown,
    Eval,
}

impl DataType {
    pub fn code(self) -> u8 {
        match self {
            DataType::Integer => 0,
            DataType::String => 1,
            DataType::Float => 2,
            DataType::Bits => 3,
            DataType::Unknown => 4,
            DataType::Eval => 5,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => DataType::Integer,
            1 => DataType::String,
            2 => DataType::Float,
            3 => DataType::Bits,
            5 => DataType::Eval,
            _ => DataType::Unknown,
        }
    }
}

/// Character coding of a JANUS 011/01 SMS cargo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmsCoding {
    #[default]
    Ascii8,
    Ascii7,
    Ascii6,
    Utf8,
}

impl SmsCoding {
    pub fn code(self) -> u8 {
        match self {
            SmsCoding::Ascii8 => 0,
            SmsCoding::Ascii7 => 1,
            SmsCoding::Ascii6 => 2,
            SmsCoding::Utf8 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SmsCoding::Ascii8),
            1 => Some(SmsCoding::Ascii7),
            2 => Some(SmsCoding::Ascii6),
            3 => Some(SmsCoding::Utf8),
            _ => None,
        }
    }

    pub fn bits_per_char(self) -> usize {
        match self {
            SmsCoding::Ascii8 | SmsCoding::Utf8 => 8,
            SmsCoding::Ascii7 => 7,
            SmsCoding::Ascii6 => 6,
        }
    }
}

/// Header fields of both protocol variants. `None` marks a field that has not
/// been set (on transmit) or not decoded (on receive).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreambleFields {
    pub modem_id: Option<u8>,
    pub cargo_length: Option<u8>,
    pub stationary: Option<bool>,
    pub mobility: Option<bool>,
    pub schedule: Option<bool>,
    pub tx_rx_capable: Option<bool>,
    pub forwarding: Option<bool>,
    pub sender_id: Option<u8>,
    pub destination_id: Option<u8>,
    pub coding: Option<SmsCoding>,
    pub encryption: Option<u8>,
    pub repeat: Option<bool>,
    /// Channel reservation in seconds.
    pub reservation_time: Option<f32>,
}

impl PreambleFields {
    /// Custom header fields the sender fills in; the length is added when the
    /// packet is built.
    pub fn custom(modem_id: u8, stationary: bool) -> Self {
        Self {
            modem_id: Some(modem_id),
            stationary: Some(stationary),
            ..Self::default()
        }
    }

    /// JANUS SMS header with every capability flag cleared and no encryption.
    pub fn janus_sms(sender_id: u8, destination_id: u8, coding: SmsCoding) -> Self {
        Self {
            mobility: Some(false),
            schedule: Some(false),
            tx_rx_capable: Some(false),
            forwarding: Some(false),
            sender_id: Some(sender_id),
            destination_id: Some(destination_id),
            coding: Some(coding),
            encryption: Some(0),
            repeat: Some(false),
            ..Self::default()
        }
    }
}

/// Per-bit measurements collected while receiving an evaluation pattern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalInfo {
    pub len_bits: usize,
    pub pattern: u8,
    pub bit_error_rate: f32,
    pub energy_f0: Vec<f32>,
    pub energy_f1: Vec<f32>,
    pub f0: Vec<u32>,
    pub f1: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub msg_type: MessageType,
    /// Payload bytes, MSB-first.
    pub data: Vec<u8>,
    pub length_bits: usize,
    pub data_type: DataType,
    pub sender_id: u8,
    pub preamble: PreambleFields,
    pub error_detected: bool,
    /// A correction code repaired at least one bit.
    pub corrected: bool,
    pub viterbi_metric: Option<f32>,
    pub eval_info: Option<EvalInfo>,
}

impl Message {
    /// Raw bit payload of `length_bits` bits.
    pub fn from_bits(data: &[u8], length_bits: usize) -> Self {
        let mut bytes = data[..length_bits.div_ceil(8).min(data.len())].to_vec();
        if length_bits % 8 != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= 0xFF << (8 - length_bits % 8);
            }
        }
        Self {
            msg_type: MessageType::TransmitTransducer,
            length_bits: length_bits.min(data.len() * 8),
            data: bytes,
            data_type: DataType::Bits,
            ..Self::default()
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            data_type: DataType::String,
            ..Self::from_bits(text.as_bytes(), text.len() * 8)
        }
    }

    pub fn from_integer(value: i32) -> Self {
        Self {
            data_type: DataType::Integer,
            ..Self::from_bits(&value.to_be_bytes(), 32)
        }
    }

    pub fn from_float(value: f32) -> Self {
        Self {
            data_type: DataType::Float,
            ..Self::from_bits(&value.to_be_bytes(), 32)
        }
    }

    /// Evaluation transmission of `pattern`.
    pub fn evaluation(pattern: EvalPattern) -> Self {
        Self {
            data_type: DataType::Eval,
            eval_info: Some(EvalInfo {
                len_bits: EVAL_MESSAGE_LENGTH,
                pattern: pattern.index(),
                ..EvalInfo::default()
            }),
            ..Self::from_bits(&pattern.bytes(), EVAL_MESSAGE_LENGTH)
        }
    }

    pub fn with_preamble(mut self, preamble: PreambleFields) -> Self {
        self.preamble = preamble;
        self
    }

    pub fn text(&self) -> Option<String> {
        match self.data_type {
            DataType::String => Some(String::from_utf8_lossy(&self.data).into_owned()),
            _ => None,
        }
    }

    pub fn integer(&self) -> Option<i32> {
        match (self.data_type, self.data.get(..4)) {
            (DataType::Integer, Some(bytes)) => {
                Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            _ => None,
        }
    }

    pub fn float(&self) -> Option<f32> {
        match (self.data_type, self.data.get(..4)) {
            (DataType::Float, Some(bytes)) => {
                Some(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            _ => None,
        }
    }

    /// Bit `index` of the payload.
    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.length_bits {
            return None;
        }
        self.data
            .get(index / 8)
            .map(|byte| byte & (1 << (7 - index % 8)) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes() {
        for data_type in [
            DataType::Integer,
            DataType::String,
            DataType::Float,
            DataType::Bits,
            DataType::Unknown,
            DataType::Eval,
        ] {
            assert_eq!(DataType::from_code(data_type.code()), data_type);
        }
        assert_eq!(DataType::from_code(12), DataType::Unknown);
    }

    #[test]
    fn test_typed_constructors() {
        assert_eq!(Message::from_integer(-42).integer(), Some(-42));
        assert_eq!(Message::from_float(1.5).float(), Some(1.5));
        assert_eq!(Message::from_text("hi").text().as_deref(), Some("hi"));
        assert_eq!(Message::from_text("hi").integer(), None);
    }

    #[test]
    fn test_evaluation_message() {
        let msg = Message::evaluation(EvalPattern::Pairs);
        assert_eq!(msg.length_bits, EVAL_MESSAGE_LENGTH);
        assert_eq!(msg.data[0], 0xCC);
        assert_eq!(msg.eval_info.map(|info| info.pattern), Some(2));
    }

    #[test]
    fn test_from_bits_masks_partial_byte() {
        let msg = Message::from_bits(&[0xFF, 0xFF], 12);
        assert_eq!(msg.data, vec![0xFF, 0xF0]);
        assert_eq!(msg.length_bits, 12);
        assert_eq!(msg.bit(11), Some(true));
        assert_eq!(msg.bit(12), None);
    }
}
