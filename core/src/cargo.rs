//! Cargo section formats: raw custom payloads and JANUS 011/01 SMS text.
//!
//! The section is sized through the same length index the preamble carries,
//! so the receiver learns `raw_len` from the header before the cargo arrives.

use crate::bits::BitBuffer;
use crate::config::{DspConfig, Protocol};
use crate::error::{ModemError, Result};
use crate::message::{DataType, Message, SmsCoding};
use crate::preamble;

/// AIS 6-bit character set; a character's code is its index.
pub const AIS_SIX_BIT: &[u8; 64] =
    b"@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_ !\"#$%&'()*+,-./0123456789:;<=>?";

/// Sizes of one cargo section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CargoLayout {
    pub length_index: u8,
    /// Section bits including the trailing validation code.
    pub raw_len: usize,
    /// Bits left for the payload once validation is taken off.
    pub data_len_bits: usize,
}

impl CargoLayout {
    pub fn from_index(length_index: u8, cfg: &DspConfig) -> Result<Self> {
        let raw_len = preamble::cargo_bytes(length_index) * 8;
        let width = cfg.effective_cargo_validation().width();
        if raw_len < width {
            return Err(ModemError::InvalidLength(raw_len / 8));
        }
        Ok(Self {
            length_index,
            raw_len,
            data_len_bits: raw_len - width,
        })
    }

    /// Smallest layout holding `payload_bits` plus the validation code.
    pub fn for_payload(payload_bits: usize, cfg: &DspConfig) -> Result<Self> {
        let width = cfg.effective_cargo_validation().width();
        let bytes = (payload_bits + width).div_ceil(8);
        Self::from_index(preamble::minimum_length_index(bytes)?, cfg)
    }
}

/// Bits the payload of `msg` occupies once coded for `cfg.protocol`.
pub fn payload_bits(msg: &Message, cfg: &DspConfig) -> Result<usize> {
    match cfg.protocol {
        Protocol::Custom => Ok(msg.length_bits),
        Protocol::Janus => {
            let (coding, codes) = sms_codes(msg)?;
            Ok(codes.len() * coding.bits_per_char())
        }
    }
}

/// Write the payload of `msg` at `start`, zero-filling up to the layout's
/// data length. The validation code is left to the caller.
pub fn encode(
    buffer: &mut BitBuffer,
    start: usize,
    layout: &CargoLayout,
    msg: &Message,
    cfg: &DspConfig,
) -> Result<()> {
    let needed = payload_bits(msg, cfg)?;
    if needed > layout.data_len_bits {
        return Err(ModemError::InvalidLength(needed.div_ceil(8)));
    }
    let mut pos = start;
    match cfg.protocol {
        Protocol::Custom => {
            for index in 0..msg.length_bits {
                let bit = msg.bit(index).ok_or(ModemError::InsufficientData)?;
                buffer.set_bit(pos, bit)?;
                pos += 1;
            }
        }
        Protocol::Janus => {
            let (coding, codes) = sms_codes(msg)?;
            let width = coding.bits_per_char();
            for code in codes {
                buffer.write_bits(pos, u32::from(code), width)?;
                pos += width;
            }
        }
    }
    while pos < start + layout.data_len_bits {
        buffer.set_bit(pos, false)?;
        pos += 1;
    }
    Ok(())
}

/// Read `data_len_bits` of payload at `start` into `msg`.
///
/// The preamble must already have been decoded into `msg`: it supplies the
/// data type (custom) or the character coding (JANUS).
pub fn decode(
    buffer: &BitBuffer,
    start: usize,
    data_len_bits: usize,
    msg: &mut Message,
    cfg: &DspConfig,
) -> Result<()> {
    match cfg.protocol {
        Protocol::Custom => decode_custom(buffer, start, data_len_bits, msg),
        Protocol::Janus => decode_sms(buffer, start, data_len_bits, msg),
    }
}

fn decode_custom(buffer: &BitBuffer, start: usize, data_len_bits: usize, msg: &mut Message) -> Result<()> {
    let mut pos = start;
    let mut data = Vec::with_capacity(data_len_bits / 8);
    for _ in 0..data_len_bits / 8 {
        data.push(buffer.get_u8(&mut pos)?);
    }
    match msg.data_type {
        DataType::Integer | DataType::Float => data.truncate(4),
        DataType::String => {
            while data.last() == Some(&0) {
                data.pop();
            }
        }
        DataType::Bits | DataType::Unknown | DataType::Eval => {}
    }
    msg.length_bits = data.len() * 8;
    msg.data = data;
    Ok(())
}

fn decode_sms(buffer: &BitBuffer, start: usize, data_len_bits: usize, msg: &mut Message) -> Result<()> {
    check_encryption(msg.preamble.encryption)?;
    let coding = msg.preamble.coding.ok_or(ModemError::InvalidField("coding"))?;
    let width = coding.bits_per_char();

    let mut codes = Vec::with_capacity(data_len_bits / width);
    let mut pos = start;
    while pos + width <= start + data_len_bits {
        codes.push(buffer.read_bits(pos, width)? as u8);
        pos += width;
    }
    // Zero padding fills the section past the text.
    while codes.last() == Some(&0) {
        codes.pop();
    }

    msg.data = codes
        .into_iter()
        .map(|code| match coding {
            SmsCoding::Ascii6 => AIS_SIX_BIT[usize::from(code & 0x3F)],
            _ => code,
        })
        .collect();
    msg.length_bits = msg.data.len() * 8;
    msg.data_type = DataType::String;
    Ok(())
}

fn check_encryption(encryption: Option<u8>) -> Result<()> {
    match encryption {
        Some(0) => Ok(()),
        Some(other) => Err(ModemError::UnsupportedMethod(format!(
            "SMS encryption scheme {other}"
        ))),
        None => Err(ModemError::InvalidField("encryption")),
    }
}

fn coding_name(coding: SmsCoding) -> &'static str {
    match coding {
        SmsCoding::Ascii8 => "ASCII8",
        SmsCoding::Ascii7 => "ASCII7",
        SmsCoding::Ascii6 => "ASCII6",
        SmsCoding::Utf8 => "UTF-8",
    }
}

fn encode_char(byte: u8, coding: SmsCoding) -> Result<u8> {
    let code = match coding {
        SmsCoding::Ascii8 | SmsCoding::Utf8 => Some(byte),
        SmsCoding::Ascii7 => (byte < 0x80).then_some(byte),
        SmsCoding::Ascii6 => {
            let upper = byte.to_ascii_uppercase();
            AIS_SIX_BIT.iter().position(|&c| c == upper).map(|i| i as u8)
        }
    };
    code.ok_or(ModemError::Unencodable {
        byte,
        coding: coding_name(coding),
    })
}

fn sms_codes(msg: &Message) -> Result<(SmsCoding, Vec<u8>)> {
    check_encryption(msg.preamble.encryption)?;
    let coding = msg.preamble.coding.ok_or(ModemError::InvalidField("coding"))?;
    let text = msg.data.get(..msg.length_bits / 8).unwrap_or(&msg.data);
    let codes = text
        .iter()
        .map(|&byte| encode_char(byte, coding))
        .collect::<Result<Vec<u8>>>()?;
    Ok((coding, codes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionMethod;
    use crate::message::PreambleFields;

    fn sms(text: &str, coding: SmsCoding) -> Message {
        Message {
            preamble: PreambleFields {
                coding: Some(coding),
                encryption: Some(0),
                ..PreambleFields::default()
            },
            ..Message::from_text(text)
        }
    }

    fn round_trip(msg: &Message, cfg: &DspConfig) -> Message {
        let layout = CargoLayout::for_payload(payload_bits(msg, cfg).unwrap(), cfg).unwrap();
        let mut buffer = BitBuffer::new(4096);
        buffer.set_len(layout.raw_len).unwrap();
        encode(&mut buffer, 0, &layout, msg, cfg).unwrap();
        let mut decoded = Message {
            data_type: msg.data_type,
            preamble: msg.preamble.clone(),
            ..Message::default()
        };
        decode(&buffer, 0, layout.data_len_bits, &mut decoded, cfg).unwrap();
        decoded
    }

    #[test]
    fn test_layout_for_integer_with_crc16() {
        let layout = CargoLayout::for_payload(32, &DspConfig::default()).unwrap();
        assert_eq!(layout.length_index, 5);
        assert_eq!(layout.raw_len, 48);
        assert_eq!(layout.data_len_bits, 32);
    }

    #[test]
    fn test_layout_too_small_for_validation() {
        let cfg = DspConfig {
            cargo_validation: DetectionMethod::Crc32,
            ..DspConfig::default()
        };
        assert!(CargoLayout::from_index(0, &cfg).is_err());
    }

    #[test]
    fn test_custom_string_drops_padding() {
        let cfg = DspConfig::default();
        // 33 + 2 bytes lands in the two-byte class, leaving one pad byte.
        let text = "a".repeat(33);
        let layout = CargoLayout::for_payload(33 * 8, &cfg).unwrap();
        assert_eq!(layout.data_len_bits, 34 * 8);
        let decoded = round_trip(&Message::from_text(&text), &cfg);
        assert_eq!(decoded.text(), Some(text));
        assert_eq!(decoded.length_bits, 33 * 8);
    }

    #[test]
    fn test_custom_bits_keep_padding() {
        let cfg = DspConfig::default();
        let decoded = round_trip(&Message::from_bits(&[0xAB, 0xC0], 10), &cfg);
        assert_eq!(decoded.data, vec![0xAB, 0xC0]);
        assert_eq!(decoded.length_bits, 16);
    }

    #[test]
    fn test_sms_codings_round_trip() {
        let cfg = DspConfig::janus();
        for coding in [SmsCoding::Ascii8, SmsCoding::Ascii7, SmsCoding::Ascii6, SmsCoding::Utf8] {
            let msg = sms("HELLO, SEA 42?", coding);
            let decoded = round_trip(&msg, &cfg);
            assert_eq!(decoded.text().as_deref(), Some("HELLO, SEA 42?"), "{coding:?}");
        }
    }

    #[test]
    fn test_sms_lengths_per_coding() {
        let cfg = DspConfig::janus();
        assert_eq!(payload_bits(&sms("abcd", SmsCoding::Ascii8), &cfg).unwrap(), 32);
        assert_eq!(payload_bits(&sms("abcd", SmsCoding::Ascii7), &cfg).unwrap(), 28);
        assert_eq!(payload_bits(&sms("abcd", SmsCoding::Ascii6), &cfg).unwrap(), 24);
    }

    #[test]
    fn test_ascii6_upper_cases_input() {
        let cfg = DspConfig::janus();
        let decoded = round_trip(&sms("dive", SmsCoding::Ascii6), &cfg);
        assert_eq!(decoded.text().as_deref(), Some("DIVE"));
    }

    #[test]
    fn test_utf8_bytes_survive() {
        let cfg = DspConfig::janus();
        let decoded = round_trip(&sms("né", SmsCoding::Utf8), &cfg);
        assert_eq!(decoded.text().as_deref(), Some("né"));
    }

    #[test]
    fn test_unencodable_characters() {
        let cfg = DspConfig::janus();
        assert_eq!(
            payload_bits(&sms("né", SmsCoding::Ascii7), &cfg),
            Err(ModemError::Unencodable {
                byte: 0xC3,
                coding: "ASCII7"
            })
        );
        assert!(payload_bits(&sms("a~", SmsCoding::Ascii6), &cfg).is_err());
    }

    #[test]
    fn test_encryption_is_rejected() {
        let cfg = DspConfig::janus();
        let mut msg = sms("HI", SmsCoding::Ascii8);
        msg.preamble.encryption = Some(2);
        assert!(matches!(
            payload_bits(&msg, &cfg),
            Err(ModemError::UnsupportedMethod(_))
        ));
        msg.preamble.encryption = None;
        assert_eq!(payload_bits(&msg, &cfg), Err(ModemError::InvalidField("encryption")));
    }

    #[test]
    fn test_payload_larger_than_layout() {
        let cfg = DspConfig::default();
        let layout = CargoLayout::from_index(0, &DspConfig {
            cargo_validation: DetectionMethod::None,
            ..cfg.clone()
        })
        .unwrap();
        let mut buffer = BitBuffer::new(64);
        buffer.set_len(8).unwrap();
        let msg = Message::from_integer(7);
        assert!(encode(&mut buffer, 0, &layout, &msg, &cfg).is_err());
    }
}
