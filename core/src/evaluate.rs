//! Link evaluation with fixed bit patterns.
//!
//! An evaluation transmission carries no preamble, validation or correction:
//! just `EVAL_MESSAGE_LENGTH` bits of a repeating pattern known to both ends,
//! so the receiver can count raw bit errors.

use crate::bits::BitBuffer;
use crate::error::{ModemError, Result};

/// Bits in one evaluation transmission.
pub const EVAL_MESSAGE_LENGTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvalPattern {
    /// `0x55` repeated.
    #[default]
    Alternating,
    /// `0xCC` repeated.
    Pairs,
    /// `0x0F` repeated.
    Nibbles,
    /// `0x00FF` repeated.
    Bytes,
    /// `0x399C7A73` repeated.
    Mixed,
}

impl EvalPattern {
    pub const ALL: [EvalPattern; 5] = [
        EvalPattern::Alternating,
        EvalPattern::Pairs,
        EvalPattern::Nibbles,
        EvalPattern::Bytes,
        EvalPattern::Mixed,
    ];

    /// One-based pattern number.
    pub fn index(self) -> u8 {
        match self {
            EvalPattern::Alternating => 1,
            EvalPattern::Pairs => 2,
            EvalPattern::Nibbles => 3,
            EvalPattern::Bytes => 4,
            EvalPattern::Mixed => 5,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.index() == index)
    }

    /// Repeating word and its width in bits.
    fn word(self) -> (u32, usize) {
        match self {
            EvalPattern::Alternating => (0x55, 8),
            EvalPattern::Pairs => (0xCC, 8),
            EvalPattern::Nibbles => (0x0F, 8),
            EvalPattern::Bytes => (0x00FF, 16),
            EvalPattern::Mixed => (0x399C_7A73, 32),
        }
    }

    /// Expected bit at `index`, `None` past the end of the transmission.
    pub fn bit(self, index: usize) -> Option<bool> {
        if index >= EVAL_MESSAGE_LENGTH {
            return None;
        }
        let (word, width) = self.word();
        Some((word >> (width - 1 - index % width)) & 1 == 1)
    }

    /// Append the whole pattern to `buffer`.
    pub fn fill(self, buffer: &mut BitBuffer) -> Result<()> {
        for index in 0..EVAL_MESSAGE_LENGTH {
            buffer.add_bit(self.bit(index).unwrap_or_default())?;
        }
        Ok(())
    }

    /// The pattern packed MSB-first into bytes.
    pub fn bytes(self) -> Vec<u8> {
        let mut bytes = vec![0u8; EVAL_MESSAGE_LENGTH.div_ceil(8)];
        for index in 0..EVAL_MESSAGE_LENGTH {
            if self.bit(index) == Some(true) {
                bytes[index / 8] |= 1 << (7 - index % 8);
            }
        }
        bytes
    }
}

/// Fraction of the `EVAL_MESSAGE_LENGTH` bits starting at `start` that differ
/// from `pattern`.
pub fn bit_error_rate(pattern: EvalPattern, received: &BitBuffer, start: usize) -> Result<f32> {
    if received.len() < start + EVAL_MESSAGE_LENGTH {
        return Err(ModemError::InsufficientData);
    }
    let mut errors = 0usize;
    for index in 0..EVAL_MESSAGE_LENGTH {
        if Some(received.get_bit(start + index)?) != pattern.bit(index) {
            errors += 1;
        }
    }
    Ok(errors as f32 / EVAL_MESSAGE_LENGTH as f32)
}
