//! Error-correction dispatch.
//!
//! Every code works section by section: it reads `len` message bits from one
//! buffer and writes the codeword into another, so preamble and cargo never
//! share parity.

use crate::bits::BitBuffer;
use crate::config::CorrectionMethod;
use crate::convolutional::JanusConvolutional;
use crate::error::Result;
use crate::hamming::Hamming;

/// What a decoder found while undoing a section.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CorrectionOutcome {
    /// At least one bit was repaired.
    pub corrected: bool,
    /// The code saw damage it could not repair.
    pub error: bool,
    /// Path metric divided by the number of trellis steps (convolutional only).
    pub normalized_metric: Option<f32>,
}

/// Interface shared by the block and convolutional codes.
pub trait ErrorCorrectingCode {
    fn coded_length(&self, n: usize) -> usize;

    /// Inverse of [`coded_length`](Self::coded_length), `None` when no message
    /// length maps onto `coded`.
    fn uncoded_length(&self, coded: usize) -> Option<usize>;

    /// Encode `src[src_start..src_start + len]` into `dst` at `dst_start`.
    /// Returns the number of coded bits written.
    fn encode(
        &self,
        src: &BitBuffer,
        src_start: usize,
        len: usize,
        dst: &mut BitBuffer,
        dst_start: usize,
    ) -> Result<usize>;

    /// Decode `coded_len` bits of `src` and write the message bits into `dst`.
    fn decode(
        &self,
        src: &BitBuffer,
        src_start: usize,
        coded_len: usize,
        dst: &mut BitBuffer,
        dst_start: usize,
    ) -> Result<CorrectionOutcome>;
}

/// Pass-through used when a section carries no correction code.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uncoded;

impl ErrorCorrectingCode for Uncoded {
    fn coded_length(&self, n: usize) -> usize {
        n
    }

    fn uncoded_length(&self, coded: usize) -> Option<usize> {
        Some(coded)
    }

    fn encode(
        &self,
        src: &BitBuffer,
        src_start: usize,
        len: usize,
        dst: &mut BitBuffer,
        dst_start: usize,
    ) -> Result<usize> {
        dst.copy_from(dst_start, src, src_start, len)?;
        Ok(len)
    }

    fn decode(
        &self,
        src: &BitBuffer,
        src_start: usize,
        coded_len: usize,
        dst: &mut BitBuffer,
        dst_start: usize,
    ) -> Result<CorrectionOutcome> {
        dst.copy_from(dst_start, src, src_start, coded_len)?;
        Ok(CorrectionOutcome::default())
    }
}

impl CorrectionMethod {
    /// The code implementing this method.
    pub fn code(self) -> Box<dyn ErrorCorrectingCode> {
        match self {
            CorrectionMethod::None => Box::new(Uncoded),
            CorrectionMethod::Hamming => Box::new(Hamming::new()),
            CorrectionMethod::Convolutional(code) => Box::new(JanusConvolutional::new(code)),
        }
    }

    pub fn coded_length(self, n: usize) -> usize {
        self.code().coded_length(n)
    }

    pub fn uncoded_length(self, coded: usize) -> Option<usize> {
        self.code().uncoded_length(coded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConvolutionalCode;

    #[test]
    fn test_coded_lengths_per_method() {
        assert_eq!(CorrectionMethod::None.coded_length(40), 40);
        assert_eq!(CorrectionMethod::Hamming.coded_length(40), 46);
        assert_eq!(
            CorrectionMethod::Convolutional(ConvolutionalCode::Janus).coded_length(40),
            96
        );
    }

    #[test]
    fn test_uncoded_lengths_invert_coded_lengths() {
        let methods = [
            CorrectionMethod::None,
            CorrectionMethod::Hamming,
            CorrectionMethod::Convolutional(ConvolutionalCode::Janus),
        ];
        for method in methods {
            for n in 1..200 {
                assert_eq!(method.uncoded_length(method.coded_length(n)), Some(n), "{method:?}");
            }
        }
    }

    #[test]
    fn test_uncoded_copies_bits() {
        let src = BitBuffer::from_bytes(&[0b1100_1010], 8, 8).unwrap();
        let mut dst = BitBuffer::new(16);
        dst.set_len(12).unwrap();
        let written = Uncoded.encode(&src, 2, 6, &mut dst, 4).unwrap();
        assert_eq!(written, 6);
        assert_eq!(dst.read_bits(4, 6).unwrap(), 0b00_1010);
    }
}
