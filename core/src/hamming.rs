//! Systematic Hamming code with parity bits at power-of-two positions.

use crate::bits::BitBuffer;
use crate::correction::{CorrectionOutcome, ErrorCorrectingCode};
use crate::error::{ModemError, Result};

/// Single-error-correcting Hamming code.
///
/// Codeword positions are 1-based. Positions 1, 2, 4, 8, ... carry parity and
/// every other position carries the next message bit in order. Parity `2^p`
/// covers all positions with bit `p` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hamming;

impl Hamming {
    pub fn new() -> Self {
        Self
    }

    /// Parity bits needed for `n` message bits: the smallest `r` with
    /// `2^r >= n + r + 1`.
    pub fn parity_bits(n: usize) -> usize {
        let mut r = 0;
        while (1usize << r) < n + r + 1 {
            r += 1;
        }
        r
    }

    fn syndrome(codeword: &[bool]) -> usize {
        codeword
            .iter()
            .enumerate()
            .filter(|(_, bit)| **bit)
            .fold(0, |acc, (index, _)| acc ^ (index + 1))
    }
}

fn is_parity_position(position: usize) -> bool {
    position.is_power_of_two()
}

impl ErrorCorrectingCode for Hamming {
    fn coded_length(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        n + Self::parity_bits(n)
    }

    fn uncoded_length(&self, coded: usize) -> Option<usize> {
        (0..=coded).find(|&n| self.coded_length(n) == coded)
    }

    fn encode(
        &self,
        src: &BitBuffer,
        src_start: usize,
        len: usize,
        dst: &mut BitBuffer,
        dst_start: usize,
    ) -> Result<usize> {
        let coded_len = self.coded_length(len);
        let mut codeword = vec![false; coded_len];

        let mut data_pos = src_start;
        for position in 1..=coded_len {
            if !is_parity_position(position) {
                codeword[position - 1] = src.get_bit(data_pos)?;
                data_pos += 1;
            }
        }

        // Parity positions are still zero, so the syndrome of the partial
        // codeword is exactly the set of parity bits to raise.
        let parity = Self::syndrome(&codeword);
        let mut p = 1;
        while p <= coded_len {
            codeword[p - 1] = parity & p != 0;
            p <<= 1;
        }

        for (offset, &bit) in codeword.iter().enumerate() {
            dst.set_bit(dst_start + offset, bit)?;
        }
        Ok(coded_len)
    }

    fn decode(
        &self,
        src: &BitBuffer,
        src_start: usize,
        coded_len: usize,
        dst: &mut BitBuffer,
        dst_start: usize,
    ) -> Result<CorrectionOutcome> {
        let Some(data_len) = self.uncoded_length(coded_len) else {
            return Err(ModemError::InvalidLength(coded_len));
        };
        let mut codeword = (0..coded_len)
            .map(|offset| src.get_bit(src_start + offset))
            .collect::<Result<Vec<bool>>>()?;

        let mut outcome = CorrectionOutcome::default();
        let syndrome = Self::syndrome(&codeword);
        if syndrome != 0 {
            if syndrome <= coded_len {
                codeword[syndrome - 1] = !codeword[syndrome - 1];
                outcome.corrected = true;
            } else {
                outcome.error = true;
            }
        }

        let mut written = 0;
        for position in 1..=coded_len {
            if !is_parity_position(position) {
                dst.set_bit(dst_start + written, codeword[position - 1])?;
                written += 1;
            }
        }
        debug_assert_eq!(written, data_len);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_bits(bits: &[bool]) -> BitBuffer {
        let mut src = BitBuffer::new(256);
        for &bit in bits {
            src.add_bit(bit).unwrap();
        }
        let hamming = Hamming::new();
        let coded_len = hamming.coded_length(bits.len());
        let mut dst = BitBuffer::new(256);
        dst.set_len(coded_len).unwrap();
        hamming.encode(&src, 0, bits.len(), &mut dst, 0).unwrap();
        dst
    }

    fn decode_bits(coded: &BitBuffer, data_len: usize) -> (Vec<bool>, CorrectionOutcome) {
        let hamming = Hamming::new();
        let mut out = BitBuffer::new(256);
        out.set_len(data_len).unwrap();
        let outcome = hamming.decode(coded, 0, coded.len(), &mut out, 0).unwrap();
        let bits = (0..data_len).map(|i| out.get_bit(i).unwrap()).collect();
        (bits, outcome)
    }

    #[test]
    fn test_coded_lengths() {
        let hamming = Hamming::new();
        assert_eq!(hamming.coded_length(1), 3);
        assert_eq!(hamming.coded_length(4), 7);
        assert_eq!(hamming.coded_length(11), 15);
        assert_eq!(hamming.coded_length(12), 17);
        assert_eq!(hamming.coded_length(26), 31);
        assert_eq!(hamming.coded_length(48), 54);
        assert_eq!(hamming.uncoded_length(54), Some(48));
        assert_eq!(hamming.uncoded_length(16), None);
    }

    #[test]
    fn test_hamming_7_4_layout() {
        // Data 1011 -> positions 3,5,6,7 = 1,0,1,1.
        let coded = encode_bits(&[true, false, true, true]);
        let bits: Vec<bool> = (0..7).map(|i| coded.get_bit(i).unwrap()).collect();
        // p1 = d3^d5^d7 = 1^0^1 = 0, p2 = d3^d6^d7 = 1^1^1 = 1, p4 = d5^d6^d7 = 0^1^1 = 0
        assert_eq!(bits, vec![false, true, true, false, false, true, true]);
    }

    #[test]
    fn test_clean_decode() {
        let data: Vec<bool> = (0..20).map(|i| i % 3 == 0).collect();
        let coded = encode_bits(&data);
        let (decoded, outcome) = decode_bits(&coded, data.len());
        assert_eq!(decoded, data);
        assert!(!outcome.corrected);
        assert!(!outcome.error);
    }

    #[test]
    fn test_every_single_flip_is_corrected() {
        let data: Vec<bool> = (0..26).map(|i| (i * 7) % 5 < 2).collect();
        let coded = encode_bits(&data);
        for pos in 0..coded.len() {
            let mut corrupted = coded.clone();
            corrupted.flip_bit(pos).unwrap();
            let (decoded, outcome) = decode_bits(&corrupted, data.len());
            assert_eq!(decoded, data, "flip at {pos}");
            assert!(outcome.corrected);
            assert!(!outcome.error);
        }
    }

    #[test]
    fn test_out_of_range_syndrome_is_an_error() {
        // 12 data bits -> 17 coded bits; flipping positions 16 and 2 gives
        // syndrome 18, past the end of the codeword.
        let data = vec![true; 12];
        let mut coded = encode_bits(&data);
        coded.flip_bit(15).unwrap();
        coded.flip_bit(1).unwrap();
        let (_, outcome) = decode_bits(&coded, data.len());
        assert!(outcome.error);
        assert!(!outcome.corrected);
    }
}
