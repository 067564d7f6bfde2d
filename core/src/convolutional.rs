//! JANUS rate 1/2, K=9 convolutional code with hard-decision Viterbi decoding.
//!
//! Every section is terminated with eight zero bits so the decoder can trace
//! back from state 0.

use crate::bits::BitBuffer;
use crate::config::ConvolutionalCode;
use crate::correction::{CorrectionOutcome, ErrorCorrectingCode};
use crate::error::{ModemError, Result};

/// Constraint length of the JANUS code.
pub const CONSTRAINT_LENGTH: usize = 9;
/// Zero bits appended to drive the encoder back to state 0.
pub const FLUSH_BITS: usize = CONSTRAINT_LENGTH - 1;

const NUM_STATES: usize = 1 << FLUSH_BITS; // 256
const REGISTER_MASK: u16 = (1 << CONSTRAINT_LENGTH) - 1;
const STATE_MASK: u16 = (NUM_STATES - 1) as u16;

/// Generator polynomials G1 = 0x1AF (657 octal), G2 = 0x11D (435 octal).
const G1: u16 = 0x1AF;
const G2: u16 = 0x11D;

/// Rate 1/2 convolutional encoder, constraint length 9.
///
/// The newest bit enters at the register's least significant end, and each
/// input produces the pair `(parity(reg & G1), parity(reg & G2))`.
pub struct ConvolutionalEncoder {
    register: u16,
}

impl ConvolutionalEncoder {
    pub fn new() -> Self {
        Self { register: 0 }
    }

    /// Shift `input` into the 9-bit register and emit its `(G1, G2)` parity pair.
    pub fn encode_bit(&mut self, input: bool) -> [bool; 2] {
        self.register = ((self.register << 1) | u16::from(input)) & REGISTER_MASK;
        branch_output(self.register)
    }

    /// Push the flush bits that terminate the trellis.
    pub fn flush(&mut self) -> Vec<bool> {
        let mut output = Vec::with_capacity(2 * FLUSH_BITS);
        for _ in 0..FLUSH_BITS {
            output.extend(self.encode_bit(false));
        }
        output
    }

    pub fn reset(&mut self) {
        self.register = 0;
    }
}

impl Default for ConvolutionalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parity(value: u16) -> bool {
    value.count_ones() % 2 == 1
}

fn branch_output(register: u16) -> [bool; 2] {
    [parity(register & G1), parity(register & G2)]
}

/// Result of a hard-decision Viterbi pass.
#[derive(Debug, Clone)]
pub struct ViterbiOutput {
    pub bits: Vec<bool>,
    /// Hamming distance between the received and the re-encoded sequence.
    pub metric: u32,
}

/// Hard-decision Viterbi decoder over the 256-state trellis.
pub struct ViterbiDecoder;

impl ViterbiDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a terminated codeword of `2 * (n + FLUSH_BITS)` bits.
    pub fn decode_hard(&self, received: &[bool]) -> Result<ViterbiOutput> {
        if received.len() % 2 != 0 {
            return Err(ModemError::InvalidLength(received.len()));
        }
        let steps = received.len() / 2;
        if steps < FLUSH_BITS {
            return Err(ModemError::InsufficientData);
        }

        let mut metrics = [u32::MAX; NUM_STATES];
        metrics[0] = 0;
        // For each step, the bit shifted out of the predecessor state
        // (its most significant bit), one bit per destination state.
        let mut decisions: Vec<[u64; NUM_STATES / 64]> = Vec::with_capacity(steps);

        for step in 0..steps {
            let pair = [received[2 * step], received[2 * step + 1]];
            let flushing = step >= steps - FLUSH_BITS;
            let mut next = [u32::MAX; NUM_STATES];
            let mut survivors = [0u64; NUM_STATES / 64];

            for (state, &metric) in metrics.iter().enumerate() {
                if metric == u32::MAX {
                    continue;
                }
                let inputs: &[u16] = if flushing { &[0] } else { &[0, 1] };
                for &input in inputs {
                    let register = (((state as u16) << 1) | input) & REGISTER_MASK;
                    let expected = branch_output(register);
                    let branch = u32::from(expected[0] != pair[0]) + u32::from(expected[1] != pair[1]);
                    let candidate = metric + branch;
                    let next_state = usize::from(register & STATE_MASK);
                    if candidate < next[next_state] {
                        next[next_state] = candidate;
                        let shifted_out = (state >> (FLUSH_BITS - 1)) & 1 == 1;
                        let word = &mut survivors[next_state / 64];
                        if shifted_out {
                            *word |= 1 << (next_state % 64);
                        } else {
                            *word &= !(1 << (next_state % 64));
                        }
                    }
                }
            }
            metrics = next;
            decisions.push(survivors);
        }

        let metric = metrics[0];
        if metric == u32::MAX {
            return Err(ModemError::InsufficientData);
        }

        let mut bits = vec![false; steps];
        let mut state = 0usize;
        for step in (0..steps).rev() {
            bits[step] = state & 1 == 1;
            let shifted_out = (decisions[step][state / 64] >> (state % 64)) & 1;
            state = (state >> 1) | ((shifted_out as usize) << (FLUSH_BITS - 1));
        }
        bits.truncate(steps - FLUSH_BITS);
        Ok(ViterbiOutput { bits, metric })
    }
}

impl Default for ViterbiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// The JANUS convolutional code plugged into the correction layer.
#[derive(Debug, Clone, Copy)]
pub struct JanusConvolutional {
    code: ConvolutionalCode,
}

impl JanusConvolutional {
    pub fn new(code: ConvolutionalCode) -> Self {
        Self { code }
    }
}

impl ErrorCorrectingCode for JanusConvolutional {
    fn coded_length(&self, n: usize) -> usize {
        match self.code {
            ConvolutionalCode::Janus => 2 * (n + FLUSH_BITS),
        }
    }

    fn uncoded_length(&self, coded: usize) -> Option<usize> {
        match self.code {
            ConvolutionalCode::Janus => {
                if coded % 2 != 0 || coded / 2 < FLUSH_BITS {
                    None
                } else {
                    Some(coded / 2 - FLUSH_BITS)
                }
            }
        }
    }

    fn encode(
        &self,
        src: &BitBuffer,
        src_start: usize,
        len: usize,
        dst: &mut BitBuffer,
        dst_start: usize,
    ) -> Result<usize> {
        let mut encoder = ConvolutionalEncoder::new();
        let mut pos = dst_start;
        for offset in 0..len {
            for bit in encoder.encode_bit(src.get_bit(src_start + offset)?) {
                dst.set_bit(pos, bit)?;
                pos += 1;
            }
        }
        for bit in encoder.flush() {
            dst.set_bit(pos, bit)?;
            pos += 1;
        }
        Ok(pos - dst_start)
    }

    fn decode(
        &self,
        src: &BitBuffer,
        src_start: usize,
        coded_len: usize,
        dst: &mut BitBuffer,
        dst_start: usize,
    ) -> Result<CorrectionOutcome> {
        let received = (0..coded_len)
            .map(|offset| src.get_bit(src_start + offset))
            .collect::<Result<Vec<bool>>>()?;
        let output = ViterbiDecoder::new().decode_hard(&received)?;
        for (offset, &bit) in output.bits.iter().enumerate() {
            dst.set_bit(dst_start + offset, bit)?;
        }
        Ok(CorrectionOutcome {
            corrected: output.metric != 0,
            error: false,
            normalized_metric: Some(output.metric as f32 / (coded_len / 2) as f32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(bits: &[bool]) -> Vec<bool> {
        let mut encoder = ConvolutionalEncoder::new();
        let mut out: Vec<bool> = bits.iter().flat_map(|&b| encoder.encode_bit(b)).collect();
        out.extend(encoder.flush());
        out
    }

    #[test]
    fn test_impulse_response_matches_generators() {
        // A single 1 followed by zeros walks the 1 through every tap of G1/G2.
        let coded = encode_all(&[true]);
        assert_eq!(coded.len(), 2 * (1 + FLUSH_BITS));
        for step in 0..CONSTRAINT_LENGTH {
            let tap = 1u16 << step;
            assert_eq!(coded[2 * step], G1 & tap != 0, "G1 tap {step}");
            assert_eq!(coded[2 * step + 1], G2 & tap != 0, "G2 tap {step}");
        }
    }

    #[test]
    fn test_clean_decode_has_zero_metric() {
        let data: Vec<bool> = (0..64).map(|i| (i * 5 + 3) % 7 < 3).collect();
        let coded = encode_all(&data);
        let output = ViterbiDecoder::new().decode_hard(&coded).unwrap();
        assert_eq!(output.bits, data);
        assert_eq!(output.metric, 0);
    }

    #[test]
    fn test_corrects_scattered_errors() {
        let data: Vec<bool> = (0..80).map(|i| (i * 11) % 13 < 6).collect();
        let mut coded = encode_all(&data);
        for pos in [3, 40, 91, 150] {
            coded[pos] = !coded[pos];
        }
        let output = ViterbiDecoder::new().decode_hard(&coded).unwrap();
        assert_eq!(output.bits, data);
        assert_eq!(output.metric, 4);
    }

    #[test]
    fn test_rejects_odd_length() {
        assert!(ViterbiDecoder::new().decode_hard(&[true; 17]).is_err());
    }

    #[test]
    fn test_section_round_trip_reports_metric() {
        let code = JanusConvolutional::new(ConvolutionalCode::Janus);
        let src = BitBuffer::from_bytes(&[0x01, 0x23, 0x45, 0x67], 32, 32).unwrap();
        let coded_len = code.coded_length(32);
        let mut coded = BitBuffer::new(coded_len);
        coded.set_len(coded_len).unwrap();
        assert_eq!(code.encode(&src, 0, 32, &mut coded, 0).unwrap(), coded_len);

        coded.flip_bit(10).unwrap();
        let mut decoded = BitBuffer::new(32);
        decoded.set_len(32).unwrap();
        let outcome = code.decode(&coded, 0, coded_len, &mut decoded, 0).unwrap();
        assert!(decoded.compare(&src));
        assert!(outcome.corrected);
        assert!(!outcome.error);
        assert_eq!(outcome.normalized_metric, Some(1.0 / 40.0));
    }
}
