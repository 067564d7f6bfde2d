//! Prime-depth block interleaver.
//!
//! Within a section of `L` bits, the bit at index `i` moves to `(i * d) mod L`
//! where `d` is the smallest supported prime with `d * d > L` that does not
//! divide `L`.

use crate::bits::BitBuffer;
use crate::error::{ModemError, Result};

/// Primes available as interleaver depths.
pub const INTERLEAVER_PRIMES: [usize; 46] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199,
];

/// Depth for a section of `len` bits.
pub fn depth(len: usize) -> Result<usize> {
    INTERLEAVER_PRIMES
        .iter()
        .copied()
        .find(|&d| d * d > len && len % d != 0)
        .ok_or(ModemError::NoInterleaverDepth(len))
}

/// Scatter `buffer[start..start + len]` in place.
pub fn interleave(buffer: &mut BitBuffer, start: usize, len: usize) -> Result<()> {
    if len < 2 {
        return Ok(());
    }
    let d = depth(len)?;
    let scratch = read_section(buffer, start, len)?;
    for (i, &bit) in scratch.iter().enumerate() {
        buffer.set_bit(start + (i * d) % len, bit)?;
    }
    Ok(())
}

/// Undo [`interleave`]: the bit at index `i` is read back from `(i * d) mod L`.
pub fn deinterleave(buffer: &mut BitBuffer, start: usize, len: usize) -> Result<()> {
    if len < 2 {
        return Ok(());
    }
    let d = depth(len)?;
    let scratch = read_section(buffer, start, len)?;
    for i in 0..len {
        buffer.set_bit(start + i, scratch[(i * d) % len])?;
    }
    Ok(())
}

fn read_section(buffer: &BitBuffer, start: usize, len: usize) -> Result<Vec<bool>> {
    (start..start + len).map(|pos| buffer.get_bit(pos)).collect()
}
