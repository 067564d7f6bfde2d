//! Error detection codes over a bit range of a [`BitBuffer`].
//!
//! A section `[start, start + len)` carries its code in the trailing
//! `width` bits; the code covers `[start, start + len - width)`.

use crate::bits::BitBuffer;
use crate::config::DetectionMethod;
use crate::error::{ModemError, Result};

struct CrcParams {
    width: u32,
    poly: u32,
    init: u32,
    xor_out: u32,
}

/// x^8 + x^2 + x + 1
const CRC8: CrcParams = CrcParams {
    width: 8,
    poly: 0x07,
    init: 0x00,
    xor_out: 0x00,
};

/// x^16 + x^15 + x^2 + 1
const CRC16: CrcParams = CrcParams {
    width: 16,
    poly: 0x8005,
    init: 0xFFFF,
    xor_out: 0x0000,
};

const CRC32: CrcParams = CrcParams {
    width: 32,
    poly: 0x04C1_1DB7,
    init: 0xFFFF_FFFF,
    xor_out: 0xFFFF_FFFF,
};

impl CrcParams {
    fn mask(&self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    fn update_bit(&self, crc: u32, bit: bool) -> u32 {
        let top = (crc >> (self.width - 1)) & 1 == 1;
        let shifted = (crc << 1) & self.mask();
        if top ^ bit {
            shifted ^ self.poly
        } else {
            shifted
        }
    }

    fn update_byte(&self, crc: u32, byte: u8) -> u32 {
        let mut crc = crc ^ (u32::from(byte) << (self.width - 8));
        for _ in 0..8 {
            let top = (crc >> (self.width - 1)) & 1 == 1;
            crc = (crc << 1) & self.mask();
            if top {
                crc ^= self.poly;
            }
        }
        crc
    }
}

fn crc_params(method: DetectionMethod) -> Option<&'static CrcParams> {
    match method {
        DetectionMethod::Crc8 => Some(&CRC8),
        DetectionMethod::Crc16 => Some(&CRC16),
        DetectionMethod::Crc32 => Some(&CRC32),
        _ => None,
    }
}

fn check_range(buffer: &BitBuffer, start: usize, end: usize) -> Result<()> {
    if start > end || end > buffer.len() {
        return Err(ModemError::OutOfRange {
            position: end,
            limit: buffer.len(),
        });
    }
    Ok(())
}

/// CRC over `[start, end)`. Whole bytes go through the byte loop, the unaligned
/// head and tail are fed one bit at a time.
fn crc(buffer: &BitBuffer, start: usize, end: usize, params: &CrcParams) -> Result<u32> {
    check_range(buffer, start, end)?;
    let mut value = params.init;
    let mut pos = start;
    while pos < end && pos % 8 != 0 {
        value = params.update_bit(value, buffer.get_bit(pos)?);
        pos += 1;
    }
    while pos + 8 <= end {
        value = params.update_byte(value, buffer.byte(pos / 8));
        pos += 8;
    }
    while pos < end {
        value = params.update_bit(value, buffer.get_bit(pos)?);
        pos += 1;
    }
    Ok((value ^ params.xor_out) & params.mask())
}

/// Reference CRC that only ever consumes single bits.
fn crc_bit_serial(buffer: &BitBuffer, start: usize, end: usize, params: &CrcParams) -> Result<u32> {
    check_range(buffer, start, end)?;
    let mut value = params.init;
    for pos in start..end {
        value = params.update_bit(value, buffer.get_bit(pos)?);
    }
    Ok((value ^ params.xor_out) & params.mask())
}

/// One's-complement sum of `width`-bit words, complemented. A partial trailing
/// word is left-aligned with its missing low bits treated as zero.
fn checksum(buffer: &BitBuffer, start: usize, end: usize, width: usize) -> Result<u32> {
    check_range(buffer, start, end)?;
    let mask: u64 = (1u64 << width) - 1;
    let mut sum: u64 = 0;
    let mut pos = start;
    while pos < end {
        let take = width.min(end - pos);
        let word = u64::from(buffer.read_bits(pos, take)?) << (width - take);
        sum += word;
        while sum > mask {
            sum = (sum & mask) + (sum >> width);
        }
        pos += take;
    }
    Ok((!sum & mask) as u32)
}

/// Compute the code of `method` over `[start, end)`.
pub fn compute(buffer: &BitBuffer, start: usize, end: usize, method: DetectionMethod) -> Result<u32> {
    match method {
        DetectionMethod::None => Ok(0),
        DetectionMethod::Crc8 => crc(buffer, start, end, &CRC8),
        DetectionMethod::Crc16 => crc(buffer, start, end, &CRC16),
        DetectionMethod::Crc32 => crc(buffer, start, end, &CRC32),
        DetectionMethod::Checksum8 => checksum(buffer, start, end, 8),
        DetectionMethod::Checksum16 => checksum(buffer, start, end, 16),
        DetectionMethod::Checksum32 => checksum(buffer, start, end, 32),
    }
}

/// Bit-at-a-time CRC, used to cross-check the mixed byte/bit path.
pub fn compute_bit_serial(
    buffer: &BitBuffer,
    start: usize,
    end: usize,
    method: DetectionMethod,
) -> Result<u32> {
    match crc_params(method) {
        Some(params) => crc_bit_serial(buffer, start, end, params),
        None => compute(buffer, start, end, method),
    }
}

/// Write the code for section `[start, start + len)` into its last `width` bits.
pub fn add_detection(
    buffer: &mut BitBuffer,
    start: usize,
    len: usize,
    method: DetectionMethod,
) -> Result<()> {
    let width = method.width();
    if width == 0 {
        return Ok(());
    }
    if len < width {
        return Err(ModemError::InvalidLength(len));
    }
    let code_start = start + len - width;
    let code = compute(buffer, start, code_start, method)?;
    buffer.write_bits(code_start, code, width)
}

/// Recompute the code of a section and compare it with the stored one.
///
/// Returns `true` when they differ.
pub fn check_detection(
    buffer: &BitBuffer,
    start: usize,
    len: usize,
    method: DetectionMethod,
) -> Result<bool> {
    let width = method.width();
    if width == 0 {
        return Ok(false);
    }
    if len < width {
        return Err(ModemError::InvalidLength(len));
    }
    let code_start = start + len - width;
    let expected = compute(buffer, start, code_start, method)?;
    let stored = buffer.read_bits(code_start, width)?;
    Ok(expected != stored)
}
