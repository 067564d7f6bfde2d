//! Bit-addressable buffer with a fixed capacity.
//!
//! Bits are stored MSB-first: bit position `p` lives in byte `p / 8` under the
//! mask `1 << (7 - p % 8)`. Every accessor is bounds checked against either the
//! current bit count (reads) or the fixed capacity (writes).

use crate::error::{ModemError, Result};

#[derive(Debug, Clone)]
pub struct BitBuffer {
    data: Box<[u8]>,
    bit_count: usize,
    capacity_bits: usize,
}

impl BitBuffer {
    /// Create an empty buffer able to hold `capacity_bits` bits.
    pub fn new(capacity_bits: usize) -> Self {
        Self {
            data: vec![0u8; capacity_bits.div_ceil(8)].into_boxed_slice(),
            bit_count: 0,
            capacity_bits,
        }
    }

    /// Build a buffer holding the first `bit_len` bits of `bytes`.
    pub fn from_bytes(bytes: &[u8], bit_len: usize, capacity_bits: usize) -> Result<Self> {
        if bit_len > bytes.len() * 8 {
            return Err(ModemError::InsufficientData);
        }
        let mut buffer = Self::new(capacity_bits);
        for pos in 0..bit_len {
            buffer.add_bit(bytes[pos / 8] & (1 << (7 - pos % 8)) != 0)?;
        }
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.bit_count
    }

    pub fn is_empty(&self) -> bool {
        self.bit_count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity_bits
    }

    /// Bytes covering the written bits. The trailing byte may hold stale bits
    /// past `len()`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.bit_count.div_ceil(8)]
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
        self.bit_count = 0;
    }

    /// Move the bit counter without touching storage.
    pub fn set_len(&mut self, bit_count: usize) -> Result<()> {
        if bit_count > self.capacity_bits {
            return Err(ModemError::BufferOverflow {
                capacity: self.capacity_bits,
            });
        }
        self.bit_count = bit_count;
        Ok(())
    }

    pub fn add_bit(&mut self, bit: bool) -> Result<()> {
        if self.bit_count >= self.capacity_bits {
            return Err(ModemError::BufferOverflow {
                capacity: self.capacity_bits,
            });
        }
        self.write(self.bit_count, bit);
        self.bit_count += 1;
        Ok(())
    }

    pub fn get_bit(&self, pos: usize) -> Result<bool> {
        if pos >= self.bit_count {
            return Err(ModemError::OutOfRange {
                position: pos,
                limit: self.bit_count,
            });
        }
        Ok(self.read(pos))
    }

    pub fn set_bit(&mut self, pos: usize, bit: bool) -> Result<()> {
        if pos >= self.capacity_bits {
            return Err(ModemError::OutOfRange {
                position: pos,
                limit: self.capacity_bits,
            });
        }
        self.write(pos, bit);
        Ok(())
    }

    pub fn flip_bit(&mut self, pos: usize) -> Result<()> {
        let bit = self.get_bit(pos)?;
        self.write(pos, !bit);
        Ok(())
    }

    /// Append the low `width` bits of `value`, most significant first.
    pub fn add_chunk(&mut self, value: u16, width: usize) -> Result<()> {
        if width == 0 || width > 16 {
            return Err(ModemError::InvalidChunkWidth(width));
        }
        self.add_bits(u32::from(value), width)
    }

    /// Read `width` bits at `*pos` and advance `*pos` past them.
    pub fn get_chunk(&self, pos: &mut usize, width: usize) -> Result<u16> {
        if width == 0 || width > 16 {
            return Err(ModemError::InvalidChunkWidth(width));
        }
        let value = self.read_bits(*pos, width)?;
        *pos += width;
        Ok(value as u16)
    }

    /// Read up to 8 bits at `*pos`, which may straddle a byte boundary.
    ///
    /// The two bytes covering the chunk are combined into a 16-bit word, shifted
    /// left to drop the leading bits and right to drop the trailing ones.
    pub fn get_8bit_chunk(&self, pos: &mut usize, width: usize) -> Result<u8> {
        if width == 0 || width > 8 {
            return Err(ModemError::InvalidChunkWidth(width));
        }
        if *pos + width > self.bit_count {
            return Err(ModemError::OutOfRange {
                position: *pos + width - 1,
                limit: self.bit_count,
            });
        }
        let start_byte = *pos / 8;
        let high = self.data[start_byte];
        let low = self.data.get(start_byte + 1).copied().unwrap_or(0);
        let mut raw = u16::from_be_bytes([high, low]);
        raw <<= *pos % 8;
        raw >>= 16 - width;
        *pos += width;
        Ok(raw as u8)
    }

    pub fn add_u8(&mut self, value: u8) -> Result<()> {
        self.add_bits(u32::from(value), 8)
    }

    pub fn add_u16(&mut self, value: u16) -> Result<()> {
        self.add_bits(u32::from(value), 16)
    }

    pub fn add_u32(&mut self, value: u32) -> Result<()> {
        self.add_bits(value, 32)
    }

    pub fn get_u8(&self, pos: &mut usize) -> Result<u8> {
        let value = self.read_bits(*pos, 8)?;
        *pos += 8;
        Ok(value as u8)
    }

    pub fn get_u16(&self, pos: &mut usize) -> Result<u16> {
        let value = self.read_bits(*pos, 16)?;
        *pos += 16;
        Ok(value as u16)
    }

    pub fn get_u32(&self, pos: &mut usize) -> Result<u32> {
        let value = self.read_bits(*pos, 32)?;
        *pos += 32;
        Ok(value)
    }

    /// Append the low `width` (<= 32) bits of `value`. Nothing is written when
    /// the buffer would overflow.
    pub fn add_bits(&mut self, value: u32, width: usize) -> Result<()> {
        if width > 32 {
            return Err(ModemError::InvalidChunkWidth(width));
        }
        if self.bit_count + width > self.capacity_bits {
            return Err(ModemError::BufferOverflow {
                capacity: self.capacity_bits,
            });
        }
        for i in (0..width).rev() {
            self.write(self.bit_count, (value >> i) & 1 == 1);
            self.bit_count += 1;
        }
        Ok(())
    }

    /// Write the low `width` bits of `value` at `pos` without moving the counter.
    pub fn write_bits(&mut self, pos: usize, value: u32, width: usize) -> Result<()> {
        if width > 32 {
            return Err(ModemError::InvalidChunkWidth(width));
        }
        if pos + width > self.capacity_bits {
            return Err(ModemError::OutOfRange {
                position: pos + width,
                limit: self.capacity_bits,
            });
        }
        for i in 0..width {
            self.write(pos + i, (value >> (width - 1 - i)) & 1 == 1);
        }
        Ok(())
    }

    /// Read `width` (<= 32) bits at `pos` as an MSB-first integer.
    pub fn read_bits(&self, pos: usize, width: usize) -> Result<u32> {
        if width > 32 {
            return Err(ModemError::InvalidChunkWidth(width));
        }
        if pos + width > self.bit_count {
            return Err(ModemError::OutOfRange {
                position: pos + width,
                limit: self.bit_count,
            });
        }
        Ok((pos..pos + width).fold(0u32, |acc, p| (acc << 1) | u32::from(self.read(p))))
    }

    /// Copy `len` bits from `src[src_pos..]` into `self[dst_pos..]`.
    pub fn copy_from(
        &mut self,
        dst_pos: usize,
        src: &BitBuffer,
        src_pos: usize,
        len: usize,
    ) -> Result<()> {
        if src_pos + len > src.bit_count {
            return Err(ModemError::OutOfRange {
                position: src_pos + len,
                limit: src.bit_count,
            });
        }
        if dst_pos + len > self.capacity_bits {
            return Err(ModemError::OutOfRange {
                position: dst_pos + len,
                limit: self.capacity_bits,
            });
        }
        for i in 0..len {
            self.write(dst_pos + i, src.read(src_pos + i));
        }
        Ok(())
    }

    /// Two buffers are equal when their lengths match and every bit up to that
    /// length matches, including the masked partial trailing byte.
    pub fn compare(&self, other: &BitBuffer) -> bool {
        if self.bit_count != other.bit_count {
            return false;
        }
        let full_bytes = self.bit_count / 8;
        if self.data[..full_bytes] != other.data[..full_bytes] {
            return false;
        }
        let remainder = self.bit_count % 8;
        if remainder == 0 {
            return true;
        }
        let mask = 0xFFu8 << (8 - remainder);
        (self.data[full_bytes] & mask) == (other.data[full_bytes] & mask)
    }

    pub(crate) fn byte(&self, index: usize) -> u8 {
        self.data[index]
    }

    fn read(&self, pos: usize) -> bool {
        self.data[pos / 8] & (1 << (7 - pos % 8)) != 0
    }

    fn write(&mut self, pos: usize, bit: bool) {
        let mask = 1u8 << (7 - pos % 8);
        if bit {
            self.data[pos / 8] |= mask;
        } else {
            self.data[pos / 8] &= !mask;
        }
    }
}

impl PartialEq for BitBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_bits_msb_first() {
        let mut buffer = BitBuffer::new(16);
        buffer.add_u8(0b1010_0001).unwrap();
        assert_eq!(buffer.len(), 8);
        assert!(buffer.get_bit(0).unwrap());
        assert!(!buffer.get_bit(1).unwrap());
        assert!(buffer.get_bit(7).unwrap());
        assert_eq!(buffer.as_bytes(), &[0b1010_0001]);
    }

    #[test]
    fn test_read_past_count_fails() {
        let mut buffer = BitBuffer::new(16);
        buffer.add_bit(true).unwrap();
        assert!(buffer.get_bit(1).is_err());
        assert!(buffer.flip_bit(3).is_err());
    }

    #[test]
    fn test_write_past_capacity_fails() {
        let mut buffer = BitBuffer::new(10);
        assert!(buffer.set_bit(9, true).is_ok());
        assert!(buffer.set_bit(10, true).is_err());
    }

    #[test]
    fn test_add_fails_without_side_effect_when_full() {
        let mut buffer = BitBuffer::new(12);
        buffer.add_u8(0xFF).unwrap();
        assert!(buffer.add_u8(0x00).is_err());
        assert_eq!(buffer.len(), 8);
        assert!(buffer.add_chunk(0b1010, 4).is_ok());
        assert!(buffer.add_bit(true).is_err());
    }

    #[test]
    fn test_8bit_chunk_straddles_byte_boundary() {
        let mut buffer = BitBuffer::new(32);
        buffer.add_u16(0b0000_0111_1100_0000).unwrap();
        let mut pos = 5;
        let value = buffer.get_8bit_chunk(&mut pos, 5).unwrap();
        assert_eq!(value, 0b11111);
        assert_eq!(pos, 10);
    }

    #[test]
    fn test_8bit_chunk_at_last_byte() {
        let mut buffer = BitBuffer::new(8);
        buffer.add_u8(0b0001_0110).unwrap();
        let mut pos = 4;
        assert_eq!(buffer.get_8bit_chunk(&mut pos, 4).unwrap(), 0b0110);
        let mut pos = 6;
        assert!(buffer.get_8bit_chunk(&mut pos, 4).is_err());
    }

    #[test]
    fn test_wide_values_round_trip() {
        let mut buffer = BitBuffer::new(128);
        buffer.add_bit(true).unwrap();
        buffer.add_u16(0xBEEF).unwrap();
        buffer.add_u32(0x0123_4567).unwrap();
        buffer.add_chunk(0x1F, 5).unwrap();

        let mut pos = 1;
        assert_eq!(buffer.get_u16(&mut pos).unwrap(), 0xBEEF);
        assert_eq!(buffer.get_u32(&mut pos).unwrap(), 0x0123_4567);
        assert_eq!(buffer.get_chunk(&mut pos, 5).unwrap(), 0x1F);
        assert_eq!(pos, buffer.len());
    }

    #[test]
    fn test_flip_and_set() {
        let mut buffer = BitBuffer::new(8);
        buffer.add_u8(0).unwrap();
        buffer.flip_bit(2).unwrap();
        assert_eq!(buffer.as_bytes(), &[0b0010_0000]);
        buffer.set_bit(2, false).unwrap();
        buffer.set_bit(7, true).unwrap();
        assert_eq!(buffer.as_bytes(), &[0b0000_0001]);
    }

    #[test]
    fn test_compare_masks_trailing_bits() {
        let mut a = BitBuffer::new(16);
        let mut b = BitBuffer::new(16);
        a.add_chunk(0b101, 3).unwrap();
        b.add_chunk(0b101, 3).unwrap();
        // Stale storage past the counter is ignored.
        b.set_bit(5, true).unwrap();
        assert!(a.compare(&b));

        b.add_bit(false).unwrap();
        assert!(!a.compare(&b));
        a.add_bit(true).unwrap();
        assert!(!a.compare(&b));
    }

    #[test]
    fn test_from_bytes_and_copy() {
        let src = BitBuffer::from_bytes(&[0xF0, 0x0F], 16, 16).unwrap();
        let mut dst = BitBuffer::new(16);
        dst.set_len(8).unwrap();
        dst.copy_from(0, &src, 4, 8).unwrap();
        assert_eq!(dst.as_bytes(), &[0x00]);
        dst.copy_from(0, &src, 0, 4).unwrap();
        assert_eq!(dst.as_bytes(), &[0xF0]);
    }
}
