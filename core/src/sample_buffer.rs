//! Lock-free single-producer/single-consumer sample ring.
//!
//! The producer (ADC callback, WAV reader) only moves `head`; the receive
//! pipeline only moves `tail`. Both are free-running counters masked into a
//! power-of-two buffer. Samples are stored as `f32` bit patterns in atomics so
//! neither side needs `unsafe` or a lock.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::{ModemError, Result};

/// Capacity of the receive ring at the default sample rate.
pub const PROCESSING_BUFFER_SIZE: usize = 1 << 14;

/// Read side of a sample buffer, as seen by the receive pipeline.
pub trait SampleSource {
    /// Samples between the tail and the head.
    fn available_samples(&self) -> usize;

    /// Sample `offset` positions past the tail.
    fn get_data(&self, offset: usize) -> Option<f32>;

    fn tail(&self) -> usize;

    fn set_tail(&self, tail: usize);

    fn tail_advance(&self, count: usize) {
        self.set_tail(self.tail().wrapping_add(count));
    }

    /// Times the write head has wrapped the buffer.
    fn rollover_count(&self) -> u32;

    /// Free-running write counter.
    fn head(&self) -> usize;

    /// Sample at a free-running index, `None` once overwritten or not yet written.
    fn get_absolute(&self, index: usize) -> Option<f32>;

    /// Copy `out.len()` samples starting `offset` past the tail.
    fn copy_window(&self, offset: usize, out: &mut [f32]) -> Result<()> {
        if offset + out.len() > self.available_samples() {
            return Err(ModemError::InsufficientData);
        }
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.get_data(offset + i).ok_or(ModemError::InsufficientData)?;
        }
        Ok(())
    }
}

pub struct SampleRing {
    buffer: Box<[AtomicU32]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    mask: usize,
    shift: u32,
}

impl SampleRing {
    /// Capacity is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            buffer: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            mask: capacity - 1,
            shift: capacity.trailing_zeros(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Room left before the producer would overwrite unread samples.
    pub fn free_space(&self) -> usize {
        self.capacity() - self.available_samples()
    }

    /// Producer side: append `samples`. Overrunning the reader is an error and
    /// writes nothing.
    pub fn push_slice(&self, samples: &[f32]) -> Result<()> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) + samples.len() > self.capacity() {
            return Err(ModemError::ResourceExhausted("sample ring overrun"));
        }
        for (i, &sample) in samples.iter().enumerate() {
            let index = head.wrapping_add(i) & self.mask;
            self.buffer[index].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.head
            .store(head.wrapping_add(samples.len()), Ordering::Release);
        Ok(())
    }

    /// Drop everything that has been written so far.
    pub fn clear(&self) {
        self.tail
            .store(self.head.load(Ordering::Acquire), Ordering::Release);
    }
}

impl SampleSource for SampleRing {
    fn available_samples(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(self.tail.load(Ordering::Relaxed))
    }

    fn get_data(&self, offset: usize) -> Option<f32> {
        if offset >= self.available_samples() {
            return None;
        }
        let index = self.tail.load(Ordering::Relaxed).wrapping_add(offset) & self.mask;
        Some(f32::from_bits(self.buffer[index].load(Ordering::Relaxed)))
    }

    fn tail(&self) -> usize {
        self.tail.load(Ordering::Relaxed)
    }

    fn set_tail(&self, tail: usize) {
        self.tail.store(tail, Ordering::Release);
    }

    fn rollover_count(&self) -> u32 {
        (self.head.load(Ordering::Acquire) >> self.shift) as u32
    }

    fn head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    fn get_absolute(&self, index: usize) -> Option<f32> {
        let behind = self.head().wrapping_sub(index);
        if behind == 0 || behind > self.capacity() {
            return None;
        }
        Some(f32::from_bits(self.buffer[index & self.mask].load(Ordering::Relaxed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(SampleRing::new(1000).capacity(), 1024);
        assert_eq!(SampleRing::new(PROCESSING_BUFFER_SIZE).capacity(), 16384);
    }

    #[test]
    fn test_push_read_advance() {
        let ring = SampleRing::new(8);
        ring.push_slice(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(ring.available_samples(), 3);
        assert_eq!(ring.get_data(1), Some(2.0));
        assert_eq!(ring.get_data(3), None);
        ring.tail_advance(2);
        assert_eq!(ring.get_data(0), Some(3.0));
        assert_eq!(ring.available_samples(), 1);
    }

    #[test]
    fn test_overrun_is_rejected() {
        let ring = SampleRing::new(4);
        ring.push_slice(&[0.0; 3]).unwrap();
        assert_eq!(
            ring.push_slice(&[0.0; 2]),
            Err(ModemError::ResourceExhausted("sample ring overrun"))
        );
        assert_eq!(ring.available_samples(), 3);
    }

    #[test]
    fn test_rollover_and_absolute_reads() {
        let ring = SampleRing::new(4);
        for chunk in 0..5 {
            let base = chunk as f32 * 2.0;
            ring.push_slice(&[base, base + 1.0]).unwrap();
            ring.tail_advance(2);
        }
        assert_eq!(ring.head(), 10);
        assert_eq!(ring.rollover_count(), 2);
        assert_eq!(ring.get_absolute(9), Some(9.0));
        assert_eq!(ring.get_absolute(6), Some(6.0));
        assert_eq!(ring.get_absolute(5), None);
        assert_eq!(ring.get_absolute(10), None);
    }

    #[test]
    fn test_copy_window() {
        let ring = SampleRing::new(16);
        ring.push_slice(&[0.5, 1.5, 2.5, 3.5]).unwrap();
        let mut out = [0.0; 2];
        ring.copy_window(1, &mut out).unwrap();
        assert_eq!(out, [1.5, 2.5]);
        assert_eq!(ring.copy_window(3, &mut out), Err(ModemError::InsufficientData));
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let ring = Arc::new(SampleRing::new(64));
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut next = 0u32;
                while next < 10_000 {
                    if ring.push_slice(&[next as f32]).is_ok() {
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };
        let mut expected = 0u32;
        while expected < 10_000 {
            if let Some(sample) = ring.get_data(0) {
                assert_eq!(sample, expected as f32);
                ring.tail_advance(1);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
