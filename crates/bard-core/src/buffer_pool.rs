use bard_ports::types::{BufferId, PcmBuffer};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("buffer {slot} released to pool {pool} but it is not checked out from it")]
    DoubleRelease { pool: u64, slot: usize },
}

/// Fixed set of equally shaped buffers, all allocated up front.
///
/// `acquire` and `release` never allocate: idle buffers sit on a stack whose
/// capacity is the pool size, and ownership of a checked-out buffer moves to
/// the caller until it comes back.
#[derive(Debug)]
pub struct BufferPool {
    id: u64,
    idle: Vec<PcmBuffer>,
    checked_out: Vec<bool>,
    frames: usize,
    channels: u16,
    sample_rate_hz: u32,
}

impl BufferPool {
    pub fn new(capacity: usize, frames: usize, channels: u16, sample_rate_hz: u32) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let idle = (0..capacity)
            .rev()
            .map(|slot| PcmBuffer::new(BufferId { pool: id, slot }, frames, channels, sample_rate_hz))
            .collect();
        Self {
            id,
            idle,
            checked_out: vec![false; capacity],
            frames,
            channels: channels.max(1),
            sample_rate_hz,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.checked_out.len()
    }

    pub fn available(&self) -> usize {
        self.idle.len()
    }

    pub fn checked_out(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn frames_per_buffer(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn acquire(&mut self) -> Option<PcmBuffer> {
        let buffer = self.idle.pop()?;
        self.checked_out[buffer.id().slot] = true;
        Some(buffer)
    }

    /// Returns a buffer. Fails with `DoubleRelease` for a buffer that is not
    /// currently checked out from this pool; the pool is left untouched.
    pub fn release(&mut self, buffer: PcmBuffer) -> Result<(), PoolError> {
        let id = buffer.id();
        let owned = id.pool == self.id && self.checked_out.get(id.slot).copied().unwrap_or(false);
        if !owned {
            return Err(PoolError::DoubleRelease {
                pool: id.pool,
                slot: id.slot,
            });
        }
        self.checked_out[id.slot] = false;
        self.idle.push(buffer);
        Ok(())
    }
}
