//! Pseudorandom payloads for bandwidth benchmarking.
//!
//! A small random block is generated once at startup and repeated into one
//! large immutable buffer. Requests are answered with a prefix of that
//! buffer, so no randomness is produced per request and every response
//! shares the same allocation.

use axum::body::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::AppError;

/// Largest byte value (exclusive) drawn into the random block.
const BYTE_VALUE_LIMIT: u8 = 128;
const BYTES_PER_KBYTE: usize = 1000;

pub const DEFAULT_SEED_LEN: usize = 10_000;
pub const DEFAULT_REPEAT_COUNT: usize = 1_000;

pub const MIN_SIZE_KBYTES: u32 = 100;
pub const MAX_SIZE_KBYTES: u32 = 9_900;
pub const SIZE_STEP_KBYTES: u32 = 100;

#[derive(Debug, Clone)]
pub struct RandomBuffer {
    seed_len: usize,
    repeat_count: usize,
    materialized: Bytes,
}

impl RandomBuffer {
    /// Draws `seed_len` bytes from the thread rng and repeats them
    /// `repeat_count` times.
    pub fn generate(seed_len: usize, repeat_count: usize) -> Result<Self, AppError> {
        Self::generate_with(&mut rand::rng(), seed_len, repeat_count)
    }

    /// Same as [`RandomBuffer::generate`] with a reproducible seed.
    pub fn generate_seeded(seed: u64, seed_len: usize, repeat_count: usize) -> Result<Self, AppError> {
        Self::generate_with(&mut StdRng::seed_from_u64(seed), seed_len, repeat_count)
    }

    fn generate_with<R: Rng>(rng: &mut R, seed_len: usize, repeat_count: usize) -> Result<Self, AppError> {
        let seed_block: Vec<u8> = (0..seed_len)
            .map(|_| rng.random_range(0..BYTE_VALUE_LIMIT))
            .collect();
        Self::from_seed_block(&seed_block, repeat_count)
    }

    pub fn from_seed_block(seed_block: &[u8], repeat_count: usize) -> Result<Self, AppError> {
        let total = seed_block
            .len()
            .checked_mul(repeat_count)
            .ok_or(AppError::BufferAllocation(usize::MAX))?;

        let mut materialized = Vec::new();
        materialized
            .try_reserve_exact(total)
            .map_err(|_| AppError::BufferAllocation(total))?;
        for _ in 0..repeat_count {
            materialized.extend_from_slice(seed_block);
        }

        Ok(Self {
            seed_len: seed_block.len(),
            repeat_count,
            materialized: Bytes::from(materialized),
        })
    }

    pub fn seed_block(&self) -> &[u8] {
        &self.materialized[..self.seed_len.min(self.materialized.len())]
    }

    pub fn repeat_count(&self) -> usize {
        self.repeat_count
    }

    pub fn len(&self) -> usize {
        self.materialized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materialized.is_empty()
    }

    /// Returns the first `len` bytes without copying.
    pub fn prefix(&self, len: usize) -> Option<Bytes> {
        (len <= self.materialized.len()).then(|| self.materialized.slice(..len))
    }
}

/// Serves prefixes of a [`RandomBuffer`] sized in kilobytes (1000 bytes).
#[derive(Debug, Clone)]
pub struct ByteBufferServer {
    buffer: RandomBuffer,
}

impl ByteBufferServer {
    pub fn new(buffer: RandomBuffer) -> Self {
        Self { buffer }
    }

    pub fn initialize(seed_len: usize, repeat_count: usize) -> Result<Self, AppError> {
        let buffer = RandomBuffer::generate(seed_len, repeat_count)?;
        tracing::info!(
            seed_len,
            repeat_count,
            bytes = buffer.len(),
            "random download buffer ready"
        );
        Ok(Self::new(buffer))
    }

    pub fn buffer(&self) -> &RandomBuffer {
        &self.buffer
    }

    pub fn serve(&self, size_kbytes: u32) -> Result<Bytes, AppError> {
        if !is_accepted_size(size_kbytes) {
            return Err(AppError::OutOfRange(format!(
                "size must be a multiple of {SIZE_STEP_KBYTES} between {MIN_SIZE_KBYTES} and {MAX_SIZE_KBYTES} KB, got {size_kbytes}"
            )));
        }

        let len = size_kbytes as usize * BYTES_PER_KBYTE;
        self.buffer.prefix(len).ok_or_else(|| {
            AppError::OutOfRange(format!(
                "{len} bytes requested but only {} are available",
                self.buffer.len()
            ))
        })
    }
}

pub fn is_accepted_size(size_kbytes: u32) -> bool {
    (MIN_SIZE_KBYTES..=MAX_SIZE_KBYTES).contains(&size_kbytes) && size_kbytes % SIZE_STEP_KBYTES == 0
}
