use anyhow::{Result, ensure};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

const SEQ_BYTES: usize = size_of::<u64>();

/// Maps a per-thread sequence number to a key. Every thread owns the keys
/// congruent to its id modulo the thread count, so two threads never
/// produce the same key.
#[derive(Debug, Clone, Copy)]
pub struct KeyGen {
    thread_count: u64,
    key_size: usize,
}

pub struct ValueGen {
    value_size: usize,
    rng: SmallRng,
}

impl KeyGen {
    pub fn new(thread_count: u64, key_size: usize) -> Result<Self> {
        ensure!(thread_count > 0, "Key generator needs at least one thread");
        ensure!(
            key_size >= SEQ_BYTES,
            "Key size must be at least {SEQ_BYTES} bytes (got {key_size})"
        );
        Ok(KeyGen {
            thread_count,
            key_size,
        })
    }

    pub fn key(&self, seq: u64, thread_id: u64) -> Vec<u8> {
        let id = seq * self.thread_count + thread_id;
        let mut bytes = vec![0u8; self.key_size];
        bytes[..SEQ_BYTES].copy_from_slice(&id.to_be_bytes());
        bytes
    }
}

impl ValueGen {
    pub fn new(value_size: usize, seed: u64) -> Self {
        ValueGen {
            value_size,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn value(&mut self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.value_size];
        self.rng.fill_bytes(&mut bytes[..]);
        bytes
    }
}
