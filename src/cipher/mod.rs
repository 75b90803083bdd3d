//! Cipher engine for tunnel traffic
//!
//! [`Cipher`] wraps a [`KeySchedule`] with the length-prefixed framing used
//! on the tunnel:
//!
//! ```text
//! encrypt_block(len: u32, 0: u32) || encrypt_block(plain[0..8]) || ... || encrypt_block(pad8(tail))
//! ```
//!
//! All words are little-endian on the wire. The first block carries the real
//! plaintext length so the zero padding of the last block can be discarded.

mod blowfish;
mod tables;

pub use blowfish::{Block, KeySchedule, MAX_KEY_BYTES};

use crate::error::{RelayError, Result};

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 8;

/// Default shared key used by both tunnel endpoints
pub const DEFAULT_KEY: &str = "@@abort();";

/// Size of `plain_len` bytes once encrypted, including the length block
pub fn encrypted_len(plain_len: usize) -> usize {
    BLOCK_SIZE + plain_len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Block cipher with length-prefixed framing
#[derive(Debug, Clone)]
pub struct Cipher {
    schedule: KeySchedule,
}

impl Cipher {
    /// Build a cipher from raw key bytes (1..=56 bytes)
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Cipher {
            schedule: KeySchedule::new(key)?,
        })
    }

    /// Access the underlying key schedule
    pub fn schedule(&self) -> &KeySchedule {
        &self.schedule
    }

    /// Encrypt `plaintext`, prefixing its length
    ///
    /// Output is always a multiple of 8 bytes: one length block followed by
    /// the plaintext, zero-padded to the block boundary.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(encrypted_len(plaintext.len()));

        let header = Block::new(plaintext.len() as u32, 0);
        out.extend_from_slice(&self.schedule.encrypt_block(header).to_le_bytes());

        for chunk in plaintext.chunks(BLOCK_SIZE) {
            let mut raw = [0u8; BLOCK_SIZE];
            raw[..chunk.len()].copy_from_slice(chunk);
            let block = self.schedule.encrypt_block(Block::from_le_bytes(raw));
            out.extend_from_slice(&block.to_le_bytes());
        }

        out
    }

    /// Decrypt output of [`Cipher::encrypt`]
    ///
    /// Fails with [`RelayError::MalformedInput`] when the input is not block
    /// aligned, lacks the length block, or the recovered length does not fit
    /// the number of data blocks.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(RelayError::MalformedInput(format!(
                "ciphertext length {} is not a multiple of {}",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }
        if ciphertext.is_empty() {
            return Err(RelayError::MalformedInput(
                "ciphertext is missing the length block".to_string(),
            ));
        }

        let mut blocks = ciphertext.chunks_exact(BLOCK_SIZE).map(|chunk| {
            let mut raw = [0u8; BLOCK_SIZE];
            raw.copy_from_slice(chunk);
            self.schedule.decrypt_block(Block::from_le_bytes(raw))
        });

        let plain_len = match blocks.next() {
            Some(header) => header.left as usize,
            None => 0,
        };

        if encrypted_len(plain_len) != ciphertext.len() {
            return Err(RelayError::MalformedInput(format!(
                "declared length {} does not match {} ciphertext bytes",
                plain_len,
                ciphertext.len()
            )));
        }

        let mut out = Vec::with_capacity(ciphertext.len() - BLOCK_SIZE);
        for block in blocks {
            out.extend_from_slice(&block.to_le_bytes());
        }
        out.truncate(plain_len);

        Ok(out)
    }
}
