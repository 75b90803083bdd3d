//! 64-bit block Feistel cipher (Blowfish)
//!
//! The key schedule is expanded once from the π-derived tables and never
//! mutated afterwards, so a single schedule can be shared by both relay
//! directions of a session.

use super::tables::{P_INIT, S_INIT};
use crate::error::{RelayError, Result};

/// Number of Feistel rounds
const ROUNDS: usize = 16;

/// Maximum key length in bytes (448 bits)
pub const MAX_KEY_BYTES: usize = 56;

/// A pair of 32-bit words forming one 8-byte cipher block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Block {
    /// Left half
    pub left: u32,
    /// Right half
    pub right: u32,
}

impl Block {
    /// Create a block from its two halves
    pub fn new(left: u32, right: u32) -> Self {
        Block { left, right }
    }

    /// Read a block from 8 bytes, each half little-endian
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Block {
            left: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            right: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Serialize the block as 8 bytes, each half little-endian
    pub fn to_le_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.left.to_le_bytes());
        out[4..].copy_from_slice(&self.right.to_le_bytes());
        out
    }
}

/// Key-derived permutation array and substitution boxes
#[derive(Clone)]
pub struct KeySchedule {
    p: [u32; ROUNDS + 2],
    s: Box<[[u32; 256]; 4]>,
}

impl std::fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.debug_struct("KeySchedule").finish_non_exhaustive()
    }
}

impl KeySchedule {
    /// Expand `key` (1..=56 bytes) into a schedule
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() || key.len() > MAX_KEY_BYTES {
            return Err(RelayError::InvalidKey(key.len()));
        }

        let mut schedule = KeySchedule {
            p: P_INIT,
            s: Box::new(S_INIT),
        };

        let mut cycle = key.iter().cycle();
        for entry in schedule.p.iter_mut() {
            let mut data = 0u32;
            for _ in 0..4 {
                // cycle over a non-empty key never ends
                let byte = cycle.next().copied().unwrap_or_default();
                data = (data << 8) | u32::from(byte);
            }
            *entry ^= data;
        }

        let mut block = Block::default();
        for i in (0..ROUNDS + 2).step_by(2) {
            block = schedule.encrypt_block(block);
            schedule.p[i] = block.left;
            schedule.p[i + 1] = block.right;
        }

        for sbox in 0..4 {
            for j in (0..256).step_by(2) {
                block = schedule.encrypt_block(block);
                schedule.s[sbox][j] = block.left;
                schedule.s[sbox][j + 1] = block.right;
            }
        }

        Ok(schedule)
    }

    #[inline]
    fn round(&self, x: u32) -> u32 {
        let [a, b, c, d] = x.to_be_bytes();
        let h = self.s[0][a as usize].wrapping_add(self.s[1][b as usize]);
        (h ^ self.s[2][c as usize]).wrapping_add(self.s[3][d as usize])
    }

    /// Encrypt one block with 16 Feistel rounds
    pub fn encrypt_block(&self, block: Block) -> Block {
        let (mut xl, mut xr) = (block.left, block.right);
        for i in 0..ROUNDS {
            xl ^= self.p[i];
            xr ^= self.round(xl);
            std::mem::swap(&mut xl, &mut xr);
        }
        // undo the last swap
        std::mem::swap(&mut xl, &mut xr);
        xr ^= self.p[ROUNDS];
        xl ^= self.p[ROUNDS + 1];
        Block::new(xl, xr)
    }

    /// Exact inverse of [`KeySchedule::encrypt_block`]
    pub fn decrypt_block(&self, block: Block) -> Block {
        let (mut xl, mut xr) = (block.left, block.right);
        for i in (2..ROUNDS + 2).rev() {
            xl ^= self.p[i];
            xr ^= self.round(xl);
            std::mem::swap(&mut xl, &mut xr);
        }
        std::mem::swap(&mut xl, &mut xr);
        xr ^= self.p[1];
        xl ^= self.p[0];
        Block::new(xl, xr)
    }
}
