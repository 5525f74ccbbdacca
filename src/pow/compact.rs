use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const MAX_80: u128 = (1u128 << 80) - 1;

/// 80-bit normalized double-SHA-256: byte 0 holds the leading-zero bit count,
/// bytes 1..10 the 72 bits that follow the first set bit's position.
///
/// Used as a cheap identifier and spam filter for inventory items; checking
/// one is a single hash computation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CompactPow(pub [u8; 10]);

pub fn compact_pow(data: &[u8]) -> CompactPow {
    let once = Sha256::digest(data);
    let twice: [u8; 32] = Sha256::digest(once).into();

    let zeros = leading_zero_bits(&twice);
    let normalized = shift_left(&twice, zeros);

    let mut out = [0u8; 10];
    out[0] = zeros.min(255) as u8;
    out[1..].copy_from_slice(&normalized[..9]);
    CompactPow(out)
}

impl CompactPow {
    pub fn leading_zeros(&self) -> u32 {
        u32::from(self.0[0])
    }

    fn mantissa(&self) -> u128 {
        self.0[1..]
            .iter()
            .fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
    }

    /// The 80-bit prefix of the underlying hash, recovered from the
    /// normalized form.
    pub fn value(&self) -> u128 {
        let zeros = self.leading_zeros();
        if zeros >= 80 {
            return 0;
        }
        (self.mantissa() << 8) >> zeros
    }

    /// `(max_80bit / value) >> 24`
    pub fn difficulty(&self) -> u64 {
        ((MAX_80 / self.value().max(1)) >> 24) as u64
    }
}

impl Ord for CompactPow {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .leading_zeros()
            .cmp(&self.leading_zeros())
            .then_with(|| self.mantissa().cmp(&other.mantissa()))
    }
}

impl PartialOrd for CompactPow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for CompactPow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactPow({})", hex::encode(self.0))
    }
}

fn leading_zero_bits(bytes: &[u8; 32]) -> u32 {
    let mut zeros = 0;
    for b in bytes {
        if *b == 0 {
            zeros += 8;
        } else {
            zeros += b.leading_zeros();
            break;
        }
    }
    zeros
}

fn shift_left(bytes: &[u8; 32], bits: u32) -> [u8; 32] {
    let byte_shift = (bits / 8) as usize;
    let bit_shift = bits % 8;
    let mut out = [0u8; 32];
    for (i, slot) in out.iter_mut().enumerate() {
        let src = i + byte_shift;
        if src >= 32 {
            break;
        }
        let hi = bytes[src] << bit_shift;
        let lo = if bit_shift > 0 && src + 1 < 32 {
            bytes[src + 1] >> (8 - bit_shift)
        } else {
            0
        };
        *slot = hi | lo;
    }
    out
}
