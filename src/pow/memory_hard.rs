use std::fmt;

use aes::Aes256;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Scratch buffer used by block proofs on the main network.
pub const SCRATCH_BYTES: usize = 128 * 1024 * 1024;

const BLOCK: usize = 16;
const MIN_BLOCKS: usize = 4;

/// 160-bit result of the memory-hard hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PowHash(pub [u8; 20]);

impl PowHash {
    /// `u64::MAX / top64(hash)`, never below 1.
    pub fn difficulty(&self) -> u64 {
        let mut top = [0u8; 8];
        top.copy_from_slice(&self.0[..8]);
        let h = u64::from_be_bytes(top).max(1);
        (u64::MAX / h).max(1)
    }
}

impl fmt::Debug for PowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PowHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for PowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

pub fn memory_hard_hash(seed: &[u8; 32]) -> PowHash {
    memory_hard_hash_with(seed, SCRATCH_BYTES)
}

/// Expand `seed` into `scratch_bytes` of AES output in two chained passes,
/// fold the buffer with a 128-bit mixing hash and finish with SHA-256.
///
/// The second pass is keyed by bytes read from a location picked by the
/// tail of the first pass. Every step of it also mixes in a block whose
/// position depends on the previous ciphertext, so the buffer has to be
/// held in full; regenerating a block means replaying the first pass up to it.
pub fn memory_hard_hash_with(seed: &[u8; 32], scratch_bytes: usize) -> PowHash {
    let blocks = (scratch_bytes / BLOCK).max(MIN_BLOCKS);
    let mut buf = vec![0u8; blocks * BLOCK];

    let key1: [u8; 32] = Sha256::digest(seed).into();
    first_pass(&key1, initial_chain(seed), &mut buf);

    let tail = &buf[buf.len() - BLOCK..];
    let pick = u64::from_le_bytes(word(tail, 0)) % (blocks as u64 - 1);
    let offset = pick as usize * BLOCK;
    let mut key2 = [0u8; 32];
    key2.copy_from_slice(&buf[offset..offset + 32]);
    second_pass(&key2, &mut buf);

    let mid = fold(&buf);
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(mid);
    let digest = hasher.finalize();

    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    PowHash(out)
}

fn initial_chain(seed: &[u8; 32]) -> [u8; BLOCK] {
    let mut chain = [0u8; BLOCK];
    for (i, c) in chain.iter_mut().enumerate() {
        *c = seed[i] ^ seed[i + BLOCK];
    }
    chain
}

/// chain = E(chain ^ i)
fn first_pass_step(cipher: &Aes256, chain: &mut [u8; BLOCK], i: usize) {
    let counter = (i as u128).to_le_bytes();
    for (c, k) in chain.iter_mut().zip(counter.iter()) {
        *c ^= k;
    }
    cipher.encrypt_block(GenericArray::from_mut_slice(chain));
}

/// buf[i] = E(buf[i-1] ^ i)
fn first_pass(key: &[u8; 32], mut chain: [u8; BLOCK], buf: &mut [u8]) {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    for (i, chunk) in buf.chunks_exact_mut(BLOCK).enumerate() {
        first_pass_step(&cipher, &mut chain, i);
        chunk.copy_from_slice(&chain);
    }
}

/// Block the second pass mixes into step `i`, picked by the previous
/// ciphertext and never `i` itself.
fn lookup_index(prev: &[u8; BLOCK], i: usize, blocks: usize) -> usize {
    let j = (u64::from_le_bytes(word(prev, 0)) % blocks as u64) as usize;
    if j == i { (j + 1) % blocks } else { j }
}

/// In-place CBC over the first pass:
/// buf[i] = E(buf[i] ^ prev ^ buf[lookup(prev)])
fn second_pass(key: &[u8; 32], buf: &mut [u8]) {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let blocks = buf.len() / BLOCK;
    let mut prev = [0u8; BLOCK];
    prev.copy_from_slice(&key[BLOCK..]);
    for i in 0..blocks {
        let j = lookup_index(&prev, i, blocks) * BLOCK;
        let at = i * BLOCK;
        let mut x = [0u8; BLOCK];
        for k in 0..BLOCK {
            x[k] = buf[at + k] ^ prev[k] ^ buf[j + k];
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut x));
        buf[at..at + BLOCK].copy_from_slice(&x);
        prev = x;
    }
}

const K0: u64 = 0xc3a5_c85c_97cb_3127;
const K1: u64 = 0xb492_b66f_be98_f273;
const K2: u64 = 0x9ae1_6a3b_2f90_404f;

fn word(bytes: &[u8], at: usize) -> [u8; 8] {
    let mut w = [0u8; 8];
    w.copy_from_slice(&bytes[at..at + 8]);
    w
}

fn shift_mix(v: u64) -> u64 {
    v ^ (v >> 47)
}

/// Non-cryptographic 128-bit mixing hash, fed one block at a time.
struct Mixer {
    a: u64,
    b: u64,
}

impl Mixer {
    fn new(len: usize) -> Self {
        Self {
            a: K0 ^ len as u64,
            b: K1,
        }
    }

    fn absorb(&mut self, chunk: &[u8]) {
        let x = u64::from_le_bytes(word(chunk, 0));
        let y = u64::from_le_bytes(word(chunk, 8));
        self.a = (self.a ^ x).wrapping_mul(K2).rotate_left(31).wrapping_add(self.b);
        self.b = (self.b ^ y).wrapping_mul(K1).rotate_left(27).wrapping_add(self.a);
    }

    fn finish(self) -> [u8; 16] {
        let lo = shift_mix(self.a.wrapping_mul(K1) ^ self.b).wrapping_mul(K2);
        let hi = shift_mix(self.b.wrapping_mul(K2) ^ lo).wrapping_mul(K0);

        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&lo.to_le_bytes());
        out[8..].copy_from_slice(&hi.to_le_bytes());
        out
    }
}

fn fold(buf: &[u8]) -> [u8; 16] {
    let mut mixer = Mixer::new(buf.len());
    for chunk in buf.chunks_exact(BLOCK) {
        mixer.absorb(chunk);
    }
    mixer.finish()
}
