//! Digest newtypes and the binary Merkle tree over transaction ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

/// Transaction ids are SHA-256 of the unsigned transaction.
pub type TrxId = Hash256;

/// Block ids are SHA-224 of the sealed header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BlockId(pub [u8; 28]);

pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

pub fn sha224(data: &[u8]) -> BlockId {
    BlockId(Sha224::digest(data).into())
}

impl Hash256 {
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl BlockId {
    /// Previous-id of the genesis block.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 28]
    }
}

macro_rules! hex_digest {
    ($name:ident, $len:expr) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..6]))
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut out = [0u8; $len];
                hex::decode_to_slice(s, &mut out)?;
                Ok($name(out))
            }
        }
    };
}

hex_digest!(Hash256, 32);
hex_digest!(BlockId, 28);

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash256(hasher.finalize().into())
}

/// Binary Merkle root; an odd node is paired with itself. Empty set is all zeros.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::default();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level[0]
}

/// Sibling path from one leaf up to a root. `true` in `sibling_is_left`
/// means the sibling is hashed on the left.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MerkleBranch {
    pub siblings: Vec<Hash256>,
    pub sibling_is_left: Vec<bool>,
}

impl MerkleBranch {
    pub fn root_from(&self, leaf: Hash256) -> Hash256 {
        self.siblings
            .iter()
            .zip(self.sibling_is_left.iter())
            .fold(leaf, |acc, (sibling, left)| {
                if *left {
                    hash_pair(sibling, &acc)
                } else {
                    hash_pair(&acc, sibling)
                }
            })
    }

    /// Branch for `leaves[index]`.
    pub fn build(leaves: &[Hash256], index: usize) -> Option<Self> {
        if index >= leaves.len() {
            return None;
        }
        let mut branch = MerkleBranch::default();
        let mut level = leaves.to_vec();
        let mut pos = index;
        while level.len() > 1 {
            let sibling = if pos % 2 == 0 {
                level.get(pos + 1).unwrap_or(&level[pos])
            } else {
                &level[pos - 1]
            };
            branch.siblings.push(*sibling);
            branch.sibling_is_left.push(pos % 2 == 1);
            level = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            pos /= 2;
        }
        Some(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<Hash256> {
        (0..n).map(|i| sha256(&[i])).collect()
    }

    #[test]
    fn root_of_single_leaf_is_the_leaf() {
        let l = leaves(1);
        assert_eq!(merkle_root(&l), l[0]);
        assert!(merkle_root(&[]).is_zero());
    }

    #[test]
    fn branches_recompute_the_root() {
        for n in 1..8u8 {
            let l = leaves(n);
            let root = merkle_root(&l);
            for i in 0..l.len() {
                let branch = MerkleBranch::build(&l, i).unwrap();
                assert_eq!(branch.root_from(l[i]), root, "n={n} i={i}");
            }
        }
        assert!(MerkleBranch::build(&leaves(2), 2).is_none());
    }

    #[test]
    fn order_matters() {
        let mut l = leaves(4);
        let root = merkle_root(&l);
        l.swap(0, 1);
        assert_ne!(merkle_root(&l), root);
    }

    #[test]
    fn hex_round_trip() {
        let id = sha224(b"block");
        assert_eq!(id.to_string().parse::<BlockId>().unwrap(), id);
        assert!("zz".parse::<Hash256>().is_err());
    }
}
