use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use crate::hash::{Hash256, sha256};

/// Owner of an output: first 20 bytes of SHA-256 over the compressed public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_pubkey(pk: &PublicKey) -> Self {
        let digest = sha256(&pk.serialize());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.0[..20]);
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..6]))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 20];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Address(out))
    }
}

/// 65 bytes: recovery id followed by the 64-byte compact (r, s).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompactSignature(pub Vec<u8>);

/// Generate a new secp256k1 keypair and return (priv_hex, pub_hex_compressed, address_hex).
pub fn generate_keypair_hex() -> (String, String, String) {
    let secp = Secp256k1::new();
    let (sk, pk) = secp.generate_keypair(&mut OsRng);
    let sk_hex = hex::encode(sk.secret_bytes());
    let pk_hex = hex::encode(pk.serialize());
    let address = Address::from_pubkey(&pk).to_string();
    (sk_hex, pk_hex, address)
}

pub fn secret_from_hex(sk_hex: &str) -> Result<SecretKey, &'static str> {
    let bytes = hex::decode(sk_hex).map_err(|_| "invalid secret key hex")?;
    SecretKey::from_slice(&bytes).map_err(|_| "invalid secret key bytes")
}

pub fn address_of(sk: &SecretKey) -> Address {
    let secp = Secp256k1::signing_only();
    Address::from_pubkey(&PublicKey::from_secret_key(&secp, sk))
}

pub fn sign_compact(sk: &SecretKey, digest: &Hash256) -> CompactSignature {
    let secp = Secp256k1::signing_only();
    let msg = Message::from_digest(digest.0);
    let (recid, rs) = secp.sign_ecdsa_recoverable(&msg, sk).serialize_compact();
    let mut bytes = Vec::with_capacity(65);
    bytes.push(recid.to_i32() as u8);
    bytes.extend_from_slice(&rs);
    CompactSignature(bytes)
}

/// Address whose key produced `sig` over `digest`.
pub fn recover_address(sig: &CompactSignature, digest: &Hash256) -> Result<Address, &'static str> {
    if sig.0.len() != 65 {
        return Err("compact signature must be 65 bytes");
    }
    let recid = RecoveryId::from_i32(i32::from(sig.0[0])).map_err(|_| "invalid recovery id")?;
    let rsig =
        RecoverableSignature::from_compact(&sig.0[1..], recid).map_err(|_| "invalid signature")?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest(digest.0);
    let pk = secp
        .recover_ecdsa(&msg, &rsig)
        .map_err(|_| "signature does not recover a key")?;
    Ok(Address::from_pubkey(&pk))
}
