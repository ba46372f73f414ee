//! Cryptographic primitives and identifiers.
//!
//! Ed25519 signing and verification, SHA-256 hashing, and the fixed-width
//! `Hash`/`Address` identifiers used throughout the chain.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SEED_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const ADDRESS_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid seed length, must be {SEED_LEN} bytes")]
    InvalidSeedLength,
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("signature verification failed")]
    SignatureVerifyFailed,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// A 32-byte opaque identifier. Equality is bytewise; the zero value means
/// "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_bytes(b: &[u8]) -> Option<Hash> {
        if b.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Some(Hash(out))
    }

    pub fn sha256(data: &[u8]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

/// A 20-byte account identifier: the low 20 bytes of SHA-256(public key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Ed25519 private key, held as a 32-byte seed.
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl PrivateKey {
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        if seed.len() != SEED_LEN {
            return Err(CryptoError::InvalidSeedLength);
        }
        let mut buf = [0u8; SEED_LEN];
        buf.copy_from_slice(seed);
        Ok(PrivateKey {
            signing_key: SigningKey::from_bytes(&buf),
        })
    }

    pub fn generate() -> Self {
        let mut csprng = OsRng;
        PrivateKey {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        Signature(self.signing_key.sign(msg))
    }
}

/// Ed25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&arr)
            .map(PublicKey)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0.to_bytes()
    }

    /// Derive the account address: the low 20 bytes of SHA-256(pubkey).
    pub fn address(&self) -> Address {
        let digest = Hash::sha256(&self.0.to_bytes());
        let mut addr = [0u8; ADDRESS_LEN];
        addr.copy_from_slice(&digest.0[12..32]);
        Address(addr)
    }

}

impl Address {
    /// The zero address: used as the coinbase identity at genesis. Not
    /// derived from any real public key (all-zero bytes are not
    /// guaranteed to decode to a valid Ed25519 point), so this is a
    /// distinct constant rather than `PublicKey::zero().address()`.
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    /// Parses a 20-byte address from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Address, CryptoError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;
        if bytes.len() != ADDRESS_LEN {
            return Err(CryptoError::InvalidAddress(format!(
                "expected {ADDRESS_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut addr = [0u8; ADDRESS_LEN];
        addr.copy_from_slice(&bytes);
        Ok(Address(addr))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = <[u8; PUBLIC_KEY_LEN]>::deserialize(deserializer)?;
        PublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.to_bytes()))
    }
}

/// Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Signature(ed25519_dalek::Signature::from_bytes(&arr)))
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0.to_bytes()
    }

    pub fn verify(&self, public: &PublicKey, msg: &[u8]) -> bool {
        public.0.verify(msg, &self.0).is_ok()
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = <[u8; SIGNATURE_LEN]>::deserialize(deserializer)?;
        Signature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

pub fn generate_keypair() -> (PrivateKey, PublicKey) {
    let private = PrivateKey::generate();
    let public = private.public_key();
    (private, public)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_must_be_32_bytes() {
        assert!(matches!(
            PrivateKey::from_seed(&[0u8; 16]),
            Err(CryptoError::InvalidSeedLength)
        ));
        assert!(PrivateKey::from_seed(&[0u8; 32]).is_ok());
    }

    #[test]
    fn sign_verify_round_trip() {
        let (priv_key, pub_key) = generate_keypair();
        let msg = b"hello chain";
        let sig = priv_key.sign(msg);
        assert!(sig.verify(&pub_key, msg));
        assert!(!sig.verify(&pub_key, b"hello chaim"));
    }

    #[test]
    fn address_is_low_20_bytes_of_sha256_pubkey() {
        let (_priv_key, pub_key) = generate_keypair();
        let expected = Hash::sha256(&pub_key.to_bytes());
        let addr = pub_key.address();
        assert_eq!(&addr.0[..], &expected.0[12..32]);
    }

    #[test]
    fn hash_zero_is_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::sha256(b"x").is_zero());
    }

    #[test]
    fn address_from_hex_accepts_0x_prefix_and_roundtrips() {
        let addr = Address([0x42; ADDRESS_LEN]);
        let hex_str = addr.to_string();
        assert_eq!(Address::from_hex(&hex_str).unwrap(), addr);
        assert_eq!(Address::from_hex(&hex_str[2..]).unwrap(), addr);
    }

    #[test]
    fn address_from_hex_rejects_wrong_length() {
        assert!(matches!(
            Address::from_hex("0xabcd"),
            Err(CryptoError::InvalidAddress(_))
        ));
    }
}
