//! Block headers and blocks.
//!
//! Grounded on `core/block.go` and `core/hasher.go` (a block's hash is
//! `sha256(header_bytes(header))` — `BlockHasher` in the original).

use serde::{Deserialize, Serialize};

use crate::chain::ChainError;
use crate::codec;
use crate::crypto::{Hash, PrivateKey, PublicKey, Signature};
use crate::transaction::Transaction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub data_hash: Hash,
    pub prev_hash: Hash,
    pub timestamp: u64,
    pub height: u64,
    pub nonce: u64,
}

impl Header {
    pub fn hash(&self) -> Hash {
        Hash::sha256(&codec::header_bytes(self))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub validator: Option<PublicKey>,
    pub signature: Option<Signature>,
    #[serde(skip)]
    hash: Option<Hash>,
}

fn compute_data_hash(txs: &[Transaction]) -> Hash {
    let mut buf = Vec::new();
    for tx in txs {
        buf.extend_from_slice(&codec::encode(tx));
    }
    Hash::sha256(&buf)
}

impl Block {
    /// Builds the next block on top of `prev`: `data_hash` from `txs`,
    /// `prev_hash` chaining to `prev`, height/timestamp advanced, and
    /// `version`/`nonce` inherited from `prev`.
    pub fn new_with_prev_header(prev: &Header, txs: Vec<Transaction>, now_nanos: u64) -> Block {
        let data_hash = compute_data_hash(&txs);
        Block {
            header: Header {
                version: prev.version,
                data_hash,
                prev_hash: prev.hash(),
                timestamp: now_nanos,
                height: prev.height + 1,
                nonce: prev.nonce,
            },
            transactions: txs,
            validator: None,
            signature: None,
            hash: None,
        }
    }

    pub fn genesis(transactions: Vec<Transaction>, now_nanos: u64) -> Block {
        Block {
            header: Header {
                version: 1,
                data_hash: compute_data_hash(&transactions),
                prev_hash: Hash::ZERO,
                timestamp: now_nanos,
                height: 0,
                nonce: 0,
            },
            transactions,
            validator: None,
            signature: None,
            hash: None,
        }
    }

    pub fn sign(&mut self, private: &PrivateKey) {
        self.validator = Some(private.public_key());
        self.signature = Some(private.sign(&codec::header_bytes(&self.header)));
        self.hash = None;
    }

    pub fn verify(&self) -> Result<(), ChainError> {
        let signature = self.signature.ok_or(ChainError::BlockNoSignature)?;
        let validator = self.validator.ok_or(ChainError::BlockNoSignature)?;
        if !signature.verify(&validator, &codec::header_bytes(&self.header)) {
            return Err(ChainError::BlockVerifyFailed);
        }
        for tx in &self.transactions {
            tx.verify()?;
        }
        let expected = compute_data_hash(&self.transactions);
        if self.header.data_hash != expected {
            return Err(ChainError::BlockInvalidDataHash);
        }
        Ok(())
    }

    /// Returns the cached block hash (`sha256(header_bytes)`), computing
    /// and caching it on first call.
    pub fn get_hash(&mut self) -> Hash {
        if let Some(h) = self.hash {
            return h;
        }
        let h = self.header.hash();
        self.hash = Some(h);
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;

    #[test]
    fn sign_then_verify_succeeds() {
        let (priv_key, _) = generate_keypair();
        let mut block = Block::genesis(vec![], 0);
        block.sign(&priv_key);
        assert!(block.verify().is_ok());
    }

    #[test]
    fn no_signature_fails() {
        let block = Block::genesis(vec![], 0);
        assert!(matches!(block.verify(), Err(ChainError::BlockNoSignature)));
    }

    #[test]
    fn tampered_validator_fails_verify() {
        let (priv_key, _) = generate_keypair();
        let (_, impostor) = generate_keypair();
        let mut block = Block::genesis(vec![], 0);
        block.sign(&priv_key);
        block.validator = Some(impostor);
        assert!(matches!(block.verify(), Err(ChainError::BlockVerifyFailed)));
    }

    #[test]
    fn new_with_prev_header_chains_correctly() {
        let genesis = Header {
            version: 1,
            data_hash: Hash::ZERO,
            prev_hash: Hash::ZERO,
            timestamp: 0,
            height: 0,
            nonce: 0,
        };
        let next = Block::new_with_prev_header(&genesis, vec![], 100);
        assert_eq!(next.header.height, 1);
        assert_eq!(next.header.prev_hash, genesis.hash());
    }
}
