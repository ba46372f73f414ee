//! Transactions, including the tagged `inner` sub-payload for collection
//! and mint operations.
//!
//! Grounded on `core/transaction.go`; the inner union (`None` /
//! `CollectionTx` / `MintTx`) is modelled as a plain enum rather than a
//! reflective type switch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec;
use crate::crypto::{Hash, PrivateKey, PublicKey};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction has no signature")]
    NotSigned,
    #[error("transaction signature verification failed")]
    VerifyFailed,
    #[error("collection already exists")]
    DuplicateCollection,
    #[error("referenced collection does not exist")]
    MissingCollection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTx {
    pub fee: u64,
    pub metadata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintTx {
    pub fee: u64,
    pub metadata: Vec<u8>,
    pub nft_hash: Hash,
    pub collection_hash: Hash,
    pub collection_owner: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inner {
    None,
    Collection(CollectionTx),
    Mint(MintTx),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub data: Vec<u8>,
    pub from: Option<PublicKey>,
    pub to: Option<PublicKey>,
    pub value: u64,
    pub signature: Option<crate::crypto::Signature>,
    pub first_seen: i64,
    pub inner: Inner,
    #[serde(skip)]
    hash: Option<Hash>,
}

impl Transaction {
    pub fn new(data: Vec<u8>) -> Self {
        Transaction {
            data,
            from: None,
            to: None,
            value: 0,
            signature: None,
            first_seen: 0,
            inner: Inner::None,
            hash: None,
        }
    }

    pub fn with_to(mut self, to: PublicKey) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn with_inner(mut self, inner: Inner) -> Self {
        self.inner = inner;
        self
    }

    /// The canonical signing/hashing view: `signature` and `first_seen`
    /// forced to their zero values regardless of the transaction's actual
    /// current state, so re-signing and transient `first_seen` bookkeeping
    /// never change identity.
    fn canonical_bytes(&self) -> Vec<u8> {
        let view = Transaction {
            data: self.data.clone(),
            from: self.from,
            to: self.to,
            value: self.value,
            signature: None,
            first_seen: 0,
            inner: self.inner.clone(),
            hash: None,
        };
        codec::encode(&view)
    }

    fn compute_hash(&self) -> Hash {
        Hash::sha256(&self.canonical_bytes())
    }

    /// Returns the cached hash, computing and caching it on first call.
    pub fn get_hash(&mut self) -> Hash {
        if let Some(h) = self.hash {
            return h;
        }
        let h = self.compute_hash();
        self.hash = Some(h);
        h
    }

    pub fn sign(&mut self, private: &PrivateKey) {
        self.from = Some(private.public_key());
        self.signature = None;
        self.first_seen = 0;
        self.hash = None;
        let hash = self.get_hash();
        self.signature = Some(private.sign(hash.as_bytes()));
    }

    /// Verifies the signature against a *freshly computed* hash — never
    /// the cache — so a post-sign field mutation (e.g. a tampered `to`) is
    /// always caught rather than validated against a stale cached hash.
    pub fn verify(&self) -> Result<(), TxError> {
        let signature = self.signature.ok_or(TxError::NotSigned)?;
        let from = self.from.ok_or(TxError::NotSigned)?;
        let hash = self.compute_hash();
        if !signature.verify(&from, hash.as_bytes()) {
            return Err(TxError::VerifyFailed);
        }
        Ok(())
    }
}
