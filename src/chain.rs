//! The chain state machine: headers, blocks, derived indices, and the
//! account/contract state they mutate.
//!
//! Grounded on `core/blockchain.go` and `core/validator.go`. The reference
//! `Blockchain.AddBlock`/`BlockValidator.ValidateBlock` are stubs that
//! validate nothing and apply nothing; the checks and the block-apply
//! algorithm here are spelled out explicitly instead.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::account_state::{AccountState, StateError};
use crate::block::{Block, Header};
use crate::contract_state::ContractState;
use crate::crypto::{Address, Hash};
use crate::storage::Storage;
use crate::transaction::{Inner, Transaction, TxError};
use crate::vm::{VMError, VM};

/// Initial balance credited to the coinbase account at genesis, later
/// transferred in full to the genesis validator (if any). The reference
/// doesn't specify a figure, so this is a fixed constant.
const GENESIS_SUPPLY: u64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block height too high")]
    BlockTooHigh,
    #[error("block already in chain")]
    BlockAlreadyInChain,
    #[error("block prev_hash does not match the chain tip")]
    BlockPrevHashInvalid,
    #[error("block has no signature")]
    BlockNoSignature,
    #[error("block data_hash does not match its transactions")]
    BlockInvalidDataHash,
    #[error("block signature verification failed")]
    BlockVerifyFailed,
    #[error("height out of range")]
    HeightOutOfRange,
    #[error(transparent)]
    Transaction(#[from] TxError),
    #[error(transparent)]
    Vm(#[from] VMError),
    #[error(transparent)]
    State(#[from] StateError),
}

pub trait Validator {
    fn validate(&self, chain: &Chain, block: &Block) -> Result<(), ChainError>;
}

pub struct BlockValidator;

impl Validator for BlockValidator {
    fn validate(&self, chain: &Chain, block: &Block) -> Result<(), ChainError> {
        let current_height = chain.height();
        if block.header.height <= current_height {
            return Err(ChainError::BlockAlreadyInChain);
        }
        if block.header.height != current_height + 1 {
            return Err(ChainError::BlockTooHigh);
        }
        block.verify()?;
        let tip = chain
            .headers
            .last()
            .expect("chain always has at least a genesis header");
        if block.header.prev_hash != tip.hash() {
            return Err(ChainError::BlockPrevHashInvalid);
        }
        Ok(())
    }
}

pub struct Chain {
    headers: Vec<Header>,
    blocks: Vec<Block>,
    block_by_hash: HashMap<Hash, Block>,
    tx_by_hash: HashMap<Hash, Transaction>,
    collections: HashMap<Hash, crate::transaction::CollectionTx>,
    mints: HashMap<Hash, crate::transaction::MintTx>,
    pub account_state: AccountState,
    pub contract_state: ContractState,
    storage: Arc<dyn Storage>,
    faucet_address: Address,
}

impl Chain {
    /// Initialises account state with a funded coinbase account, applies
    /// `genesis` via the unvalidated path, then — if the genesis block
    /// names a validator — transfers the whole coinbase balance to it.
    pub fn new(
        mut genesis: Block,
        faucet_address: Address,
        storage: Arc<dyn Storage>,
    ) -> Result<Chain, ChainError> {
        let account_state = AccountState::new();
        let _ = account_state.create(Address::ZERO);
        account_state.add_balance(Address::ZERO, GENESIS_SUPPLY);

        let mut chain = Chain {
            headers: Vec::new(),
            blocks: Vec::new(),
            block_by_hash: HashMap::new(),
            tx_by_hash: HashMap::new(),
            collections: HashMap::new(),
            mints: HashMap::new(),
            account_state,
            contract_state: ContractState::new(),
            storage,
            faucet_address,
        };

        chain.apply_unvalidated(&mut genesis)?;

        if let Some(validator) = genesis.validator {
            let balance = chain.account_state.balance(Address::ZERO).unwrap_or(0);
            if balance > 0 {
                chain
                    .account_state
                    .transfer(Address::ZERO, validator.address(), balance)?;
            }
        }

        Ok(chain)
    }

    pub fn height(&self) -> u64 {
        (self.headers.len() as u64).saturating_sub(1)
    }

    pub fn version(&self) -> u32 {
        self.headers
            .last()
            .map(|h| h.version)
            .unwrap_or_default()
    }

    pub fn tip_header(&self) -> &Header {
        self.headers
            .last()
            .expect("chain always has at least a genesis header")
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Option<&Block> {
        self.block_by_hash.get(hash)
    }

    pub fn tx_by_hash(&self, hash: &Hash) -> Option<&Transaction> {
        self.tx_by_hash.get(hash)
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Blocks at heights `[from, to]` inclusive; `to == 0` means "up to the
    /// local height". Out-of-range bounds yield an empty result rather
    /// than an error — callers decide whether an empty range is notable.
    pub fn blocks_in_range(&self, from: u64, to: u64) -> Vec<Block> {
        let to = if to == 0 { self.height() } else { to };
        if from > to || from as usize >= self.blocks.len() {
            return Vec::new();
        }
        let to = (to as usize).min(self.blocks.len() - 1);
        self.blocks[from as usize..=to].to_vec()
    }

    pub fn add_block(&mut self, mut block: Block) -> Result<(), ChainError> {
        BlockValidator.validate(&*self, &block)?;
        self.apply_unvalidated(&mut block)
    }

    fn apply_unvalidated(&mut self, block: &mut Block) -> Result<(), ChainError> {
        for tx in &mut block.transactions {
            if !tx.data.is_empty() {
                let mut vm = VM::new(&tx.data, &self.contract_state);
                vm.run()?;
            }

            match tx.inner.clone() {
                Inner::None => {}
                Inner::Collection(collection) => {
                    let hash = tx.get_hash();
                    if self.collections.contains_key(&hash) {
                        return Err(TxError::DuplicateCollection.into());
                    }
                    self.collections.insert(hash, collection);
                }
                Inner::Mint(mint) => {
                    if !self.collections.contains_key(&mint.collection_hash) {
                        return Err(TxError::MissingCollection.into());
                    }
                    let hash = tx.get_hash();
                    self.mints.insert(hash, mint);
                }
            }

            if tx.value > 0 {
                let to_addr = tx.to.map(|pk| pk.address()).unwrap_or(Address::ZERO);
                match tx.from {
                    Some(from) if from.address() == self.faucet_address => {
                        self.account_state.add_balance(to_addr, tx.value);
                    }
                    Some(from) => {
                        self.account_state
                            .transfer(from.address(), to_addr, tx.value)?;
                    }
                    None => {
                        self.account_state.add_balance(to_addr, tx.value);
                    }
                }
            }

            let tx_hash = tx.get_hash();
            self.tx_by_hash.insert(tx_hash, tx.clone());
        }

        let block_hash = block.get_hash();
        self.headers.push(block.header.clone());
        self.blocks.push(block.clone());
        self.block_by_hash.insert(block_hash, block.clone());
        self.storage.put(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use crate::storage::MemStorage;

    fn new_chain() -> (Chain, crate::crypto::PrivateKey) {
        let (validator_key, validator_pub) = generate_keypair();
        let mut genesis = Block::genesis(vec![], 0);
        genesis.sign(&validator_key);
        let chain = Chain::new(genesis, Address::ZERO, Arc::new(MemStorage::new())).unwrap();
        assert_eq!(
            chain.account_state.balance(validator_pub.address()).unwrap(),
            GENESIS_SUPPLY
        );
        (chain, validator_key)
    }

    #[test]
    fn genesis_height_is_zero() {
        let (chain, _) = new_chain();
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn empty_block_advances_height_and_chains_prev_hash() {
        let (mut chain, validator_key) = new_chain();
        let mut block = Block::new_with_prev_header(chain.tip_header(), vec![], 1);
        block.sign(&validator_key);
        let expected_prev_hash = chain.tip_header().hash();
        chain.add_block(block).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.headers()[1].prev_hash, expected_prev_hash);
    }

    #[test]
    fn value_transfer_moves_balance() {
        let (mut chain, validator_key) = new_chain();
        let (bob_key, bob_pub) = generate_keypair();
        let (_, alice_pub) = generate_keypair();
        chain.account_state.add_balance(bob_pub.address(), 1000);

        let mut tx = Transaction::new(vec![]).with_to(alice_pub).with_value(1000);
        tx.sign(&bob_key);

        let mut block = Block::new_with_prev_header(chain.tip_header(), vec![tx], 1);
        block.sign(&validator_key);
        chain.add_block(block).unwrap();

        assert_eq!(chain.account_state.balance(bob_pub.address()).unwrap(), 0);
        assert_eq!(
            chain.account_state.balance(alice_pub.address()).unwrap(),
            1000
        );
    }

    #[test]
    fn tampered_to_is_rejected_and_balances_unchanged() {
        let (mut chain, validator_key) = new_chain();
        let (bob_key, bob_pub) = generate_keypair();
        let (_, alice_pub) = generate_keypair();
        let (_, hacker_pub) = generate_keypair();
        chain.account_state.add_balance(bob_pub.address(), 1000);

        let mut tx = Transaction::new(vec![]).with_to(alice_pub).with_value(1000);
        tx.sign(&bob_key);
        tx.to = Some(hacker_pub);

        let mut block = Block::new_with_prev_header(chain.tip_header(), vec![tx], 1);
        block.sign(&validator_key);
        let result = chain.add_block(block);
        assert!(matches!(result, Err(ChainError::Transaction(TxError::VerifyFailed))));
        assert_eq!(chain.account_state.balance(bob_pub.address()).unwrap(), 1000);
        assert!(chain.account_state.balance(alice_pub.address()).is_err());
    }

    #[test]
    fn block_too_high_is_rejected() {
        let (mut chain, validator_key) = new_chain();
        let prev = chain.tip_header().clone();
        let mut skip = Block::new_with_prev_header(&prev, vec![], 1);
        skip.header.height += 1; // now two ahead of the tip
        skip.sign(&validator_key);
        assert!(matches!(
            chain.add_block(skip),
            Err(ChainError::BlockTooHigh)
        ));
    }

    #[test]
    fn already_in_chain_is_rejected() {
        let (mut chain, validator_key) = new_chain();
        let mut dup = Block::genesis(vec![], 0);
        dup.sign(&validator_key);
        assert!(matches!(
            chain.add_block(dup),
            Err(ChainError::BlockAlreadyInChain)
        ));
    }
}
