//! Node configuration.
//!
//! The reference implementation hardcodes a faucet address as a literal
//! inside the transfer path. Here it is a config field instead, so a
//! deployment can name its own faucet account rather than recompiling.

use std::time::Duration;

use crate::crypto::{Address, PrivateKey};

pub struct NodeConfig {
    pub id: String,
    pub block_time: Duration,
    /// Presence of a signing key makes this node a validator.
    pub private_key: Option<PrivateKey>,
    pub seed_peers: Vec<String>,
    pub mempool_max_length: usize,
    /// An address treated as an inexhaustible balance source: transfers
    /// into any recipient from this address credit the recipient without
    /// debiting it.
    pub faucet_address: Address,
}

impl NodeConfig {
    pub fn is_validator(&self) -> bool {
        self.private_key.is_some()
    }
}
