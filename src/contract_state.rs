//! Bytes -> bytes key/value store backing the VM's `STORE`/`GET` opcodes.
//!
//! Mirrors `core/state.go`: no ordering guarantees, no persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractStateError {
    #[error("key not found")]
    NotFound,
}

#[derive(Default)]
pub struct ContractState {
    data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl ContractState {
    pub fn new() -> Self {
        ContractState {
            data: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.data.write().unwrap().insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, ContractStateError> {
        self.data
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(ContractStateError::NotFound)
    }

    pub fn delete(&self, key: &[u8]) {
        self.data.write().unwrap().remove(key);
    }
}
