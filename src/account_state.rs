//! Address -> balance map.
//!
//! Mirrors `core/account_state.go`'s operation table: `create`, `get`,
//! `add_balance`, `sub_balance`, `transfer`, all linearisable under a
//! single lock (shared for reads, exclusive for mutations).

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::crypto::Address;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("account already exists")]
    AlreadyExists,
    #[error("account not found")]
    AccountNotFound,
    #[error("insufficient balance")]
    InsufficientBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub balance: u64,
}

pub struct AccountState {
    accounts: RwLock<HashMap<Address, Account>>,
}

impl AccountState {
    pub fn new() -> Self {
        AccountState {
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, addr: Address) -> Result<(), StateError> {
        let mut accounts = self.accounts.write().unwrap();
        if accounts.contains_key(&addr) {
            return Err(StateError::AlreadyExists);
        }
        accounts.insert(addr, Account { address: addr, balance: 0 });
        Ok(())
    }

    pub fn get(&self, addr: Address) -> Result<Account, StateError> {
        self.accounts
            .read()
            .unwrap()
            .get(&addr)
            .copied()
            .ok_or(StateError::AccountNotFound)
    }

    pub fn balance(&self, addr: Address) -> Result<u64, StateError> {
        self.get(addr).map(|a| a.balance)
    }

    /// Adds `amount` to `to`'s balance, creating the account if absent.
    pub fn add_balance(&self, to: Address, amount: u64) {
        let mut accounts = self.accounts.write().unwrap();
        accounts
            .entry(to)
            .or_insert(Account { address: to, balance: 0 })
            .balance += amount;
    }

    pub fn sub_balance(&self, from: Address, amount: u64) -> Result<(), StateError> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts.get_mut(&from).ok_or(StateError::AccountNotFound)?;
        if account.balance < amount {
            return Err(StateError::InsufficientBalance);
        }
        account.balance -= amount;
        Ok(())
    }

    /// Atomically moves `amount` from `from` to `to` (both sides apply, or
    /// neither does). `to` is auto-created if absent.
    pub fn transfer(&self, from: Address, to: Address, amount: u64) -> Result<(), StateError> {
        let mut accounts = self.accounts.write().unwrap();
        let from_balance = accounts
            .get(&from)
            .ok_or(StateError::AccountNotFound)?
            .balance;
        if from_balance < amount {
            return Err(StateError::InsufficientBalance);
        }
        accounts.get_mut(&from).unwrap().balance -= amount;
        accounts
            .entry(to)
            .or_insert(Account { address: to, balance: 0 })
            .balance += amount;
        Ok(())
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    #[test]
    fn create_then_duplicate_fails() {
        let state = AccountState::new();
        state.create(addr(1)).unwrap();
        assert_eq!(state.create(addr(1)), Err(StateError::AlreadyExists));
    }

    #[test]
    fn get_missing_fails() {
        let state = AccountState::new();
        assert_eq!(state.get(addr(1)), Err(StateError::AccountNotFound));
    }

    #[test]
    fn add_balance_creates_on_absence() {
        let state = AccountState::new();
        state.add_balance(addr(1), 50);
        assert_eq!(state.balance(addr(1)).unwrap(), 50);
        state.add_balance(addr(1), 25);
        assert_eq!(state.balance(addr(1)).unwrap(), 75);
    }

    #[test]
    fn sub_balance_requires_sufficient_funds() {
        let state = AccountState::new();
        state.add_balance(addr(1), 10);
        assert_eq!(
            state.sub_balance(addr(1), 11),
            Err(StateError::InsufficientBalance)
        );
        assert!(state.sub_balance(addr(1), 10).is_ok());
        assert_eq!(state.balance(addr(1)).unwrap(), 0);
    }

    #[test]
    fn transfer_is_conservative() {
        let state = AccountState::new();
        state.add_balance(addr(1), 1000);
        state.transfer(addr(1), addr(2), 400).unwrap();
        assert_eq!(state.balance(addr(1)).unwrap(), 600);
        assert_eq!(state.balance(addr(2)).unwrap(), 400);
    }

    #[test]
    fn transfer_insufficient_leaves_balances_unchanged() {
        let state = AccountState::new();
        state.add_balance(addr(1), 10);
        assert_eq!(
            state.transfer(addr(1), addr(2), 11),
            Err(StateError::InsufficientBalance)
        );
        assert_eq!(state.balance(addr(1)).unwrap(), 10);
        assert_eq!(state.get(addr(2)), Err(StateError::AccountNotFound));
    }
}
