//! Bounded transaction pool.
//!
//! Grounded on `network/tx_pool.go` and `network/tx_sorter.go`, redesigned
//! so that "oldest" means insertion order, applied consistently to both
//! eviction and `pending()` iteration. The reference instead sorts by
//! `FirstSeen`, a value the caller controls and that conflates two
//! concepts: arrival order and pool membership order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::crypto::Hash;
use crate::transaction::Transaction;

struct Inner {
    all_order: VecDeque<Hash>,
    all: HashMap<Hash, Transaction>,
    pending_order: VecDeque<Hash>,
    pending: HashSet<Hash>,
}

pub struct Mempool {
    max_length: usize,
    inner: Mutex<Inner>,
}

impl Mempool {
    pub fn new(max_length: usize) -> Self {
        Mempool {
            max_length,
            inner: Mutex::new(Inner {
                all_order: VecDeque::new(),
                all: HashMap::new(),
                pending_order: VecDeque::new(),
                pending: HashSet::new(),
            }),
        }
    }

    /// Inserts `tx` keyed by its hash. A hash already present is a no-op.
    /// When already at capacity, the oldest entry (by insertion order) is
    /// evicted first to make room.
    pub fn add(&self, mut tx: Transaction) {
        let hash = tx.get_hash();
        let mut inner = self.inner.lock().unwrap();
        if inner.all.contains_key(&hash) {
            return;
        }
        if inner.all.len() >= self.max_length {
            if let Some(oldest) = inner.all_order.pop_front() {
                inner.all.remove(&oldest);
                inner.pending.remove(&oldest);
                if let Some(pos) = inner.pending_order.iter().position(|h| *h == oldest) {
                    inner.pending_order.remove(pos);
                }
            }
        }
        inner.all_order.push_back(hash);
        inner.all.insert(hash, tx);
        inner.pending_order.push_back(hash);
        inner.pending.insert(hash);
    }

    /// Currently pending transactions, in insertion order.
    pub fn pending(&self) -> Vec<Transaction> {
        let inner = self.inner.lock().unwrap();
        inner
            .pending_order
            .iter()
            .filter_map(|h| inner.all.get(h).cloned())
            .collect()
    }

    /// Empties the pending view; `all` (and its capacity accounting) is
    /// left intact.
    pub fn clear_pending(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending_order.clear();
        inner.pending.clear();
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().unwrap().all.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
