//! Transaction tracking for RPC idempotency.
//!
//! Datagram clients retransmit calls they believe were lost. The server must
//! not execute the same transaction twice, so completed and in-flight calls
//! are remembered by (xid, client address) for a retention period and
//! duplicates are dropped without a reply.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Tracks RPC transactions to detect and handle retransmissions.
///
/// Keyed by transaction ID (XID) plus client address; an XID alone is not
/// unique across clients. Entries for completed transactions expire after
/// the configured retention period, in-flight entries never expire.
pub struct TransactionTracker {
    retention_period: Duration,
    transactions: Mutex<HashMap<(u32, String), TransactionState>>,
}

impl TransactionTracker {
    pub fn new(retention_period: Duration) -> Self {
        Self { retention_period, transactions: Mutex::new(HashMap::new()) }
    }

    /// Checks whether the transaction has been seen before.
    ///
    /// A new transaction is recorded as in-progress and `false` is returned;
    /// a repeated (xid, client) pair returns `true` and the caller is
    /// expected to drop the message.
    pub fn is_retransmission(&self, xid: u32, client_addr: &str) -> bool {
        let key = (xid, client_addr.to_string());
        let mut transactions =
            self.transactions.lock().expect("unable to lock transactions mutex");
        expire_completed(&mut transactions, self.retention_period);
        if let std::collections::hash_map::Entry::Vacant(e) = transactions.entry(key) {
            e.insert(TransactionState::InProgress);
            false
        } else {
            true
        }
    }

    /// Marks a transaction as fully processed and responded to, starting its
    /// retention clock.
    pub fn mark_processed(&self, xid: u32, client_addr: &str) {
        let key = (xid, client_addr.to_string());
        let mut transactions =
            self.transactions.lock().expect("unable to lock transactions mutex");
        if let Some(tx) = transactions.get_mut(&key) {
            *tx = TransactionState::Completed(Instant::now());
        }
    }
}

/// Drops completed transactions older than the retention period. In-progress
/// transactions are kept regardless of age.
fn expire_completed(transactions: &mut HashMap<(u32, String), TransactionState>, max_age: Duration) {
    let now = Instant::now();
    transactions.retain(|_, v| match v {
        TransactionState::InProgress => true,
        TransactionState::Completed(completed_at) => {
            now.duration_since(*completed_at) < max_age
        }
    });
}

enum TransactionState {
    InProgress,
    Completed(Instant),
}
