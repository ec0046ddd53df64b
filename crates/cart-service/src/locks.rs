//! Per-cart serialization of commands.

use std::collections::HashMap;
use std::sync::Arc;

use common::AggregateId;
use tokio::sync::{Mutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 1024;

/// Hands out one async lock per aggregate id.
///
/// Commands for the same cart run one after the other inside this process;
/// commands for different carts never wait on each other. Entries nobody
/// holds are dropped once the map grows past a threshold.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the caller holds the lock for `id`.
    pub async fn lock(&self, id: &AggregateId) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(id.clone()).or_default().clone()
        };
        entry.lock_owned().await
    }

    /// Number of ids currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
