//! In-process transactional store. Writes are staged on the transaction and
//! applied atomically on commit; cancelling discards them.

use super::{BeaconCommittee, BeaconCommitteesSetter, ChainStore, StoreFuture};
use crate::chain::Slot;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    metadata: HashMap<String, Vec<u8>>,
    committees: BTreeMap<(Slot, u64), BeaconCommittee>,
    committee_commits: HashMap<(Slot, u64), u64>,
    transactions_begun: u64,
    commits: u64,
    cancellations: u64,
}

/// Pending writes of an open [`MemoryStore`] transaction.
#[derive(Debug, Default)]
pub struct MemoryTx {
    metadata: Vec<(String, Vec<u8>)>,
    committees: Vec<BeaconCommittee>,
}

impl MemoryTx {
    pub fn staged_committees(&self) -> usize {
        self.committees.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds committed metadata outside of any transaction.
    pub fn put_metadata(&self, key: impl Into<String>, value: Vec<u8>) -> Result<()> {
        self.lock()?.metadata.insert(key.into(), value);
        Ok(())
    }

    pub fn committed_metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.metadata.get(key).cloned())
    }

    /// Committed committees ordered by `(slot, index)`.
    pub fn committees(&self) -> Result<Vec<BeaconCommittee>> {
        Ok(self.lock()?.committees.values().cloned().collect())
    }

    /// Number of committed transactions that wrote the `(slot, index)` committee.
    pub fn committee_commit_count(&self, slot: Slot, index: u64) -> Result<u64> {
        Ok(self
            .lock()?
            .committee_commits
            .get(&(slot, index))
            .copied()
            .unwrap_or(0))
    }

    pub fn transactions_begun(&self) -> Result<u64> {
        Ok(self.lock()?.transactions_begun)
    }

    pub fn commits(&self) -> Result<u64> {
        Ok(self.lock()?.commits)
    }

    pub fn cancellations(&self) -> Result<u64> {
        Ok(self.lock()?.cancellations)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn apply(&self, tx: MemoryTx) -> Result<()> {
        let mut state = self.lock()?;
        for (key, value) in tx.metadata {
            state.metadata.insert(key, value);
        }
        for committee in tx.committees {
            let key = (committee.slot, committee.index);
            *state.committee_commits.entry(key).or_insert(0) += 1;
            state.committees.insert(key, committee);
        }
        state.commits += 1;
        Ok(())
    }
}

impl ChainStore for MemoryStore {
    type Tx = MemoryTx;

    fn begin_tx(&self) -> StoreFuture<'_, Self::Tx> {
        Box::pin(async move {
            self.lock()?.transactions_begun += 1;
            Ok(MemoryTx::default())
        })
    }

    fn commit_tx(&self, tx: Self::Tx) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.apply(tx) })
    }

    fn cancel_tx(&self, tx: Self::Tx) {
        drop(tx);
        match self.lock() {
            Ok(mut state) => state.cancellations += 1,
            Err(err) => tracing::warn!(error = %err, "failed to record cancelled transaction"),
        }
    }

    fn metadata<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move { self.committed_metadata(key) })
    }

    fn set_metadata<'a>(
        &'a self,
        tx: &'a mut Self::Tx,
        key: &'a str,
        value: Vec<u8>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            tx.metadata.push((key.to_owned(), value));
            Ok(())
        })
    }

    fn beacon_committees_setter(&self) -> Option<Arc<dyn BeaconCommitteesSetter<Self::Tx>>> {
        Some(Arc::new(MemoryCommitteesSetter))
    }
}

struct MemoryCommitteesSetter;

impl BeaconCommitteesSetter<MemoryTx> for MemoryCommitteesSetter {
    fn set_beacon_committee<'a>(
        &'a self,
        tx: &'a mut MemoryTx,
        committee: &'a BeaconCommittee,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            tx.committees.push(committee.clone());
            Ok(())
        })
    }
}
