//! Persistence boundary: transactional access to service metadata and the
//! optional beacon committee write capability.

pub mod memory;

use crate::chain::Slot;
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

pub use memory::MemoryStore;

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Beacon committee as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconCommittee {
    pub slot: Slot,
    pub index: u64,
    pub committee: Vec<u64>,
}

/// Write capability for beacon committees, scoped to the store's transaction type.
pub trait BeaconCommitteesSetter<Tx>: Send + Sync {
    fn set_beacon_committee<'a>(
        &'a self,
        tx: &'a mut Tx,
        committee: &'a BeaconCommittee,
    ) -> StoreFuture<'a, ()>;
}

/// Persistence engine providing transactions and keyed service metadata.
///
/// Dropping a transaction without committing it must leave the committed state
/// untouched; [`ChainStore::cancel_tx`] makes that abort explicit.
pub trait ChainStore: Send + Sync + 'static {
    type Tx: Send + 'static;

    fn begin_tx(&self) -> StoreFuture<'_, Self::Tx>;

    fn commit_tx(&self, tx: Self::Tx) -> StoreFuture<'_, ()>;

    fn cancel_tx(&self, tx: Self::Tx);

    /// Reads the committed metadata stored under `key`.
    fn metadata<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    fn set_metadata<'a>(
        &'a self,
        tx: &'a mut Self::Tx,
        key: &'a str,
        value: Vec<u8>,
    ) -> StoreFuture<'a, ()>;

    /// Returns the committee write capability, or `None` if the store cannot
    /// persist beacon committees.
    fn beacon_committees_setter(&self) -> Option<Arc<dyn BeaconCommitteesSetter<Self::Tx>>>;
}
