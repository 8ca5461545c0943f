//! Chain-source boundary: epoch/slot identifiers, committee assignments as
//! served by the beacon node, head-change events, and chain time.

pub mod time;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

pub use time::{ChainTime, GenesisChainTime};

/// Sequentially numbered unit of chain time.
pub type Epoch = u64;
/// Slot number within the chain; `slots_per_epoch` slots make one epoch.
pub type Slot = u64;
/// 32-byte block or state root.
pub type Root = [u8; 32];

pub type ChainFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Receiving half of a head-change subscription. The stream ends when the
/// chain client drops its sender, which the listener treats as a failure.
pub type HeadEventStream = mpsc::Receiver<HeadEvent>;

/// Committee assignment for a single `(slot, index)` pair as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeAssignment {
    pub slot: Slot,
    pub index: u64,
    pub validators: Vec<u64>,
}

/// Live notification that the chain tip advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadEvent {
    pub slot: Slot,
    pub block: Root,
    pub state: Root,
    pub epoch_transition: bool,
}

/// Authoritative chain source supplying committee data and head updates.
pub trait ChainClient: Send + Sync + 'static {
    /// Fetches every committee assignment of the state at `state_slot`.
    fn beacon_committees(&self, state_slot: Slot) -> ChainFuture<'_, Vec<CommitteeAssignment>>;

    /// Subscribes to head-change events. Events are expected in non-decreasing
    /// slot order.
    fn subscribe_head(&self) -> ChainFuture<'_, HeadEventStream>;
}
