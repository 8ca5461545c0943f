use super::{Epoch, Slot};
use anyhow::{bail, Result};
use std::time::{Duration, SystemTime};

/// Maps wall-clock time and slots onto epochs.
pub trait ChainTime: Send + Sync + 'static {
    /// Epoch the chain is currently in.
    fn current_epoch(&self) -> Epoch;

    fn slot_to_epoch(&self, slot: Slot) -> Epoch;

    fn first_slot_of_epoch(&self, epoch: Epoch) -> Slot;
}

/// Chain time derived from the genesis timestamp and the slot schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisChainTime {
    genesis: SystemTime,
    slot_duration: Duration,
    slots_per_epoch: u64,
}

impl GenesisChainTime {
    pub fn new(genesis: SystemTime, slot_duration: Duration, slots_per_epoch: u64) -> Result<Self> {
        if slot_duration.is_zero() {
            bail!("slot_duration must be greater than 0");
        }
        if slots_per_epoch == 0 {
            bail!("slots_per_epoch must be greater than 0");
        }

        Ok(Self {
            genesis,
            slot_duration,
            slots_per_epoch,
        })
    }

    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    /// Slot active at `now`. Anything before genesis is slot 0.
    pub fn slot_at(&self, now: SystemTime) -> Slot {
        match now.duration_since(self.genesis) {
            Ok(elapsed) => (elapsed.as_nanos() / self.slot_duration.as_nanos()) as Slot,
            Err(_) => 0,
        }
    }

    pub fn epoch_at(&self, now: SystemTime) -> Epoch {
        self.slot_to_epoch(self.slot_at(now))
    }
}

impl ChainTime for GenesisChainTime {
    fn current_epoch(&self) -> Epoch {
        self.epoch_at(SystemTime::now())
    }

    fn slot_to_epoch(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    fn first_slot_of_epoch(&self, epoch: Epoch) -> Slot {
        epoch.saturating_mul(self.slots_per_epoch)
    }
}
