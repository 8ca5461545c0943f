use crate::chain::Epoch;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Metadata key used when the configuration does not override it.
pub const DEFAULT_METADATA_KEY: &str = "beaconcommittees.standard";

/// Durable record of the last epoch whose committees were fully committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMetadata {
    pub latest_epoch: Epoch,
}

impl ProgressMetadata {
    pub fn new(latest_epoch: Epoch) -> Self {
        Self { latest_epoch }
    }

    /// Decodes a stored record. A missing record means nothing has been processed.
    pub fn decode(bytes: Option<&[u8]>) -> Result<Self> {
        match bytes {
            Some(bytes) => {
                serde_json::from_slice(bytes).context("failed to decode progress metadata")
            }
            None => Ok(Self::default()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to encode progress metadata")
    }

    /// First epoch the next run should process.
    ///
    /// An explicit override wins outright. Otherwise a non-zero `latest_epoch`
    /// resumes one past it, while zero is reprocessed: a zero counter cannot tell
    /// "epoch 0 done" apart from "nothing done yet".
    pub fn resume_point(&self, start_override: Option<Epoch>) -> Epoch {
        if let Some(epoch) = start_override {
            return epoch;
        }

        if self.latest_epoch > 0 {
            self.latest_epoch.saturating_add(1)
        } else {
            self.latest_epoch
        }
    }
}
