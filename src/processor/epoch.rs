//! Fetch-and-persist unit for a single epoch.
//!
//! Every epoch is written in its own transaction together with the progress
//! metadata, so committed committee data and `latest_epoch` never disagree.

use crate::chain::{ChainClient, ChainTime, CommitteeAssignment, Epoch};
use crate::runtime::hooks::{run_cancellable, HookDecision};
use crate::runtime::progress::ProgressMetadata;
use crate::runtime::telemetry::Telemetry;
use crate::store::{BeaconCommittee, BeaconCommitteesSetter, ChainStore};
use anyhow::{anyhow, bail, Context, Error as AnyError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

/// Step of [`EpochUpdater::process_epoch`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochStage {
    ReadMetadata,
    BeginTx,
    Fetch,
    SetMetadata,
    Commit,
    Cancelled,
}

/// Failure to process one epoch. The epoch's transaction has been aborted.
#[derive(Debug)]
pub struct EpochError {
    epoch: Epoch,
    stage: EpochStage,
    source: AnyError,
}

impl EpochError {
    pub fn new(epoch: Epoch, stage: EpochStage, source: AnyError) -> Self {
        Self {
            epoch,
            stage,
            source,
        }
    }

    fn cancelled(epoch: Epoch) -> Self {
        Self::new(
            epoch,
            EpochStage::Cancelled,
            anyhow!("epoch processing cancelled"),
        )
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn stage(&self) -> EpochStage {
        self.stage
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }

    /// Logs the failure at the severity its stage deserves.
    pub(crate) fn log(&self, context: &'static str) {
        match self.stage {
            EpochStage::Cancelled => {
                tracing::info!(epoch = self.epoch, context, "epoch processing cancelled")
            }
            EpochStage::Fetch => tracing::warn!(
                epoch = self.epoch,
                context,
                error = %self.source,
                "failed to update beacon committees"
            ),
            stage => tracing::error!(
                epoch = self.epoch,
                context,
                stage = ?stage,
                error = %self.source,
                "epoch transaction failed"
            ),
        }
    }
}

impl std::fmt::Display for EpochError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "epoch {} failed at {:?}: {}",
            self.epoch, self.stage, self.source
        )
    }
}

impl std::error::Error for EpochError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<CommitteeAssignment> for BeaconCommittee {
    fn from(assignment: CommitteeAssignment) -> Self {
        Self {
            slot: assignment.slot,
            index: assignment.index,
            committee: assignment.validators,
        }
    }
}

pub struct EpochUpdaterParams<C: ChainClient, S: ChainStore> {
    pub chain: Arc<C>,
    pub chain_time: Arc<dyn ChainTime>,
    pub store: Arc<S>,
    pub telemetry: Arc<Telemetry>,
    pub metadata_key: String,
    pub span: Span,
}

/// Fetches one epoch's committees from the chain and writes them through the
/// store's committee capability.
pub struct EpochUpdater<C: ChainClient, S: ChainStore> {
    chain: Arc<C>,
    chain_time: Arc<dyn ChainTime>,
    store: Arc<S>,
    setter: Arc<dyn BeaconCommitteesSetter<S::Tx>>,
    telemetry: Arc<Telemetry>,
    metadata_key: Arc<str>,
    span: Span,
}

impl<C: ChainClient, S: ChainStore> Clone for EpochUpdater<C, S> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            chain_time: Arc::clone(&self.chain_time),
            store: Arc::clone(&self.store),
            setter: Arc::clone(&self.setter),
            telemetry: Arc::clone(&self.telemetry),
            metadata_key: Arc::clone(&self.metadata_key),
            span: self.span.clone(),
        }
    }
}

impl<C: ChainClient, S: ChainStore> EpochUpdater<C, S> {
    /// Fails if the store cannot persist beacon committees.
    pub fn new(params: EpochUpdaterParams<C, S>) -> Result<Self> {
        let EpochUpdaterParams {
            chain,
            chain_time,
            store,
            telemetry,
            metadata_key,
            span,
        } = params;

        let Some(setter) = store.beacon_committees_setter() else {
            bail!("chain store does not support beacon committee setting");
        };

        Ok(Self {
            chain,
            chain_time,
            store,
            setter,
            telemetry,
            metadata_key: Arc::from(metadata_key),
            span,
        })
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    pub fn chain_time(&self) -> &Arc<dyn ChainTime> {
        &self.chain_time
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Reads the committed progress record.
    pub async fn read_metadata(&self) -> Result<ProgressMetadata> {
        let bytes = self
            .store
            .metadata(&self.metadata_key)
            .await
            .context("failed to read progress metadata")?;
        ProgressMetadata::decode(bytes.as_deref())
    }

    /// Fetches the committees of `epoch` and stages them in `tx`. Returns the
    /// number of committees written.
    pub async fn update_committees_for_epoch(&self, tx: &mut S::Tx, epoch: Epoch) -> Result<usize> {
        let state_slot = self.chain_time.first_slot_of_epoch(epoch);
        let assignments = self
            .chain
            .beacon_committees(state_slot)
            .await
            .with_context(|| format!("failed to fetch beacon committees for epoch {epoch}"))?;

        let mut written = 0;
        for assignment in assignments {
            let assignment_epoch = self.chain_time.slot_to_epoch(assignment.slot);
            if assignment_epoch != epoch {
                bail!(
                    "committee for slot {} belongs to epoch {assignment_epoch}, expected {epoch}",
                    assignment.slot
                );
            }

            let committee = BeaconCommittee::from(assignment);
            self.setter
                .set_beacon_committee(tx, &committee)
                .await
                .with_context(|| {
                    format!(
                        "failed to set beacon committee {} at slot {}",
                        committee.index, committee.slot
                    )
                })?;
            written += 1;
        }

        Ok(written)
    }

    /// Writes `epoch` and advances progress to it inside a single transaction.
    pub async fn process_epoch(
        &self,
        epoch: Epoch,
        cancel: &CancellationToken,
    ) -> Result<usize, EpochError> {
        let span = tracing::debug_span!(parent: &self.span, "process_epoch", epoch);
        let result = self.process_epoch_in_tx(epoch, cancel).instrument(span).await;
        if let Err(err) = &result {
            if err.stage() != EpochStage::Cancelled {
                self.telemetry.record_epoch_failure();
            }
        }
        result
    }

    async fn process_epoch_in_tx(
        &self,
        epoch: Epoch,
        cancel: &CancellationToken,
    ) -> Result<usize, EpochError> {
        let mut tx = match run_cancellable(cancel, self.store.begin_tx()).await {
            HookDecision::Finished(Ok(tx)) => tx,
            HookDecision::Finished(Err(err)) => {
                return Err(EpochError::new(epoch, EpochStage::BeginTx, err));
            }
            HookDecision::Cancelled => return Err(EpochError::cancelled(epoch)),
        };

        let decision =
            run_cancellable(cancel, self.update_committees_for_epoch(&mut tx, epoch)).await;
        let written = match decision {
            HookDecision::Finished(Ok(written)) => written,
            HookDecision::Finished(Err(err)) => {
                return Err(self.abort(tx, EpochError::new(epoch, EpochStage::Fetch, err)));
            }
            HookDecision::Cancelled => return Err(self.abort(tx, EpochError::cancelled(epoch))),
        };

        let encoded = match ProgressMetadata::new(epoch).encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                return Err(self.abort(tx, EpochError::new(epoch, EpochStage::SetMetadata, err)));
            }
        };
        let decision = run_cancellable(
            cancel,
            self.store.set_metadata(&mut tx, &self.metadata_key, encoded),
        )
        .await;
        match decision {
            HookDecision::Finished(Ok(())) => {}
            HookDecision::Finished(Err(err)) => {
                return Err(self.abort(tx, EpochError::new(epoch, EpochStage::SetMetadata, err)));
            }
            HookDecision::Cancelled => return Err(self.abort(tx, EpochError::cancelled(epoch))),
        }

        self.store
            .commit_tx(tx)
            .await
            .map_err(|err| EpochError::new(epoch, EpochStage::Commit, err))?;

        self.telemetry.record_epoch_processed(epoch);
        tracing::debug!(epoch, committees = written, "committed epoch");
        Ok(written)
    }

    fn abort(&self, tx: S::Tx, error: EpochError) -> EpochError {
        self.store.cancel_tx(tx);
        error
    }
}
