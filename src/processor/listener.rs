//! Live head-change handling.
//!
//! Events are consumed from one task in arrival order, so the per-event update
//! path never runs concurrently with itself. An event for the epoch right after
//! stored progress is written directly without the single-flight guard. An
//! event further ahead first fills every epoch in between as a guarded
//! catch-up pass, so progress never moves past an unwritten epoch.

use super::catchup::{CatchupOutcome, CatchupRunner};
use super::epoch::{EpochError, EpochStage, EpochUpdater};
use super::guard::SingleFlight;
use crate::chain::{ChainClient, Epoch, HeadEvent, HeadEventStream};
use crate::store::ChainStore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Result of handling a single head-change event.
#[derive(Debug)]
pub enum HeadOutcome {
    /// The event did not cross an epoch boundary.
    Ignored,
    /// Stored progress already covers the epoch.
    AlreadyProcessed(Epoch),
    Processed { epoch: Epoch, committees: usize },
    /// Missing epochs `from..=to` were written together with the event's epoch.
    Backfilled { from: Epoch, to: Epoch, epochs: u64 },
    /// A catch-up pass holds the guard; the gap is left for it or a later event.
    Deferred(Epoch),
    Cancelled(Epoch),
    Failed(EpochError),
}

/// Why the listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    Shutdown,
    StreamClosed,
}

pub struct HeadListener<C: ChainClient, S: ChainStore> {
    updater: EpochUpdater<C, S>,
    catchup: CatchupRunner<C, S>,
    guard: SingleFlight,
}

impl<C: ChainClient, S: ChainStore> HeadListener<C, S> {
    /// `guard` must be the one shared with bulk catch-up passes.
    pub fn new(updater: EpochUpdater<C, S>, guard: SingleFlight) -> Self {
        Self {
            catchup: CatchupRunner::new(updater.clone()),
            updater,
            guard,
        }
    }

    pub async fn on_head_updated(&self, event: HeadEvent, cancel: &CancellationToken) -> HeadOutcome {
        self.updater.telemetry().record_head_event();

        if !event.epoch_transition {
            tracing::trace!(slot = event.slot, "head update within epoch; ignoring");
            return HeadOutcome::Ignored;
        }

        let epoch = self.updater.chain_time().slot_to_epoch(event.slot);
        let span = tracing::info_span!(parent: self.updater.span(), "head", slot = event.slot, epoch);
        self.process_transition(epoch, cancel).instrument(span).await
    }

    async fn process_transition(&self, epoch: Epoch, cancel: &CancellationToken) -> HeadOutcome {
        let metadata = match self.updater.read_metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                let err = EpochError::new(epoch, EpochStage::ReadMetadata, err);
                err.log("head");
                self.updater.telemetry().record_epoch_failure();
                return HeadOutcome::Failed(err);
            }
        };

        let resume = metadata.resume_point(None);
        if epoch < resume {
            tracing::debug!(
                epoch,
                latest_epoch = metadata.latest_epoch,
                "epoch already processed"
            );
            return HeadOutcome::AlreadyProcessed(epoch);
        }
        if epoch > resume {
            return self.backfill(resume, epoch, cancel).await;
        }

        match self.updater.process_epoch(epoch, cancel).await {
            Ok(committees) => {
                tracing::info!(epoch, committees, "processed new epoch");
                HeadOutcome::Processed { epoch, committees }
            }
            Err(err) => {
                err.log("head");
                HeadOutcome::Failed(err)
            }
        }
    }

    async fn backfill(&self, resume: Epoch, epoch: Epoch, cancel: &CancellationToken) -> HeadOutcome {
        let Some(permit) = self.guard.try_enter() else {
            self.updater.telemetry().record_guard_denial();
            tracing::warn!(
                resume,
                epoch,
                "failed to obtain activity guard; head update deferred"
            );
            return HeadOutcome::Deferred(epoch);
        };

        tracing::info!(resume, epoch, "head is ahead of stored progress; filling gap");
        let report = self.catchup.run(resume, epoch, cancel).await;
        permit.exit();

        match report.outcome {
            CatchupOutcome::Completed => HeadOutcome::Backfilled {
                from: resume,
                to: epoch,
                epochs: report.epochs_processed,
            },
            CatchupOutcome::Aborted(err) => HeadOutcome::Failed(err),
            CatchupOutcome::Cancelled => HeadOutcome::Cancelled(epoch),
        }
    }

    /// Dispatches events until shutdown or until the chain closes the stream.
    pub async fn listen(&self, mut events: HeadEventStream, cancel: CancellationToken) -> ListenerExit {
        tracing::info!(parent: self.updater.span(), "listening for head updates");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(parent: self.updater.span(), "head listener shutting down");
                    return ListenerExit::Shutdown;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.on_head_updated(event, &cancel).await;
                    }
                    None => {
                        tracing::warn!(parent: self.updater.span(), "head event stream closed");
                        return ListenerExit::StreamClosed;
                    }
                }
            }
        }
    }
}
