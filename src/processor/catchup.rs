//! Bulk replay of a contiguous epoch range, one transaction per epoch.

use super::epoch::{EpochError, EpochStage, EpochUpdater};
use crate::chain::{ChainClient, Epoch};
use crate::store::ChainStore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// How a catch-up pass ended.
#[derive(Debug)]
pub enum CatchupOutcome {
    /// Every epoch of the range was committed (or the range was empty).
    Completed,
    /// An epoch failed; later epochs were not attempted.
    Aborted(EpochError),
    /// Shutdown interrupted the pass.
    Cancelled,
}

#[derive(Debug)]
pub struct CatchupReport {
    pub resume: Epoch,
    pub target: Epoch,
    /// Highest epoch committed by this pass.
    pub last_committed: Option<Epoch>,
    pub epochs_processed: u64,
    pub outcome: CatchupOutcome,
}

impl CatchupReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, CatchupOutcome::Completed)
    }
}

pub struct CatchupRunner<C: ChainClient, S: ChainStore> {
    updater: EpochUpdater<C, S>,
}

impl<C: ChainClient, S: ChainStore> CatchupRunner<C, S> {
    pub fn new(updater: EpochUpdater<C, S>) -> Self {
        Self { updater }
    }

    /// Processes every epoch in `[resume, target]` in ascending order.
    ///
    /// The first failure stops the pass; the next pass recomputes its resume
    /// point from what was committed. Failures are logged and reported, never
    /// propagated.
    pub async fn run(&self, resume: Epoch, target: Epoch, cancel: &CancellationToken) -> CatchupReport {
        let span = tracing::info_span!(parent: self.updater.span(), "catchup", resume, target);
        self.run_range(resume, target, cancel).instrument(span).await
    }

    async fn run_range(&self, resume: Epoch, target: Epoch, cancel: &CancellationToken) -> CatchupReport {
        let mut report = CatchupReport {
            resume,
            target,
            last_committed: None,
            epochs_processed: 0,
            outcome: CatchupOutcome::Completed,
        };

        if resume > target {
            tracing::debug!(resume, target, "chain has not advanced; nothing to catch up");
            return report;
        }

        self.updater.telemetry().record_catchup_run();
        tracing::info!(resume, target, "catching up from epoch");

        for epoch in resume..=target {
            if cancel.is_cancelled() {
                tracing::info!(epoch, "catch-up cancelled before epoch");
                report.outcome = CatchupOutcome::Cancelled;
                return report;
            }

            match self.updater.process_epoch(epoch, cancel).await {
                Ok(_) => {
                    report.last_committed = Some(epoch);
                    report.epochs_processed += 1;
                }
                Err(err) => {
                    err.log("catchup");
                    report.outcome = match err.stage() {
                        EpochStage::Cancelled => CatchupOutcome::Cancelled,
                        _ => CatchupOutcome::Aborted(err),
                    };
                    return report;
                }
            }
        }

        tracing::info!(
            resume,
            target,
            processed = report.epochs_processed,
            "catch-up complete"
        );
        report
    }
}
