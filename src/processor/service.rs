//! Committee synchronizer service.
//!
//! [`CommitteeService::new`] validates the collaborators and returns at once
//! together with an unstarted [`SyncTask`]. Spawning the task runs the startup
//! sequence in the background:
//! 1. read stored progress (fatal on failure),
//! 2. derive the resume point,
//! 3. enter the single-flight guard (a denial skips startup),
//! 4. catch up to the current epoch, releasing the guard afterwards,
//! 5. subscribe to head updates (fatal on failure) and dispatch them until
//!    shutdown.
//!
//! Fatal conditions are captured by the task's [`FatalErrorHandler`] and
//! surfaced through [`SyncHandle`]; the process is never terminated from here.

use super::catchup::{CatchupReport, CatchupRunner};
use super::epoch::{EpochUpdater, EpochUpdaterParams};
use super::guard::{SingleFlight, SingleFlightPermit};
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::listener::{HeadListener, HeadOutcome, ListenerExit};
use crate::chain::{ChainClient, ChainTime, Epoch, HeadEvent};
use crate::runtime::config::SyncConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::hooks::{run_cancellable, HookDecision};
use crate::runtime::telemetry::Telemetry;
use crate::store::ChainStore;
use anyhow::{anyhow, Context, Error, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub struct ServiceParams<C: ChainClient, S: ChainStore> {
    pub config: SyncConfig,
    pub chain: Arc<C>,
    pub chain_time: Arc<dyn ChainTime>,
    pub store: Arc<S>,
    pub telemetry: Arc<Telemetry>,
}

pub struct CommitteeService<C: ChainClient, S: ChainStore> {
    inner: Arc<ServiceInner<C, S>>,
}

struct ServiceInner<C: ChainClient, S: ChainStore> {
    config: SyncConfig,
    updater: EpochUpdater<C, S>,
    catchup: CatchupRunner<C, S>,
    listener: HeadListener<C, S>,
    guard: SingleFlight,
}

impl<C: ChainClient, S: ChainStore> Clone for CommitteeService<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ChainClient, S: ChainStore> CommitteeService<C, S> {
    /// Builds the service and its startup task without spawning anything.
    ///
    /// Fails if the store does not expose the beacon committee capability.
    pub fn new(params: ServiceParams<C, S>) -> Result<(Self, SyncTask<C, S>)> {
        let ServiceParams {
            config,
            chain,
            chain_time,
            store,
            telemetry,
        } = params;

        config.validate().context("invalid sync configuration")?;

        let span = tracing::info_span!("beaconcommittees", backend = "standard");
        let updater = EpochUpdater::new(EpochUpdaterParams {
            chain,
            chain_time,
            store,
            telemetry,
            metadata_key: config.metadata_key().to_owned(),
            span,
        })
        .context("problem with parameters")?;

        let guard = SingleFlight::new();
        let service = Self {
            inner: Arc::new(ServiceInner {
                config,
                catchup: CatchupRunner::new(updater.clone()),
                listener: HeadListener::new(updater.clone(), guard.clone()),
                updater,
                guard,
            }),
        };
        let task = SyncTask {
            service: service.clone(),
        };

        Ok((service, task))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.inner.updater.telemetry().clone()
    }

    /// Whether a catch-up pass currently holds the single-flight guard.
    pub fn is_catching_up(&self) -> bool {
        self.inner.guard.is_active()
    }

    /// Last epoch recorded as fully processed in the store.
    pub async fn latest_epoch(&self) -> Result<Epoch> {
        Ok(self.inner.updater.read_metadata().await?.latest_epoch)
    }

    /// Per-event update path invoked for each head-change notification.
    pub async fn on_head_updated(&self, event: HeadEvent, cancel: &CancellationToken) -> HeadOutcome {
        self.inner.listener.on_head_updated(event, cancel).await
    }

    /// Catches up from stored progress to the current epoch.
    ///
    /// Returns `Ok(None)` when another pass already holds the guard.
    pub async fn catch_up(&self, cancel: &CancellationToken) -> Result<Option<CatchupReport>> {
        let metadata = self.inner.updater.read_metadata().await?;
        let resume = metadata.resume_point(None);

        let Some(permit) = self.enter("manual") else {
            return Ok(None);
        };
        let report = self.catch_up_to_head(resume, cancel).await;
        permit.exit();
        Ok(Some(report))
    }

    /// Runs one guarded pass over exactly `[resume, target]`.
    ///
    /// Returns `None` when another pass already holds the guard.
    pub async fn catch_up_range(
        &self,
        resume: Epoch,
        target: Epoch,
        cancel: &CancellationToken,
    ) -> Option<CatchupReport> {
        let permit = self.enter("range")?;
        let report = self.inner.catchup.run(resume, target, cancel).await;
        permit.exit();
        Some(report)
    }

    fn enter(&self, trigger: &'static str) -> Option<SingleFlightPermit> {
        let permit = self.inner.guard.try_enter();
        if permit.is_none() {
            self.inner.updater.telemetry().record_guard_denial();
            tracing::warn!(
                parent: self.inner.updater.span(),
                trigger,
                "failed to obtain activity guard; catch-up deferred"
            );
        }
        permit
    }

    /// Catches up to the current epoch, following the chain if it advances
    /// while a pass is running. Must be called with the guard held.
    async fn catch_up_to_head(&self, resume: Epoch, cancel: &CancellationToken) -> CatchupReport {
        let chain_time = self.inner.updater.chain_time();
        let mut target = chain_time.current_epoch();
        let mut report = self.inner.catchup.run(resume, target, cancel).await;

        loop {
            if !report.is_completed() {
                return report;
            }

            let head = chain_time.current_epoch();
            if head <= target {
                return report;
            }

            let next_resume = resume.max(target.saturating_add(1));
            let next = self.inner.catchup.run(next_resume, head, cancel).await;
            report.target = head;
            report.epochs_processed += next.epochs_processed;
            report.last_committed = next.last_committed.or(report.last_committed);
            report.outcome = next.outcome;
            target = head;
        }
    }

    async fn run_startup(self, run_token: CancellationToken, fatal: FatalErrorHandler) {
        let metadata = match self.inner.updater.read_metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                fatal.trigger("failed to obtain metadata before catch-up", err);
                return;
            }
        };

        let resume = metadata.resume_point(self.inner.config.start_epoch());
        tracing::info!(
            resume,
            latest_epoch = metadata.latest_epoch,
            start_override = ?self.inner.config.start_epoch(),
            "catching up from epoch"
        );

        let Some(permit) = self.enter("startup") else {
            return;
        };
        let report = self.catch_up_to_head(resume, &run_token).await;
        permit.exit();
        tracing::debug!(
            processed = report.epochs_processed,
            last_committed = ?report.last_committed,
            outcome = ?report.outcome,
            "startup catch-up finished"
        );

        let events = match run_cancellable(&run_token, self.inner.updater.chain().subscribe_head()).await {
            HookDecision::Finished(Ok(events)) => events,
            HookDecision::Finished(Err(err)) => {
                fatal.trigger("failed to add beacon chain head updated handler", err);
                return;
            }
            HookDecision::Cancelled => return,
        };

        match self.inner.listener.listen(events, run_token).await {
            ListenerExit::Shutdown => {}
            ListenerExit::StreamClosed => {
                fatal.trigger(
                    "beacon chain head updates stopped",
                    anyhow!("head event stream closed unexpectedly"),
                );
            }
        }
    }
}

/// Startup work of a [`CommitteeService`], not yet running.
pub struct SyncTask<C: ChainClient, S: ChainStore> {
    service: CommitteeService<C, S>,
}

impl<C: ChainClient, S: ChainStore> SyncTask<C, S> {
    /// Spawns the startup sequence and the metrics reporter. Both stop when
    /// `shutdown_root` (or the returned handle) is cancelled; a fatal error
    /// cancels `shutdown_root`.
    pub fn spawn(self, shutdown_root: &CancellationToken) -> SyncHandle {
        let service = self.service;
        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root,
            telemetry: service.telemetry(),
            guard: service.inner.guard.clone(),
            metrics_interval: service.inner.config.metrics_interval(),
        });
        let fatal = lifecycle.fatal_handler();
        let run_token = lifecycle.run_token.clone();
        let span = service.inner.updater.span().clone();

        let task = tokio::spawn(
            service
                .run_startup(run_token.clone(), fatal.clone())
                .instrument(span),
        );

        SyncHandle {
            run_token,
            fatal,
            lifecycle: Some(lifecycle),
            task: Some(task),
        }
    }
}

/// Handle to a spawned [`SyncTask`]. The owner decides when to stop it and how
/// to react to fatal errors.
pub struct SyncHandle {
    run_token: CancellationToken,
    fatal: FatalErrorHandler,
    lifecycle: Option<LifecycleHandles>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.run_token.clone()
    }

    pub fn fatal_error(&self) -> Option<Error> {
        self.fatal.error()
    }

    /// Resolves once the task reports a fatal error.
    pub async fn wait_for_fatal(&self) -> Error {
        self.fatal.wait().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancels the task, joins it, and returns any fatal error it captured.
    pub async fn stop(mut self) -> Result<()> {
        self.run_token.cancel();

        let mut task_error: Option<Error> = None;
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "sync task terminated unexpectedly");
                task_error = Some(err.into());
            }
        }

        let lifecycle_error = self.lifecycle.as_ref().and_then(LifecycleHandles::error);
        if let Some(lifecycle) = self.lifecycle.take() {
            lifecycle.shutdown().await;
        }

        match task_error.or(lifecycle_error) {
            Some(err) => Err(err).context("epoch sync aborted"),
            None => Ok(()),
        }
    }
}
