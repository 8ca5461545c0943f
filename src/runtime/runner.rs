use crate::chain::ChainClient;
use crate::processor::service::{CommitteeService, ServiceParams, SyncHandle, SyncTask};
use crate::runtime::telemetry;
use crate::store::ChainStore;
use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Supervises a [`CommitteeService`]: spawns its startup task, watches for
/// fatal errors, and handles OS signals for graceful shutdowns.
pub struct Runner<C: ChainClient, S: ChainStore> {
    service: CommitteeService<C, S>,
    task: Option<SyncTask<C, S>>,
    handle: Option<SyncHandle>,
    shutdown: CancellationToken,
}

impl<C: ChainClient, S: ChainStore> Runner<C, S> {
    /// Builds the service and installs tracing at the configured verbosity.
    pub fn new(params: ServiceParams<C, S>) -> Result<Self> {
        telemetry::init_tracing(params.config.log_level());
        let (service, task) = CommitteeService::new(params)?;
        Ok(Self {
            service,
            task: Some(task),
            handle: None,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn service(&self) -> &CommitteeService<C, S> {
        &self.service
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies. A fatal sync
    /// error cancels it as well.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawns the startup sequence. It runs at most once per runner.
    pub async fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let task = self
            .task
            .take()
            .context("sync task already ran; startup happens once per runner")?;
        self.handle = Some(task.spawn(&self.shutdown));
        Ok(())
    }

    /// Stops the sync task and surfaces any fatal error it captured.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.shutdown.cancel();
        handle.stop().await
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled,
    /// either externally or by a fatal error.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }
}
