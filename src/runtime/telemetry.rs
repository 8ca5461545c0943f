use crate::chain::Epoch;
use crate::processor::guard::SingleFlight;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to
/// `level`. Calling this function multiple times is harmless.
pub fn init_tracing(level: LevelFilter) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Counters describing synchronizer progress. One instance is the metrics sink
/// handed to a service at construction.
#[derive(Default, Debug)]
pub struct Telemetry {
    epochs_processed: AtomicU64,
    epoch_failures: AtomicU64,
    catchup_runs: AtomicU64,
    guard_denials: AtomicU64,
    head_events: AtomicU64,
    latest_epoch: AtomicU64,
}

impl Telemetry {
    /// Counts a committed epoch. The gauge only moves forward, so a rewound
    /// start epoch does not lower it.
    pub fn record_epoch_processed(&self, epoch: Epoch) {
        self.epochs_processed.fetch_add(1, Ordering::Relaxed);
        self.latest_epoch.fetch_max(epoch, Ordering::Relaxed);
    }

    pub fn record_epoch_failure(&self) {
        self.epoch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_catchup_run(&self) {
        self.catchup_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_guard_denial(&self) {
        self.guard_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_head_event(&self) {
        self.head_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            epochs_processed: self.epochs_processed.load(Ordering::Relaxed),
            epoch_failures: self.epoch_failures.load(Ordering::Relaxed),
            catchup_runs: self.catchup_runs.load(Ordering::Relaxed),
            guard_denials: self.guard_denials.load(Ordering::Relaxed),
            head_events: self.head_events.load(Ordering::Relaxed),
            latest_epoch: self.latest_epoch.load(Ordering::Relaxed),
        }
    }

    pub fn epochs_processed(&self) -> u64 {
        self.epochs_processed.load(Ordering::Relaxed)
    }

    pub fn epoch_failures(&self) -> u64 {
        self.epoch_failures.load(Ordering::Relaxed)
    }

    pub fn catchup_runs(&self) -> u64 {
        self.catchup_runs.load(Ordering::Relaxed)
    }

    pub fn guard_denials(&self) -> u64 {
        self.guard_denials.load(Ordering::Relaxed)
    }

    pub fn head_events(&self) -> u64 {
        self.head_events.load(Ordering::Relaxed)
    }

    /// Highest epoch committed by this process.
    pub fn latest_epoch(&self) -> Epoch {
        self.latest_epoch.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub epochs_processed: u64,
    pub epoch_failures: u64,
    pub catchup_runs: u64,
    pub guard_denials: u64,
    pub head_events: u64,
    pub latest_epoch: Epoch,
}

/// Spawns a background task that periodically logs epoch throughput and
/// whether a catch-up pass currently holds the guard.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    guard: SingleFlight,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "epochsync::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let processed_delta = current_snapshot
                        .epochs_processed
                        .saturating_sub(last_snapshot.epochs_processed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "epochsync::metrics",
                        throughput = format!("{throughput:.2}"),
                        processed = current_snapshot.epochs_processed,
                        latest_epoch = current_snapshot.latest_epoch,
                        failures = current_snapshot.epoch_failures,
                        catchup_runs = current_snapshot.catchup_runs,
                        guard_denials = current_snapshot.guard_denials,
                        head_events = current_snapshot.head_events,
                        catchup_active = guard.is_active(),
                        "sync metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
