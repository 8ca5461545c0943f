pub mod chain;
pub mod processor;
pub mod runtime;
pub mod store;

pub use chain::{
    ChainClient, ChainFuture, ChainTime, CommitteeAssignment, Epoch, GenesisChainTime, HeadEvent,
    HeadEventStream, Root, Slot,
};
pub use processor::catchup::{CatchupOutcome, CatchupReport, CatchupRunner};
pub use processor::epoch::{EpochError, EpochStage, EpochUpdater, EpochUpdaterParams};
pub use processor::guard::{SingleFlight, SingleFlightPermit};
pub use processor::listener::{HeadListener, HeadOutcome, ListenerExit};
pub use processor::service::{CommitteeService, ServiceParams, SyncHandle, SyncTask};
pub use runtime::config::{SyncConfig, SyncConfigBuilder, SyncConfigParams};
pub use runtime::fatal::FatalErrorHandler;
pub use runtime::progress::{ProgressMetadata, DEFAULT_METADATA_KEY};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{BeaconCommittee, BeaconCommitteesSetter, ChainStore, MemoryStore, StoreFuture};
