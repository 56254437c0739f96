pub mod collector;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod record;
pub mod router;
pub mod service;
pub mod simulator;
pub mod store;

pub use collector::{Collector, CollectorSettings, CollectorState, TickOutcome};
pub use config::{AppConfig, StoreKind};
pub use record::StatsRecord;
pub use router::{RouterClient, RouterError};
pub use service::Service;
pub use store::{DataStore, FileStore, MemoryStore, StoreError};
