//! Polling, caching and alerting core for a menu-bar system monitor.
//!
//! Collectors run on independent cadences, their results land in a per-kind
//! snapshot cache, and each tick publishes one immutable [`SystemSnapshot`]
//! plus any threshold alerts it triggered.

pub mod alerts;
pub mod clock;
pub mod collectors;
pub mod config;
pub mod error;
pub mod metrics;

pub use alerts::{AlertEvaluator, AlertEvent, AlertHistory, AlertMetric, AlertRule, Comparison};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collectors::{system_collectors, CollectContext, Collector, ScriptedCollector};
pub use config::MonitorConfig;
pub use error::{CollectorError, ConfigError};
pub use metrics::{
    CollectorKind, Snapshot, SnapshotCache, Supervisor, SupervisorHandle, SystemSnapshot, TickReport,
};

/// Install `env_logger` at `info`, overridable through `RUST_LOG`.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
