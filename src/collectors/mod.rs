//! Data-source adapters feeding the supervisor.
//!
//! Each collector owns whatever delta state it needs (previous counters, an
//! address cache) and is driven by exactly one task at a time.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::task;

use crate::config::MonitorConfig;
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, Reading};

mod battery;
mod command;
mod cpu;
mod disk;
mod memory;
mod network;
mod processes;
mod scripted;
mod sensors;
mod smart;
mod weather;

pub use battery::{parse_pmset, BatteryCollector};
pub use cpu::CpuCollector;
pub use disk::DiskCollector;
pub use memory::MemoryCollector;
pub use network::{BandwidthTracker, NetworkCollector};
pub use processes::{rank_processes, ProcessCollector};
pub use scripted::{ScriptedCollector, ScriptedHandle};
pub use sensors::{classify_sensor, SensorCollector};
pub use smart::{parse_diskutil_info, SmartCollector};
pub use weather::WeatherCollector;

/// Inputs shared by every `produce` call on one tick.
#[derive(Clone)]
pub struct CollectContext {
    pub now: Instant,
    pub config: Arc<MonitorConfig>,
}

impl CollectContext {
    pub fn new(now: Instant, config: Arc<MonitorConfig>) -> Self {
        CollectContext { now, config }
    }
}

#[async_trait]
pub trait Collector: Send {
    fn kind(&self) -> CollectorKind;

    /// Short label recorded as the snapshot source.
    fn source(&self) -> &'static str;

    async fn produce(&mut self, ctx: &CollectContext) -> Result<Reading, CollectorError>;
}

/// Run a sysinfo scan on the blocking pool so the call timeout can fire while
/// it runs. `state` travels into the closure and comes back with the result.
/// When the caller is timed out the state is lost with the task, so collectors
/// keep it as an `Option` and rebuild on the next call.
pub(crate) async fn blocking<S, T, F>(what: &'static str, state: S, scan: F) -> Result<(S, T), CollectorError>
where
    S: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut S) -> T + Send + 'static,
{
    task::spawn_blocking(move || {
        let mut state = state;
        let out = scan(&mut state);
        (state, out)
    })
    .await
    .map_err(|err| CollectorError::unavailable(format!("{} scan failed: {}", what, err)))
}

/// One collector per kind, backed by the host.
pub fn system_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(CpuCollector::new()),
        Box::new(MemoryCollector::new()),
        Box::new(NetworkCollector::new()),
        Box::new(DiskCollector::new()),
        Box::new(BatteryCollector::new()),
        Box::new(SmartCollector::new()),
        Box::new(SensorCollector::new()),
        Box::new(ProcessCollector::new()),
        Box::new(WeatherCollector::new()),
    ]
}
