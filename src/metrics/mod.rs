pub mod aggregate;
pub mod cache;
mod scheduler;
mod supervisor;
mod types;

pub use aggregate::{UsageHistory, UsagePoint, USAGE_HISTORY_POINTS};
pub use cache::{Claim, SnapshotCache};
pub use scheduler::{CadenceScheduler, Dispatch};
pub use supervisor::{Supervisor, SupervisorHandle, TickReport};
pub use types::{
    percentage, AddressInfo, BatteryHealth, BatteryReading, CollectorKind, CpuReading, DiskStatus,
    LoadAverage, MemoryReading, MemoryStatus, NetworkReading, ProcessEntry, ProcessRanking, Reading,
    SensorKind, SensorReading, SmartReading, SmartStatus, Snapshot, SystemSnapshot, VolumeReading,
    WeatherReport,
};
