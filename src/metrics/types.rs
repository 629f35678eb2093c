use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorKind {
    Cpu,
    Memory,
    Network,
    Disk,
    Battery,
    Smart,
    Sensor,
    Process,
    Weather,
}

const SENSOR_PERIOD: Duration = Duration::from_secs(5);
const DISK_PERIOD: Duration = Duration::from_secs(10);
const BATTERY_PERIOD: Duration = Duration::from_secs(10);
const PROCESS_PERIOD: Duration = Duration::from_secs(2);
const SMART_PERIOD: Duration = Duration::from_secs(60);
const WEATHER_PERIOD: Duration = Duration::from_secs(600);

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const EXTERNAL_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

impl CollectorKind {
    pub const ALL: [CollectorKind; 9] = [
        CollectorKind::Cpu,
        CollectorKind::Memory,
        CollectorKind::Network,
        CollectorKind::Disk,
        CollectorKind::Battery,
        CollectorKind::Smart,
        CollectorKind::Sensor,
        CollectorKind::Process,
        CollectorKind::Weather,
    ];

    /// Refresh interval for this kind. CPU, memory and bandwidth follow the
    /// user-selected base interval; the rest have fixed cadences.
    pub fn cadence(self, base: Duration) -> Duration {
        match self {
            CollectorKind::Cpu | CollectorKind::Memory | CollectorKind::Network => base,
            CollectorKind::Sensor => SENSOR_PERIOD,
            CollectorKind::Disk => DISK_PERIOD,
            CollectorKind::Battery => BATTERY_PERIOD,
            CollectorKind::Process => PROCESS_PERIOD,
            CollectorKind::Smart => SMART_PERIOD,
            CollectorKind::Weather => WEATHER_PERIOD,
        }
    }

    /// Upper bound on a single `produce` call.
    pub fn call_timeout(self) -> Duration {
        match self {
            CollectorKind::Battery | CollectorKind::Smart | CollectorKind::Sensor => {
                EXTERNAL_TOOL_TIMEOUT
            }
            _ => PROBE_TIMEOUT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CollectorKind::Cpu => "cpu",
            CollectorKind::Memory => "memory",
            CollectorKind::Network => "network",
            CollectorKind::Disk => "disk",
            CollectorKind::Battery => "battery",
            CollectorKind::Smart => "smart",
            CollectorKind::Sensor => "sensor",
            CollectorKind::Process => "process",
            CollectorKind::Weather => "weather",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped reading (or failure) for a single collector kind.
///
/// A failed refresh keeps the previous `value` and `refreshed_at` and only
/// replaces `captured_at` and `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub value: Option<T>,
    pub captured_at: DateTime<Utc>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub source: String,
    pub latency_ms: u32,
    pub error: Option<CollectorError>,
}

impl<T> Snapshot<T> {
    pub fn pending(created_at: DateTime<Utc>) -> Self {
        Snapshot {
            value: None,
            captured_at: created_at,
            refreshed_at: None,
            source: "uninitialized".to_string(),
            latency_ms: 0,
            error: None,
        }
    }

    pub fn fresh(value: T, captured_at: DateTime<Utc>, latency: Duration, source: &str) -> Self {
        Snapshot {
            value: Some(value),
            captured_at,
            refreshed_at: Some(captured_at),
            source: source.to_string(),
            latency_ms: millis(latency),
            error: None,
        }
    }

    /// Failure that carries the last good value forward.
    pub fn errored(
        previous: &Snapshot<T>,
        captured_at: DateTime<Utc>,
        latency: Duration,
        source: &str,
        error: CollectorError,
    ) -> Self
    where
        T: Clone,
    {
        Snapshot {
            value: previous.value.clone(),
            captured_at,
            refreshed_at: previous.refreshed_at,
            source: source.to_string(),
            latency_ms: millis(latency),
            error: Some(error),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }

    pub fn map<U>(&self, f: impl FnOnce(&T) -> Option<U>) -> Snapshot<U> {
        Snapshot {
            value: self.value.as_ref().and_then(f),
            captured_at: self.captured_at,
            refreshed_at: self.refreshed_at,
            source: self.source.clone(),
            latency_ms: self.latency_ms,
            error: self.error.clone(),
        }
    }
}

fn millis(d: Duration) -> u32 {
    d.as_millis().min(u32::MAX as u128) as u32
}

/// `part / total` as a percentage; a zero total yields 0.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    pub usage_percent: f64,
    pub per_core_load: Vec<f64>,
    pub temperature: Option<f64>,
    pub load_average: LoadAverage,
    pub uptime_seconds: u64,
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub active_bytes: u64,
    pub inactive_bytes: u64,
    pub wired_bytes: u64,
    pub compressed_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct AddressInfo {
    pub local_ip: Option<String>,
    pub gateway: Option<String>,
    pub dns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkReading {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub addresses: AddressInfo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeReading {
    pub name: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl VolumeReading {
    pub fn usage_percentage(&self) -> f64 {
        percentage(self.used_bytes, self.total_bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryHealth {
    Good,
    Fair,
    Poor,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub percentage: f64,
    pub is_charging: bool,
    pub time_remaining_seconds: Option<u64>,
    pub health: BatteryHealth,
    pub cycle_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmartStatus {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SmartReading {
    pub disk_id: String,
    pub name: String,
    pub status: SmartStatus,
    pub temperature: Option<f64>,
    pub power_on_hours: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    CpuTemperature,
    GpuTemperature,
    FanSpeed,
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub kind: SensorKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessRanking {
    pub top_cpu: Vec<ProcessEntry>,
    pub top_memory: Vec<ProcessEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: String,
    pub temperature: f64,
    pub feels_like: f64,
    pub description: String,
    pub humidity: u32,
    pub wind_speed: f64,
    pub pressure: u32,
    pub cloud_cover: u32,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
}

/// Output of one `Collector::produce` call, tagged by kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reading", rename_all = "snake_case")]
pub enum Reading {
    Cpu(CpuReading),
    Memory(MemoryReading),
    Network(NetworkReading),
    Disk(Vec<VolumeReading>),
    Battery(Option<BatteryReading>),
    Smart(Vec<SmartReading>),
    Sensor(Vec<SensorReading>),
    Process(ProcessRanking),
    Weather(Option<WeatherReport>),
}

impl Reading {
    pub fn kind(&self) -> CollectorKind {
        match self {
            Reading::Cpu(_) => CollectorKind::Cpu,
            Reading::Memory(_) => CollectorKind::Memory,
            Reading::Network(_) => CollectorKind::Network,
            Reading::Disk(_) => CollectorKind::Disk,
            Reading::Battery(_) => CollectorKind::Battery,
            Reading::Smart(_) => CollectorKind::Smart,
            Reading::Sensor(_) => CollectorKind::Sensor,
            Reading::Process(_) => CollectorKind::Process,
            Reading::Weather(_) => CollectorKind::Weather,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    #[serde(flatten)]
    pub reading: MemoryReading,
    pub used_percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiskStatus {
    pub volumes: Vec<VolumeReading>,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub usage_percentage: f64,
}

/// Everything the UI needs for one frame. Built once per publishing tick and
/// never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    pub cpu: Snapshot<CpuReading>,
    pub memory: Snapshot<MemoryStatus>,
    pub network: Snapshot<NetworkReading>,
    pub disk: Snapshot<DiskStatus>,
    pub battery: Snapshot<Option<BatteryReading>>,
    pub smart: Snapshot<Vec<SmartReading>>,
    pub sensors: Snapshot<Vec<SensorReading>>,
    pub processes: Snapshot<ProcessRanking>,
    pub weather: Snapshot<Option<WeatherReport>>,
}

impl SystemSnapshot {
    /// Placeholder published before the first tick completes.
    pub fn empty(at: DateTime<Utc>) -> Self {
        SystemSnapshot {
            sequence: 0,
            published_at: at,
            cpu: Snapshot::pending(at),
            memory: Snapshot::pending(at),
            network: Snapshot::pending(at),
            disk: Snapshot::pending(at),
            battery: Snapshot::pending(at),
            smart: Snapshot::pending(at),
            sensors: Snapshot::pending(at),
            processes: Snapshot::pending(at),
            weather: Snapshot::pending(at),
        }
    }

    /// Error (if any) recorded for `kind` in this snapshot.
    pub fn error_for(&self, kind: CollectorKind) -> Option<&CollectorError> {
        match kind {
            CollectorKind::Cpu => self.cpu.error.as_ref(),
            CollectorKind::Memory => self.memory.error.as_ref(),
            CollectorKind::Network => self.network.error.as_ref(),
            CollectorKind::Disk => self.disk.error.as_ref(),
            CollectorKind::Battery => self.battery.error.as_ref(),
            CollectorKind::Smart => self.smart.error.as_ref(),
            CollectorKind::Sensor => self.sensors.error.as_ref(),
            CollectorKind::Process => self.processes.error.as_ref(),
            CollectorKind::Weather => self.weather.error.as_ref(),
        }
    }

    /// Hottest temperature sensor, if any sensor reported one.
    pub fn max_temperature(&self) -> Option<f64> {
        self.sensors
            .value
            .as_ref()?
            .iter()
            .filter(|s| matches!(s.kind, SensorKind::CpuTemperature | SensorKind::GpuTemperature))
            .map(|s| s.value)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
    }

    /// Worst S.M.A.R.T. status across disks; `None` when nothing was reported.
    pub fn smart_summary(&self) -> Option<SmartStatus> {
        let disks = self.smart.value.as_ref()?;
        if disks.is_empty() {
            return None;
        }
        if disks.iter().any(|d| d.status == SmartStatus::Critical) {
            Some(SmartStatus::Critical)
        } else if disks.iter().all(|d| d.status == SmartStatus::Healthy) {
            Some(SmartStatus::Healthy)
        } else {
            Some(SmartStatus::Warning)
        }
    }
}
