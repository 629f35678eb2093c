use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cache::SnapshotCache;
use super::types::{
    percentage, CollectorKind, DiskStatus, MemoryReading, MemoryStatus, Reading, SystemSnapshot,
    VolumeReading,
};

/// Build one immutable system snapshot from whatever the cache holds now.
pub fn aggregate(cache: &SnapshotCache, sequence: u64, published_at: DateTime<Utc>) -> SystemSnapshot {
    SystemSnapshot {
        sequence,
        published_at,
        cpu: cache.get(CollectorKind::Cpu).map(|r| match r {
            Reading::Cpu(cpu) => Some(cpu.clone()),
            _ => None,
        }),
        memory: cache.get(CollectorKind::Memory).map(|r| match r {
            Reading::Memory(mem) => Some(memory_status(mem)),
            _ => None,
        }),
        network: cache.get(CollectorKind::Network).map(|r| match r {
            Reading::Network(net) => Some(net.clone()),
            _ => None,
        }),
        disk: cache.get(CollectorKind::Disk).map(|r| match r {
            Reading::Disk(volumes) => Some(disk_status(volumes)),
            _ => None,
        }),
        battery: cache.get(CollectorKind::Battery).map(|r| match r {
            Reading::Battery(battery) => Some(battery.clone()),
            _ => None,
        }),
        smart: cache.get(CollectorKind::Smart).map(|r| match r {
            Reading::Smart(disks) => Some(disks.clone()),
            _ => None,
        }),
        sensors: cache.get(CollectorKind::Sensor).map(|r| match r {
            Reading::Sensor(sensors) => Some(sensors.clone()),
            _ => None,
        }),
        processes: cache.get(CollectorKind::Process).map(|r| match r {
            Reading::Process(ranking) => Some(ranking.clone()),
            _ => None,
        }),
        weather: cache.get(CollectorKind::Weather).map(|r| match r {
            Reading::Weather(report) => Some(report.clone()),
            _ => None,
        }),
    }
}

pub fn memory_status(reading: &MemoryReading) -> MemoryStatus {
    MemoryStatus {
        used_percentage: percentage(reading.used_bytes, reading.total_bytes),
        reading: reading.clone(),
    }
}

/// Sum volumes into aggregate totals. Providers only report per-volume data.
pub fn disk_status(volumes: &[VolumeReading]) -> DiskStatus {
    let total_bytes: u64 = volumes.iter().map(|v| v.total_bytes).sum();
    let used_bytes: u64 = volumes.iter().map(|v| v.used_bytes).sum();
    let free_bytes: u64 = volumes.iter().map(|v| v.free_bytes).sum();
    DiskStatus {
        volumes: volumes.to_vec(),
        total_bytes,
        used_bytes,
        free_bytes,
        usage_percentage: percentage(used_bytes, total_bytes),
    }
}

pub const USAGE_HISTORY_POINTS: usize = 3600;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsagePoint {
    pub at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Rolling CPU / memory usage, one point per publish, for sparklines.
#[derive(Debug, Clone)]
pub struct UsageHistory {
    capacity: usize,
    points: VecDeque<UsagePoint>,
}

impl UsageHistory {
    pub fn new() -> Self {
        Self::with_capacity(USAGE_HISTORY_POINTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        UsageHistory {
            capacity,
            points: VecDeque::with_capacity(capacity.min(USAGE_HISTORY_POINTS)),
        }
    }

    /// Record a point when the snapshot has at least CPU or memory data.
    pub fn record(&mut self, snapshot: &SystemSnapshot) {
        let cpu = snapshot.cpu.value.as_ref().map(|c| c.usage_percent);
        let memory = snapshot.memory.value.as_ref().map(|m| m.used_percentage);
        if cpu.is_none() && memory.is_none() {
            return;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(UsagePoint {
            at: snapshot.published_at,
            cpu_percent: cpu.unwrap_or(0.0),
            memory_percent: memory.unwrap_or(0.0),
        });
    }

    pub fn last_n(&self, n: usize) -> Vec<UsagePoint> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl Default for UsageHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::Snapshot;
    use std::time::{Duration, Instant};

    fn volume(name: &str, total: u64, used: u64) -> VolumeReading {
        VolumeReading {
            name: name.to_string(),
            mount_point: format!("/Volumes/{}", name),
            total_bytes: total,
            used_bytes: used,
            free_bytes: total - used,
        }
    }

    #[test]
    fn disk_usage_is_summed_across_volumes() {
        let status = disk_status(&[volume("a", 600_000_000, 500_000_000), volume("b", 400_000_000, 400_000_000)]);
        assert_eq!(status.total_bytes, 1_000_000_000);
        assert_eq!(status.used_bytes, 900_000_000);
        assert_eq!(status.free_bytes, 100_000_000);
        assert_eq!(status.usage_percentage, 90.0);
    }

    #[test]
    fn zero_totals_report_zero_percent() {
        let disk = disk_status(&[volume("empty", 0, 0)]);
        assert_eq!(disk.usage_percentage, 0.0);
        assert_eq!(disk_status(&[]).usage_percentage, 0.0);

        let mem = memory_status(&MemoryReading {
            used_bytes: 42,
            ..Default::default()
        });
        assert_eq!(mem.used_percentage, 0.0);
        assert!(!mem.used_percentage.is_nan());
    }

    #[test]
    fn aggregate_projects_each_kind() {
        let cache = SnapshotCache::new(Utc::now());
        cache.try_claim(CollectorKind::Memory, Instant::now(), Duration::from_secs(1));
        cache.complete(
            CollectorKind::Memory,
            Ok(Reading::Memory(MemoryReading {
                total_bytes: 16,
                used_bytes: 4,
                ..Default::default()
            })),
            Utc::now(),
            Duration::ZERO,
            "test",
        );
        let snapshot = aggregate(&cache, 7, Utc::now());
        assert_eq!(snapshot.sequence, 7);
        assert_eq!(snapshot.memory.value.as_ref().map(|m| m.used_percentage), Some(25.0));
        assert!(snapshot.cpu.is_absent());
        assert!(snapshot.weather.is_absent());
    }

    #[test]
    fn usage_history_is_bounded() {
        let mut history = UsageHistory::with_capacity(3);
        let mut snapshot = SystemSnapshot::empty(Utc::now());
        history.record(&snapshot);
        assert!(history.is_empty());

        for i in 0..5 {
            snapshot.memory = Snapshot::fresh(
                memory_status(&MemoryReading {
                    total_bytes: 100,
                    used_bytes: i,
                    ..Default::default()
                }),
                Utc::now(),
                Duration::ZERO,
                "test",
            );
            history.record(&snapshot);
        }
        assert_eq!(history.len(), 3);
        let last = history.last_n(2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].memory_percent, 3.0);
        assert_eq!(last[1].memory_percent, 4.0);
    }
}
