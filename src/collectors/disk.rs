use std::collections::HashSet;

use async_trait::async_trait;
use sysinfo::Disks;

use super::{blocking, CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, Reading, VolumeReading};

pub struct DiskCollector {
    disks: Option<Disks>,
}

impl DiskCollector {
    pub fn new() -> Self {
        DiskCollector { disks: None }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for DiskCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Disk
    }

    fn source(&self) -> &'static str {
        "sysinfo::disks"
    }

    async fn produce(&mut self, _ctx: &CollectContext) -> Result<Reading, CollectorError> {
        let (disks, all) = blocking("disk", self.disks.take(), |disks| {
            let disks = disks.get_or_insert_with(Disks::new);
            disks.refresh_list();
            disks
                .list()
                .iter()
                .map(|disk| {
                    let total_bytes = disk.total_space();
                    let free_bytes = disk.available_space();
                    VolumeReading {
                        name: disk.name().to_string_lossy().to_string(),
                        mount_point: disk.mount_point().to_string_lossy().to_string(),
                        total_bytes,
                        used_bytes: total_bytes.saturating_sub(free_bytes),
                        free_bytes,
                    }
                })
                .collect::<Vec<_>>()
        })
        .await?;
        self.disks = disks;

        if all.is_empty() {
            return Err(CollectorError::unavailable("no disks discovered"));
        }
        Ok(Reading::Disk(select_volumes(all)))
    }
}

/// Keep the root volume and anything mounted under `/Volumes`, once each,
/// sorted by name. System snapshot volumes share the root container and would
/// double-count. When nothing matches (non-macOS layouts) every sized volume
/// is kept.
pub fn select_volumes(all: Vec<VolumeReading>) -> Vec<VolumeReading> {
    let mut seen = HashSet::new();
    let mut selected: Vec<VolumeReading> = all
        .iter()
        .filter(|v| v.mount_point == "/" || v.mount_point.starts_with("/Volumes/"))
        .filter(|v| seen.insert(v.mount_point.clone()))
        .cloned()
        .collect();

    if selected.is_empty() {
        selected = all.into_iter().filter(|v| v.total_bytes > 0).collect();
    }
    selected.sort_by(|a, b| a.name.cmp(&b.name));
    selected
}
