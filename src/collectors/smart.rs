use async_trait::async_trait;
use log::debug;

use super::command;
use super::{CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, Reading, SmartReading, SmartStatus};

const BLOCK_SEPARATOR: &str = "**********";

/// Drive health as reported by `diskutil`. No temperature or power-on data is
/// available without elevated access.
pub struct SmartCollector;

impl SmartCollector {
    pub fn new() -> Self {
        SmartCollector
    }
}

impl Default for SmartCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for SmartCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Smart
    }

    fn source(&self) -> &'static str {
        "diskutil"
    }

    async fn produce(&mut self, _ctx: &CollectContext) -> Result<Reading, CollectorError> {
        match command::run("diskutil", &["info", "-all"]).await {
            Ok(output) => Ok(Reading::Smart(parse_diskutil_info(&output))),
            Err(err) => {
                debug!("smart status unavailable: {}", err);
                Ok(Reading::Smart(Vec::new()))
            }
        }
    }
}

pub fn classify_smart_status(raw: &str) -> SmartStatus {
    let raw = raw.to_ascii_lowercase();
    if raw.contains("verified") {
        SmartStatus::Healthy
    } else if raw.contains("failing") || raw.contains("bad") {
        SmartStatus::Critical
    } else if raw.contains("warning") {
        SmartStatus::Warning
    } else {
        SmartStatus::Unknown
    }
}

/// One reading per whole disk in `diskutil info -all` output.
pub fn parse_diskutil_info(output: &str) -> Vec<SmartReading> {
    output
        .split(BLOCK_SEPARATOR)
        .filter_map(|block| {
            let mut disk_id = None;
            let mut name = None;
            let mut status = None;
            let mut whole = true;

            for line in block.lines() {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let value = value.trim();
                match key.trim() {
                    "Device Identifier" => disk_id = Some(value.to_string()),
                    "Device / Media Name" | "Media Name" => name = Some(value.to_string()),
                    "SMART Status" => status = Some(classify_smart_status(value)),
                    "Whole" => whole = value.eq_ignore_ascii_case("yes"),
                    _ => {}
                }
            }

            let disk_id = disk_id?;
            if !whole {
                return None;
            }
            Some(SmartReading {
                name: name.unwrap_or_else(|| disk_id.clone()),
                disk_id,
                status: status.unwrap_or(SmartStatus::Unknown),
                temperature: None,
                power_on_hours: None,
            })
        })
        .collect()
}
