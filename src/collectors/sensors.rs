use async_trait::async_trait;
use sysinfo::Components;

use super::{blocking, CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, Reading, SensorKind, SensorReading};

pub struct SensorCollector {
    components: Option<Components>,
}

impl SensorCollector {
    pub fn new() -> Self {
        SensorCollector { components: None }
    }
}

impl Default for SensorCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for SensorCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Sensor
    }

    fn source(&self) -> &'static str {
        "sysinfo::components"
    }

    async fn produce(&mut self, _ctx: &CollectContext) -> Result<Reading, CollectorError> {
        let (components, readings) = blocking("sensor", self.components.take(), |components| {
            let components = components.get_or_insert_with(Components::new);
            components.refresh_list();
            components
                .iter()
                .filter_map(|component| {
                    let value = temperature_of(component.temperature())?;
                    Some(SensorReading {
                        name: component.label().to_string(),
                        value,
                        unit: "°C".to_string(),
                        kind: classify_sensor(component.label()),
                    })
                })
                .collect::<Vec<_>>()
        })
        .await?;
        self.components = components;
        Ok(Reading::Sensor(readings))
    }
}

/// Sensor category from its label. SMC labels vary by model, so this is a
/// best-effort keyword match.
pub fn classify_sensor(label: &str) -> SensorKind {
    let label = label.to_ascii_lowercase();
    if label.contains("fan") {
        SensorKind::FanSpeed
    } else if label.contains("gpu") {
        SensorKind::GpuTemperature
    } else if ["cpu", "peci", "tdie", "core", "package"]
        .iter()
        .any(|needle| label.contains(needle))
    {
        SensorKind::CpuTemperature
    } else {
        SensorKind::Other
    }
}

/// Drops the NaN / zero placeholders reported for absent sensors.
pub(crate) fn temperature_of(raw: f32) -> Option<f64> {
    if raw.is_finite() && raw > 0.0 {
        Some(raw as f64)
    } else {
        None
    }
}
