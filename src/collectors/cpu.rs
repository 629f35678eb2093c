use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Components, System};
use tokio::time::sleep;

use super::sensors::{classify_sensor, temperature_of};
use super::{blocking, CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, CpuReading, LoadAverage, Reading, SensorKind};

const WARM_UP: Duration = Duration::from_millis(125);

/// sysinfo handles held across samples. The component list is enumerated
/// once and only its temperatures are refreshed afterwards.
struct CpuProbe {
    system: System,
    components: Components,
}

impl CpuProbe {
    fn new() -> Self {
        CpuProbe {
            system: System::new(),
            components: Components::new_with_refreshed_list(),
        }
    }

    fn sample(&mut self) -> Result<CpuReading, CollectorError> {
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(CollectorError::unavailable("cpu list empty"));
        }

        let per_core_load: Vec<f64> = cpus.iter().map(|cpu| cpu.cpu_usage() as f64).collect();
        let usage_percent = per_core_load.iter().sum::<f64>() / per_core_load.len() as f64;

        self.components.refresh();
        let load = System::load_average();
        Ok(CpuReading {
            usage_percent: usage_percent.clamp(0.0, 100.0),
            per_core_load,
            temperature: hottest_cpu_die(&self.components),
            load_average: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            uptime_seconds: System::uptime(),
        })
    }
}

/// Load per core comes from sysinfo's tick deltas, so a fresh probe is primed
/// with one refresh before the first real sample.
pub struct CpuCollector {
    probe: Option<CpuProbe>,
}

impl CpuCollector {
    pub fn new() -> Self {
        CpuCollector { probe: None }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for CpuCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Cpu
    }

    fn source(&self) -> &'static str {
        "sysinfo::cpu"
    }

    async fn produce(&mut self, _ctx: &CollectContext) -> Result<Reading, CollectorError> {
        if self.probe.is_none() {
            let (probe, ()) = blocking("cpu", None, |probe: &mut Option<CpuProbe>| {
                probe.get_or_insert_with(CpuProbe::new).system.refresh_cpu();
            })
            .await?;
            self.probe = probe;
            sleep(WARM_UP).await;
        }

        let (probe, reading) = blocking("cpu", self.probe.take(), |probe| {
            probe.get_or_insert_with(CpuProbe::new).sample()
        })
        .await?;
        self.probe = probe;
        reading.map(Reading::Cpu)
    }
}

fn hottest_cpu_die(components: &Components) -> Option<f64> {
    components
        .iter()
        .filter(|c| classify_sensor(c.label()) == SensorKind::CpuTemperature)
        .filter_map(|c| temperature_of(c.temperature()))
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}
