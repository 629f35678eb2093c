use async_trait::async_trait;
use sysinfo::System;

use super::{blocking, CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, ProcessEntry, ProcessRanking, Reading};

/// Top consumers by CPU and by resident memory. Per-process CPU needs two
/// refreshes, so the first ranking reports zero CPU for everyone.
pub struct ProcessCollector {
    system: Option<System>,
}

impl ProcessCollector {
    pub fn new() -> Self {
        ProcessCollector { system: None }
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for ProcessCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Process
    }

    fn source(&self) -> &'static str {
        "sysinfo::processes"
    }

    async fn produce(&mut self, ctx: &CollectContext) -> Result<Reading, CollectorError> {
        let (system, entries) = blocking("process", self.system.take(), |system| {
            let system = system.get_or_insert_with(System::new);
            system.refresh_processes();
            system
                .processes()
                .iter()
                .map(|(pid, process)| ProcessEntry {
                    pid: pid.as_u32(),
                    name: process.name().to_string(),
                    cpu_percent: process.cpu_usage() as f64,
                    memory_bytes: process.memory(),
                })
                .collect::<Vec<_>>()
        })
        .await?;
        self.system = system;
        Ok(Reading::Process(rank_processes(entries, ctx.config.top_process_count)))
    }
}

pub fn rank_processes(mut entries: Vec<ProcessEntry>, limit: usize) -> ProcessRanking {
    for entry in entries.iter_mut().filter(|e| !e.cpu_percent.is_finite()) {
        entry.cpu_percent = 0.0;
    }
    entries.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent).then(a.pid.cmp(&b.pid)));
    let top_cpu = entries.iter().take(limit).cloned().collect();

    entries.sort_by(|a, b| b.memory_bytes.cmp(&a.memory_bytes).then(a.pid.cmp(&b.pid)));
    entries.truncate(limit);

    ProcessRanking {
        top_cpu,
        top_memory: entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, cpu: f64, mem: u64) -> ProcessEntry {
        ProcessEntry {
            pid,
            name: format!("proc{}", pid),
            cpu_percent: cpu,
            memory_bytes: mem,
        }
    }

    #[test]
    fn ranks_by_cpu_and_memory_separately() {
        let ranking = rank_processes(
            vec![entry(1, 5.0, 900), entry(2, 90.0, 10), entry(3, 40.0, 500), entry(4, f64::NAN, 1)],
            2,
        );
        let cpu: Vec<u32> = ranking.top_cpu.iter().map(|p| p.pid).collect();
        let mem: Vec<u32> = ranking.top_memory.iter().map(|p| p.pid).collect();
        assert_eq!(cpu, vec![2, 3]);
        assert_eq!(mem, vec![1, 3]);
    }

    #[test]
    fn zero_limit_yields_empty_lists() {
        let ranking = rank_processes(vec![entry(1, 1.0, 1)], 0);
        assert!(ranking.top_cpu.is_empty());
        assert!(ranking.top_memory.is_empty());
    }
}
