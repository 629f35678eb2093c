use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::cache::{Claim, SnapshotCache};
use super::types::CollectorKind;
use crate::clock::Clock;
use crate::collectors::{CollectContext, Collector};
use crate::error::CollectorError;

struct Lane {
    kind: CollectorKind,
    source: &'static str,
    collector: Arc<Mutex<Box<dyn Collector>>>,
}

/// What one scheduling pass did.
pub struct Dispatch {
    pub dispatched: Vec<CollectorKind>,
    pub in_flight: Vec<CollectorKind>,
    pub handles: Vec<JoinHandle<()>>,
}

/// Runs each collector on its own cadence. A pass only spawns work; it never
/// waits on a collector, so a slow source cannot hold up a fast one.
pub struct CadenceScheduler {
    lanes: Vec<Lane>,
    cache: Arc<SnapshotCache>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl CadenceScheduler {
    pub fn new(
        collectors: Vec<Box<dyn Collector>>,
        cache: Arc<SnapshotCache>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut lanes = Vec::with_capacity(collectors.len());
        for collector in collectors {
            let kind = collector.kind();
            if !seen.insert(kind) {
                warn!("ignoring duplicate {} collector ({})", kind, collector.source());
                continue;
            }
            lanes.push(Lane {
                kind,
                source: collector.source(),
                collector: Arc::new(Mutex::new(collector)),
            });
        }
        CadenceScheduler {
            lanes,
            cache,
            clock,
            cancel,
        }
    }

    pub fn kinds(&self) -> Vec<CollectorKind> {
        self.lanes.iter().map(|lane| lane.kind).collect()
    }

    /// Spawn a refresh for every kind that is due and not already running.
    pub fn dispatch(&self, ctx: &CollectContext, base: Duration) -> Dispatch {
        let mut dispatch = Dispatch {
            dispatched: Vec::new(),
            in_flight: Vec::new(),
            handles: Vec::new(),
        };
        if self.cancel.is_cancelled() {
            return dispatch;
        }

        for lane in &self.lanes {
            match self.cache.try_claim(lane.kind, ctx.now, lane.kind.cadence(base)) {
                Claim::Granted => {
                    dispatch.handles.push(self.spawn_refresh(lane, ctx.clone()));
                    dispatch.dispatched.push(lane.kind);
                }
                Claim::InFlight => {
                    debug!("{} refresh still in flight, not re-triggering", lane.kind);
                    dispatch.in_flight.push(lane.kind);
                }
                Claim::NotDue => {}
            }
        }
        dispatch
    }

    fn spawn_refresh(&self, lane: &Lane, ctx: CollectContext) -> JoinHandle<()> {
        let kind = lane.kind;
        let source = lane.source;
        let collector = Arc::clone(&lane.collector);
        let cache = Arc::clone(&self.cache);
        let clock = Arc::clone(&self.clock);

        tokio::spawn(async move {
            let started = Instant::now();
            let budget = kind.call_timeout();
            let outcome = {
                let mut collector = collector.lock().await;
                let call = AssertUnwindSafe(timeout(budget, collector.produce(&ctx))).catch_unwind();
                match call.await {
                    Ok(Ok(Ok(reading))) if reading.kind() == kind => Ok(reading),
                    Ok(Ok(Ok(reading))) => Err(CollectorError::parse(format!(
                        "{} collector returned a {} reading",
                        kind,
                        reading.kind()
                    ))),
                    Ok(Ok(Err(err))) => Err(err),
                    Ok(Err(_)) => Err(CollectorError::timeout(budget)),
                    Err(panic) => Err(CollectorError::unavailable(format!(
                        "collector panicked: {}",
                        panic_message(&*panic)
                    ))),
                }
            };

            if let Err(err) = &outcome {
                warn!("{} collector error: {}", kind, err);
            }
            if !cache.complete(kind, outcome, clock.wall_now(), started.elapsed(), source) {
                debug!("discarded {} result that arrived after stop", kind);
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collectors::ScriptedCollector;
    use crate::config::MonitorConfig;
    use crate::metrics::types::{MemoryReading, Reading};
    use chrono::Utc;

    fn scheduler(collectors: Vec<Box<dyn Collector>>) -> (CadenceScheduler, Arc<SnapshotCache>, ManualClock) {
        let clock = ManualClock::new();
        let cache = Arc::new(SnapshotCache::new(Utc::now()));
        let scheduler = CadenceScheduler::new(
            collectors,
            Arc::clone(&cache),
            Arc::new(clock.clone()),
            CancellationToken::new(),
        );
        (scheduler, cache, clock)
    }

    fn ctx(clock: &ManualClock) -> CollectContext {
        CollectContext::new(clock.now(), Arc::new(MonitorConfig::default()))
    }

    #[tokio::test]
    async fn duplicate_kinds_keep_the_first_collector() {
        let first = ScriptedCollector::new(CollectorKind::Memory).then_ok(Reading::Memory(MemoryReading {
            total_bytes: 1,
            ..Default::default()
        }));
        let second = ScriptedCollector::new(CollectorKind::Memory);
        let (first_calls, second_calls) = (first.handle(), second.handle());
        let (scheduler, cache, clock) = scheduler(vec![Box::new(first), Box::new(second)]);

        assert_eq!(scheduler.kinds(), vec![CollectorKind::Memory]);
        let dispatch = scheduler.dispatch(&ctx(&clock), Duration::from_secs(1));
        for handle in dispatch.handles {
            handle.await.unwrap();
        }
        assert_eq!(first_calls.calls(), 1);
        assert_eq!(second_calls.calls(), 0);
        assert!(!cache.get(CollectorKind::Memory).is_absent());
    }

    #[tokio::test]
    async fn wrong_reading_kind_is_a_parse_failure() {
        let liar = ScriptedCollector::new(CollectorKind::Cpu).then_ok(Reading::Disk(vec![]));
        let (scheduler, cache, clock) = scheduler(vec![Box::new(liar)]);
        for handle in scheduler.dispatch(&ctx(&clock), Duration::from_secs(1)).handles {
            handle.await.unwrap();
        }
        let snapshot = cache.get(CollectorKind::Cpu);
        assert!(snapshot.is_absent());
        assert!(matches!(snapshot.error, Some(CollectorError::ParseFailure(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_collector_times_out() {
        let slow = ScriptedCollector::new(CollectorKind::Smart)
            .then_ok(Reading::Smart(vec![]))
            .with_delay(Duration::from_secs(60));
        let (scheduler, cache, clock) = scheduler(vec![Box::new(slow)]);
        for handle in scheduler.dispatch(&ctx(&clock), Duration::from_secs(1)).handles {
            handle.await.unwrap();
        }
        let snapshot = cache.get(CollectorKind::Smart);
        assert_eq!(snapshot.error, Some(CollectorError::Timeout(10_000)));
        assert!(!cache.is_in_flight(CollectorKind::Smart));
    }

    #[tokio::test]
    async fn cancelled_scheduler_dispatches_nothing() {
        let collector = ScriptedCollector::new(CollectorKind::Cpu);
        let handle = collector.handle();
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let scheduler = CadenceScheduler::new(
            vec![Box::new(collector)],
            Arc::new(SnapshotCache::new(Utc::now())),
            Arc::new(clock.clone()),
            cancel.clone(),
        );
        cancel.cancel();
        let dispatch = scheduler.dispatch(&ctx(&clock), Duration::from_secs(1));
        assert!(dispatch.dispatched.is_empty());
        assert_eq!(handle.calls(), 0);
    }

    #[tokio::test]
    async fn panicking_collector_is_retried_on_its_next_interval() {
        let flaky = ScriptedCollector::new(CollectorKind::Memory)
            .then_ok(Reading::Memory(MemoryReading::default()))
            .panics_first(1);
        let calls = flaky.handle();
        let (scheduler, cache, clock) = scheduler(vec![Box::new(flaky)]);

        for handle in scheduler.dispatch(&ctx(&clock), Duration::from_secs(1)).handles {
            handle.await.unwrap();
        }
        assert!(!cache.is_in_flight(CollectorKind::Memory));
        assert!(matches!(
            cache.get(CollectorKind::Memory).error,
            Some(CollectorError::SourceUnavailable(ref reason)) if reason.contains("panicked")
        ));

        clock.advance(Duration::from_secs(1));
        let dispatch = scheduler.dispatch(&ctx(&clock), Duration::from_secs(1));
        assert_eq!(dispatch.dispatched, vec![CollectorKind::Memory]);
        assert!(dispatch.in_flight.is_empty());
        for handle in dispatch.handles {
            handle.await.unwrap();
        }
        assert_eq!(calls.calls(), 2);
        assert_eq!(cache.get(CollectorKind::Memory).error, None);
    }

    #[tokio::test]
    async fn result_landing_after_close_is_dropped() {
        let slow = ScriptedCollector::new(CollectorKind::Memory)
            .then_ok(Reading::Memory(MemoryReading::default()))
            .gated();
        let gate = slow.handle();
        let (scheduler, cache, clock) = scheduler(vec![Box::new(slow)]);

        let dispatch = scheduler.dispatch(&ctx(&clock), Duration::from_secs(1));
        cache.close();
        gate.release(1);
        for handle in dispatch.handles {
            handle.await.unwrap();
        }
        assert!(cache.get(CollectorKind::Memory).is_absent());
        assert!(!cache.is_in_flight(CollectorKind::Memory));

        clock.advance(Duration::from_secs(5));
        assert!(scheduler.dispatch(&ctx(&clock), Duration::from_secs(1)).dispatched.is_empty());
    }
}
