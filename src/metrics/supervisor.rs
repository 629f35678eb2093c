use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use log::{debug, error, info};
use tokio::select;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::aggregate::{aggregate, UsageHistory, UsagePoint};
use super::cache::SnapshotCache;
use super::scheduler::CadenceScheduler;
use super::types::{CollectorKind, SystemSnapshot};
use crate::alerts::{AlertEvaluator, AlertEvent};
use crate::clock::Clock;
use crate::collectors::{CollectContext, Collector};
use crate::config::MonitorConfig;

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Outcome of a single tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub dispatched: Vec<CollectorKind>,
    pub in_flight: Vec<CollectorKind>,
    /// Sequence number of the snapshot published by this tick, if any.
    pub published: Option<u64>,
    pub alerts: Vec<AlertEvent>,
}

struct PublishState {
    sequence: u64,
    published_generation: u64,
    evaluator: AlertEvaluator,
    usage: UsageHistory,
}

struct SupervisorInner {
    clock: Arc<dyn Clock>,
    cache: Arc<SnapshotCache>,
    scheduler: CadenceScheduler,
    state: Mutex<PublishState>,
    config_tx: watch::Sender<Arc<MonitorConfig>>,
    snapshot_tx: watch::Sender<Arc<SystemSnapshot>>,
    history_tx: watch::Sender<Arc<Vec<AlertEvent>>>,
    alerts_tx: broadcast::Sender<AlertEvent>,
    cancel: CancellationToken,
}

/// Owns the collectors, the snapshot cache and the publishing state.
///
/// Drive it by hand with [`Supervisor::tick`] or hand it to a background loop
/// with [`Supervisor::start`].
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub fn new(config: MonitorConfig, collectors: Vec<Box<dyn Collector>>, clock: Arc<dyn Clock>) -> Self {
        let config = normalize(config);
        let created_at = clock.wall_now();
        let cache = Arc::new(SnapshotCache::new(created_at));
        let cancel = CancellationToken::new();
        let scheduler = CadenceScheduler::new(collectors, Arc::clone(&cache), Arc::clone(&clock), cancel.clone());

        let state = PublishState {
            sequence: 0,
            published_generation: cache.generation(),
            evaluator: AlertEvaluator::new(&config),
            usage: UsageHistory::new(),
        };
        let (config_tx, _) = watch::channel(Arc::new(config));
        let (snapshot_tx, _) = watch::channel(Arc::new(SystemSnapshot::empty(created_at)));
        let (history_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

        Supervisor {
            inner: Arc::new(SupervisorInner {
                clock,
                cache,
                scheduler,
                state: Mutex::new(state),
                config_tx,
                snapshot_tx,
                history_tx,
                alerts_tx,
                cancel,
            }),
        }
    }

    /// Run one scheduling pass at `now`, then publish if anything changed.
    pub async fn tick(&self, now: Instant) -> TickReport {
        self.inner.tick(now).await
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.inner.cache)
    }

    pub fn kinds(&self) -> Vec<CollectorKind> {
        self.inner.scheduler.kinds()
    }

    pub fn config(&self) -> Arc<MonitorConfig> {
        self.inner.config()
    }

    pub fn latest(&self) -> Arc<SystemSnapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SystemSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn subscribe_history(&self) -> watch::Receiver<Arc<Vec<AlertEvent>>> {
        self.inner.history_tx.subscribe()
    }

    pub fn alert_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.inner.alerts_tx.subscribe()
    }

    pub async fn apply_config(&self, config: MonitorConfig) {
        self.inner.apply_config(config).await
    }

    pub async fn usage_history(&self, n: usize) -> Vec<UsagePoint> {
        self.inner.state.lock().await.usage.last_n(n)
    }

    pub async fn recent_alerts(&self, limit: usize) -> Vec<AlertEvent> {
        self.inner.state.lock().await.evaluator.history().recent(limit)
    }

    pub async fn clear_alert_history(&self) {
        self.inner.clear_alert_history().await
    }

    /// Spawn the polling loop on the current Tokio runtime. The first tick
    /// runs immediately.
    pub fn start(self) -> SupervisorHandle {
        let config_rx = self.inner.config_tx.subscribe();
        let task = tokio::spawn(SupervisorInner::run(Arc::clone(&self.inner), config_rx));
        info!(
            "supervisor started with {} collectors every {:?}",
            self.inner.scheduler.kinds().len(),
            self.inner.config().base_interval()
        );
        SupervisorHandle {
            supervisor: self,
            task: Some(task),
        }
    }
}

impl SupervisorInner {
    /// Stop the loop and seal the cache so refreshes still running can no
    /// longer write.
    fn shut_down(&self) {
        self.cancel.cancel();
        self.cache.close();
    }

    fn config(&self) -> Arc<MonitorConfig> {
        self.config_tx.borrow().clone()
    }

    async fn tick(&self, now: Instant) -> TickReport {
        let mut state = self.state.lock().await;
        if self.cancel.is_cancelled() {
            return TickReport::default();
        }

        let config = self.config();
        let ctx = CollectContext::new(now, Arc::clone(&config));
        let dispatch = self.scheduler.dispatch(&ctx, config.base_interval());

        if !dispatch.handles.is_empty() {
            let deadline = tokio::time::Instant::now() + config.dispatch_budget();
            if timeout_at(deadline, join_all(dispatch.handles)).await.is_err() {
                debug!("dispatch budget elapsed; slow collectors continue in background");
            }
        }

        let mut report = TickReport {
            dispatched: dispatch.dispatched,
            in_flight: dispatch.in_flight,
            ..TickReport::default()
        };

        let generation = self.cache.generation();
        if report.dispatched.is_empty() && generation == state.published_generation {
            return report;
        }

        state.sequence += 1;
        state.published_generation = generation;
        let snapshot = Arc::new(aggregate(&self.cache, state.sequence, self.clock.wall_now()));
        state.usage.record(&snapshot);
        let alerts = state.evaluator.evaluate(&snapshot, now, snapshot.published_at);

        debug!(
            "publishing snapshot #{} (dispatched {:?})",
            snapshot.sequence, report.dispatched
        );
        self.snapshot_tx.send_replace(snapshot);

        if !alerts.is_empty() {
            self.history_tx
                .send_replace(Arc::new(state.evaluator.history().to_vec()));
            for event in &alerts {
                // No receivers is fine; the history still records the event.
                let _ = self.alerts_tx.send(event.clone());
            }
        }

        report.published = Some(state.sequence);
        report.alerts = alerts;
        report
    }

    async fn apply_config(&self, config: MonitorConfig) {
        let config = normalize(config);
        let mut state = self.state.lock().await;
        state.evaluator.apply_config(&config);
        info!(
            "applied config: interval {:?}, {} alert rules",
            config.base_interval(),
            config.alert_rules.len()
        );
        self.config_tx.send_replace(Arc::new(config));
    }

    async fn clear_alert_history(&self) {
        let mut state = self.state.lock().await;
        state.evaluator.clear_history();
        self.history_tx.send_replace(Arc::new(Vec::new()));
    }

    async fn run(self: Arc<Self>, mut config_rx: watch::Receiver<Arc<MonitorConfig>>) {
        let mut period = config_rx.borrow_and_update().base_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    break;
                }
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = config_rx.borrow_and_update().base_interval();
                    if next != period {
                        info!("update interval changed from {:?} to {:?}", period, next);
                        period = next;
                        ticker = interval(period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    }
                }
                _ = ticker.tick() => {
                    let now = self.clock.now();
                    self.tick(now).await;
                }
            }
        }
        info!("supervisor loop stopped");
    }
}

/// Clamp the interval once so later reads do not re-log the fallback warning.
fn normalize(mut config: MonitorConfig) -> MonitorConfig {
    config.update_interval_secs = config.base_interval().as_secs_f64();
    config
}

/// A running supervisor. Dropping the handle stops polling; `stop` also
/// waits for the loop to exit.
pub struct SupervisorHandle {
    supervisor: Supervisor,
    task: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub async fn stop(mut self) {
        self.supervisor.inner.shut_down();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!("supervisor loop ended abnormally: {}", err);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn latest(&self) -> Arc<SystemSnapshot> {
        self.supervisor.latest()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SystemSnapshot>> {
        self.supervisor.subscribe()
    }

    pub fn subscribe_history(&self) -> watch::Receiver<Arc<Vec<AlertEvent>>> {
        self.supervisor.subscribe_history()
    }

    pub fn alert_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.supervisor.alert_events()
    }

    pub fn config(&self) -> Arc<MonitorConfig> {
        self.supervisor.config()
    }

    pub async fn apply_config(&self, config: MonitorConfig) {
        self.supervisor.apply_config(config).await
    }

    /// Force an out-of-band tick, e.g. for a manual refresh.
    pub async fn tick_now(&self) -> TickReport {
        let now = self.supervisor.inner.clock.now();
        self.supervisor.tick(now).await
    }

    pub async fn usage_history(&self, n: usize) -> Vec<UsagePoint> {
        self.supervisor.usage_history(n).await
    }

    pub async fn recent_alerts(&self, limit: usize) -> Vec<AlertEvent> {
        self.supervisor.recent_alerts(limit).await
    }

    pub async fn clear_alert_history(&self) {
        self.supervisor.clear_alert_history().await
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.supervisor.inner.shut_down();
    }
}
