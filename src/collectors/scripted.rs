use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, Reading};

/// Deterministic collector for tests and demos.
///
/// Replays queued outcomes in order and keeps repeating the last one once the
/// queue runs dry. Calls can be held at a gate until the test releases them.
pub struct ScriptedCollector {
    kind: CollectorKind,
    script: VecDeque<Result<Reading, CollectorError>>,
    last: Option<Result<Reading, CollectorError>>,
    delay: Option<Duration>,
    panics: usize,
    handle: ScriptedHandle,
}

/// Observer side of a `ScriptedCollector`, usable after the collector has
/// been handed to a supervisor.
#[derive(Clone, Default)]
pub struct ScriptedHandle {
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedHandle {
    /// Number of `produce` calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping calls ever observed.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Let `n` gated calls proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedCollector {
    pub fn new(kind: CollectorKind) -> Self {
        ScriptedCollector {
            kind,
            script: VecDeque::new(),
            last: None,
            delay: None,
            panics: 0,
            handle: ScriptedHandle::default(),
        }
    }

    pub fn then_ok(mut self, reading: Reading) -> Self {
        self.script.push_back(Ok(reading));
        self
    }

    pub fn then_err(mut self, err: CollectorError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    /// Hold every call until `ScriptedHandle::release` grants it a permit.
    pub fn gated(mut self) -> Self {
        self.handle.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic on the first `n` calls instead of answering.
    pub fn panics_first(mut self, n: usize) -> Self {
        self.panics = n;
        self
    }

    pub fn handle(&self) -> ScriptedHandle {
        self.handle.clone()
    }

    fn next_outcome(&mut self) -> Result<Reading, CollectorError> {
        if let Some(outcome) = self.script.pop_front() {
            self.last = Some(outcome.clone());
            return outcome;
        }
        self.last
            .clone()
            .unwrap_or_else(|| Err(CollectorError::unavailable("script is empty")))
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    fn kind(&self) -> CollectorKind {
        self.kind
    }

    fn source(&self) -> &'static str {
        "scripted"
    }

    async fn produce(&mut self, _ctx: &CollectContext) -> Result<Reading, CollectorError> {
        self.handle.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.handle.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.handle.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.handle.active));

        if let Some(gate) = &self.handle.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(CollectorError::unavailable("gate closed")),
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics > 0 {
            self.panics -= 1;
            panic!("scripted {} collector blew up", self.kind);
        }
        self.next_outcome()
    }
}
