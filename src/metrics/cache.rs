use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::types::{CollectorKind, Reading, Snapshot};
use crate::error::CollectorError;

struct CacheEntry {
    snapshot: Arc<Snapshot<Reading>>,
    last_refresh_start: Option<Instant>,
    in_flight: bool,
    closed: bool,
}

/// Result of asking the cache whether a kind may be refreshed now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Granted,
    NotDue,
    InFlight,
}

/// Latest snapshot per collector kind.
///
/// Entries live in a sharded map so a write for one kind never waits on a
/// write for another. Readers get an `Arc` to an immutable snapshot and never
/// block on a refresh.
pub struct SnapshotCache {
    entries: DashMap<CollectorKind, CacheEntry>,
    generation: AtomicU64,
}

impl SnapshotCache {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        let entries = DashMap::with_capacity(CollectorKind::ALL.len());
        for kind in CollectorKind::ALL {
            entries.insert(
                kind,
                CacheEntry {
                    snapshot: Arc::new(Snapshot::pending(created_at)),
                    last_refresh_start: None,
                    in_flight: false,
                    closed: false,
                },
            );
        }
        SnapshotCache {
            entries,
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, kind: CollectorKind) -> Arc<Snapshot<Reading>> {
        match self.entries.get(&kind) {
            Some(entry) => Arc::clone(&entry.snapshot),
            None => Arc::new(Snapshot::pending(Utc::now())),
        }
    }

    /// Replace the snapshot for `kind` wholesale.
    pub fn put(&self, kind: CollectorKind, snapshot: Snapshot<Reading>) {
        if let Some(mut entry) = self.entries.get_mut(&kind) {
            entry.snapshot = Arc::new(snapshot);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Atomically check the due time and the in-flight flag for `kind`, and
    /// mark a refresh as started when both allow it.
    pub fn try_claim(&self, kind: CollectorKind, now: Instant, interval: Duration) -> Claim {
        let Some(mut entry) = self.entries.get_mut(&kind) else {
            return Claim::NotDue;
        };
        let due = match entry.last_refresh_start {
            None => true,
            Some(started) => now.saturating_duration_since(started) >= interval,
        };
        if !due || entry.closed {
            return Claim::NotDue;
        }
        if entry.in_flight {
            return Claim::InFlight;
        }
        entry.in_flight = true;
        entry.last_refresh_start = Some(now);
        Claim::Granted
    }

    /// Store the outcome of a claimed refresh and clear the in-flight flag.
    /// Returns `false` when the cache was closed first and nothing was written.
    pub fn complete(
        &self,
        kind: CollectorKind,
        outcome: Result<Reading, CollectorError>,
        captured_at: DateTime<Utc>,
        latency: Duration,
        source: &str,
    ) -> bool {
        let Some(mut entry) = self.entries.get_mut(&kind) else {
            return false;
        };
        entry.in_flight = false;
        if entry.closed {
            return false;
        }
        let next = match outcome {
            Ok(reading) => Snapshot::fresh(reading, captured_at, latency, source),
            Err(err) => Snapshot::errored(&entry.snapshot, captured_at, latency, source, err),
        };
        entry.snapshot = Arc::new(next);
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Refuse further claims and writes. Each entry is flipped under its own
    /// write guard, so a completion either lands before this returns or not
    /// at all.
    pub fn close(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.closed = true;
        }
    }

    /// Clear the in-flight flag without writing a result.
    pub fn release(&self, kind: CollectorKind) {
        if let Some(mut entry) = self.entries.get_mut(&kind) {
            entry.in_flight = false;
        }
    }

    pub fn is_in_flight(&self, kind: CollectorKind) -> bool {
        self.entries.get(&kind).map(|e| e.in_flight).unwrap_or(false)
    }

    pub fn last_refresh_start(&self, kind: CollectorKind) -> Option<Instant> {
        self.entries.get(&kind).and_then(|e| e.last_refresh_start)
    }

    /// Bumped on every write; lets the publisher notice background completions.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
