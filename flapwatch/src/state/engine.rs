// flapwatch/src/state/engine.rs
//
// The flap engine: owns every live FlapRecord and the set of prefixes that
// have crossed the notify threshold.
//
// Design:
//   - table  : prefix → Arc<RwLock<FlapRecord>>. Written only by the ingest
//              consumer (apply) and the reaper (evict), under the table lock.
//   - active : records past the notify threshold. Separate lock; readers hit
//              it far more often than the consumer or reaper write it.
//   - Lock order is table → active → record everywhere. The consumer drops a
//              record's write guard before touching the active set, so a
//              shallow reader holding active → record can never cross it.
//   - A record leaves the active set before it leaves the table.
//
// Readers get snapshots and release every lock before serializing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{EngineConfig, SnapshotMode};
use crate::events::{
    ActiveView, AggregateMetrics, AsPath, CompactFlapSnapshot, FlapSnapshot, PrefixReport, UpdateEvent,
};
use crate::metrics::EngineMetrics;
use crate::notify::{Delivery, NotifyHandle};
use crate::state::record::{FlapRecord, Transition};

pub type RecordRef = Arc<RwLock<FlapRecord>>;

pub struct FlapEngine {
    config:   EngineConfig,
    table:    RwLock<HashMap<String, RecordRef>>,
    active:   RwLock<Vec<RecordRef>>,
    notifier: Option<NotifyHandle>,
    pub metrics: Arc<EngineMetrics>,
}

impl FlapEngine {
    pub fn new(config: EngineConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            config,
            table:    RwLock::new(HashMap::new()),
            active:   RwLock::new(Vec::new()),
            notifier: None,
            metrics,
        }
    }

    pub fn with_notifier(mut self, notifier: NotifyHandle) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Ingest (single writer) ────────────────────────────────────────────────

    pub fn apply(&self, event: &UpdateEvent) {
        self.apply_at(event, Utc::now().timestamp());
    }

    /// Apply one update to every prefix it names. Updates without a candidate
    /// path (withdrawals) are ignored.
    pub fn apply_at(&self, event: &UpdateEvent, now: i64) {
        let Some(path) = event.candidate() else { return };

        let mut table = self.table.write();
        for prefix in &event.prefixes {
            self.apply_prefix(&mut table, prefix, path, now);
        }
        EngineMetrics::incr(&self.metrics.updates_applied);
    }

    fn apply_prefix(
        &self,
        table:  &mut HashMap<String, RecordRef>,
        prefix: &str,
        path:   &AsPath,
        now:    i64,
    ) {
        let existing = table.get(prefix).cloned();
        let (record, transition) = match existing {
            Some(record) => {
                let transition = record.write().observe(path, now, &self.config);
                (record, transition)
            }
            None => {
                let (record, transition) = FlapRecord::create(prefix, path, now, &self.config);
                let record = Arc::new(RwLock::new(record));
                table.insert(prefix.to_string(), Arc::clone(&record));
                (record, transition)
            }
        };

        if let Transition::Crossed { activate, notify } = transition {
            if activate {
                self.active.write().push(Arc::clone(&record));
                debug!(prefix = %prefix, "Prefix entered active flap set");
            }
            if notify {
                self.notify(&record);
            }
        }
    }

    fn notify(&self, record: &RecordRef) {
        let Some(notifier) = &self.notifier else { return };
        let flap = record.read().snapshot(SnapshotMode::Deep);
        match notifier.notify(flap) {
            Delivery::Queued  => EngineMetrics::incr(&self.metrics.notifications_sent),
            Delivery::Dropped => EngineMetrics::incr(&self.metrics.notifications_dropped),
        }
    }

    // ── Reaper ────────────────────────────────────────────────────────────────

    /// Evict every record idle for at least one flap window. Returns the
    /// number of records removed.
    pub fn reap_at(&self, now: i64) -> usize {
        let window = self.config.flap_window();

        let mut table = self.table.write();
        let mut active = self.active.write();
        let before = table.len();

        table.retain(|_, record| {
            if !record.read().is_stale(now, window) {
                return true;
            }
            if let Some(i) = active.iter().position(|a| Arc::ptr_eq(a, record)) {
                active.swap_remove(i);
            }
            false
        });

        let evicted = before - table.len();
        EngineMetrics::add(&self.metrics.records_evicted, evicted as u64);
        evicted
    }

    /// Sweep once per flap window until `shutdown` flips or its sender drops.
    pub async fn reap_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.config.flap_window_secs);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => {
                    info!("Reaper stopped");
                    return;
                }
            }
            let evicted = self.reap_at(Utc::now().timestamp());
            debug!(
                evicted,
                tracked = self.tracked_prefixes(),
                active = self.active_count(),
                "Reaper cycle complete"
            );
        }
    }

    // ── Snapshot readers ──────────────────────────────────────────────────────

    /// Copy of the active set under the configured isolation mode.
    pub fn active_flaps(&self) -> Vec<FlapSnapshot> {
        let mode = self.config.snapshot_mode;
        self.with_active(|active| active.iter().map(|r| r.read().snapshot(mode)).collect())
    }

    /// Active flaps plus the aggregate computed from that same copy.
    pub fn snapshot(&self) -> ActiveView {
        let mode = self.config.snapshot_mode;
        self.with_active(|active| {
            let flaps: Vec<FlapSnapshot> = active.iter().map(|r| r.read().snapshot(mode)).collect();
            let metrics = AggregateMetrics {
                active_flap_count: flaps.len() as u64,
                active_flap_total_path_change_count: flaps
                    .iter()
                    .fold(0u64, |sum, f| sum.saturating_add(f.total_changes)),
            };
            ActiveView { flaps, metrics }
        })
    }

    /// Active set without path history.
    pub fn active_flaps_compact(&self) -> Vec<CompactFlapSnapshot> {
        self.with_active(|active| {
            active
                .iter()
                .map(|r| {
                    let r = r.read();
                    CompactFlapSnapshot {
                        prefix:        r.prefix.clone(),
                        first_seen:    r.first_seen,
                        last_seen:     r.last_seen,
                        total_changes: r.total_changes,
                    }
                })
                .collect()
        })
    }

    pub fn metrics(&self) -> AggregateMetrics {
        self.with_active(|active| AggregateMetrics {
            active_flap_count: active.len() as u64,
            active_flap_total_path_change_count: active
                .iter()
                .fold(0u64, |sum, r| sum.saturating_add(r.read().total_changes)),
        })
    }

    /// Deep mode also holds the table read lock so the view falls between two
    /// consumer steps; shallow mode takes only the active-set lock.
    fn with_active<T>(&self, f: impl FnOnce(&[RecordRef]) -> T) -> T {
        match self.config.snapshot_mode {
            SnapshotMode::Deep => {
                let _table = self.table.read();
                let active = self.active.read();
                f(&active)
            }
            SnapshotMode::Shallow => {
                let active = self.active.read();
                f(&active)
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Deep snapshot of any tracked prefix, active or not.
    pub fn record(&self, prefix: &str) -> Option<FlapSnapshot> {
        let table = self.table.read();
        table.get(prefix).map(|r| r.read().snapshot(SnapshotMode::Deep))
    }

    /// Deep report for one tracked prefix, with its active-set membership
    /// read under the same table lock.
    pub fn lookup(&self, prefix: &str) -> Option<PrefixReport> {
        let table = self.table.read();
        let record = table.get(prefix)?;
        let active = self.active.read().iter().any(|a| Arc::ptr_eq(a, record));
        let flap = record.read().snapshot(SnapshotMode::Deep);
        Some(PrefixReport::new(&flap, active))
    }

    pub fn is_active(&self, prefix: &str) -> bool {
        self.active.read().iter().any(|r| r.read().prefix == prefix)
    }

    pub fn tracked_prefixes(&self) -> usize {
        self.table.read().len()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }
}
