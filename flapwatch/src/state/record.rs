// flapwatch/src/state/record.rs
//
// Per-prefix flap record and its state machine.
//
// A record is created on the first announcement for a prefix and mutated only
// by the single ingest consumer. Each announcement is compared against the
// last path seen for its peer key:
//
//   equal                      → Unchanged (duplicate / re-announcement)
//   first path for a peer key  → Baseline  (per-peer mode only, not counted)
//   different                  → Changed, or Crossed when the window counter
//                                hits the notify threshold exactly
//
// Path history and per-peer paths sit behind Arcs so shallow snapshots can
// share them; the writer goes through Arc::make_mut and never mutates a
// buffer a reader still holds.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{EngineConfig, SnapshotMode, PATH_LIMIT};
use crate::events::{paths_equal, AsPath, FlapSnapshot};

/// Outcome of applying one announcement to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Unchanged,
    Baseline,
    Changed,
    Crossed { activate: bool, notify: bool },
}

#[derive(Debug)]
pub struct FlapRecord {
    pub prefix:         String,
    pub last_paths:     Arc<HashMap<u32, AsPath>>,
    pub paths:          Arc<Vec<AsPath>>,
    pub window_changes: u64,
    pub total_changes:  u64,
    pub first_seen:     i64,
    pub last_seen:      i64,
}

/// Saturating counter step; a counter at u64::MAX stays there.
pub fn bump(n: u64) -> u64 {
    n.saturating_add(1)
}

/// 0 unless per-peer tracking is on, then the first AS of the path.
pub fn peer_key(path: &AsPath, per_peer_state: bool) -> u32 {
    if per_peer_state {
        path.first_asn().unwrap_or(0)
    } else {
        0
    }
}

impl FlapRecord {
    pub fn create(prefix: &str, path: &AsPath, now: i64, cfg: &EngineConfig) -> (Self, Transition) {
        let mut last_paths = HashMap::new();
        last_paths.insert(peer_key(path, cfg.per_peer_state), path.clone());

        let paths = if cfg.keep_path_info { vec![path.clone()] } else { Vec::new() };

        let mut record = Self {
            prefix:         prefix.to_string(),
            last_paths:     Arc::new(last_paths),
            paths:          Arc::new(paths),
            window_changes: 0,
            total_changes:  0,
            first_seen:     now,
            last_seen:      now,
        };

        // Threshold 0: every new prefix is reported immediately.
        if cfg.notify_threshold == 0 {
            record.total_changes = 1;
            return (record, Transition::Crossed { activate: true, notify: true });
        }
        (record, Transition::Created)
    }

    pub fn observe(&mut self, path: &AsPath, now: i64, cfg: &EngineConfig) -> Transition {
        let key = peer_key(path, cfg.per_peer_state);
        let previous = self.last_paths.get(&key);
        if paths_equal(previous, path) {
            return Transition::Unchanged;
        }
        let first_for_peer = previous.map_or(true, AsPath::is_empty);

        if cfg.keep_path_info && self.paths.len() <= PATH_LIMIT && !self.paths.contains(path) {
            Arc::make_mut(&mut self.paths).push(path.clone());
        }

        if cfg.per_peer_state && first_for_peer {
            Arc::make_mut(&mut self.last_paths).insert(key, path.clone());
            return Transition::Baseline;
        }

        self.window_changes = bump(self.window_changes);
        self.total_changes = bump(self.total_changes);
        self.last_seen = now;
        Arc::make_mut(&mut self.last_paths).insert(key, path.clone());

        if self.window_changes != cfg.notify_threshold {
            return Transition::Changed;
        }

        let activate = self.total_changes == cfg.notify_threshold;
        self.window_changes = 0;
        let notify = !(cfg.notify_once && self.total_changes > cfg.notify_threshold);
        Transition::Crossed { activate, notify }
    }

    pub fn is_stale(&self, now: i64, flap_window: i64) -> bool {
        self.last_seen.saturating_add(flap_window) <= now
    }

    pub fn snapshot(&self, mode: SnapshotMode) -> FlapSnapshot {
        let (paths, last_paths) = match mode {
            SnapshotMode::Shallow => (Arc::clone(&self.paths), Arc::clone(&self.last_paths)),
            SnapshotMode::Deep => (
                Arc::new(self.paths.iter().map(AsPath::deep_clone).collect()),
                Arc::new(
                    self.last_paths
                        .iter()
                        .map(|(k, p)| (*k, p.deep_clone()))
                        .collect(),
                ),
            ),
        };

        FlapSnapshot {
            prefix: self.prefix.clone(),
            paths,
            last_paths,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            total_changes: self.total_changes,
            window_changes: self.window_changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u64) -> EngineConfig {
        EngineConfig { notify_threshold: threshold, ..Default::default() }
    }

    fn path(asns: &[u32]) -> AsPath {
        AsPath::new(asns.to_vec())
    }

    #[test]
    fn duplicates_never_count() {
        let cfg = cfg(3);
        let a = path(&[65001, 65002]);
        let (mut rec, t) = FlapRecord::create("10.0.0.0/24", &a, 0, &cfg);
        assert_eq!(t, Transition::Created);

        for now in 1..50 {
            assert_eq!(rec.observe(&a, now, &cfg), Transition::Unchanged);
        }
        assert_eq!(rec.window_changes, 0);
        assert_eq!(rec.total_changes, 0);
        assert_eq!(rec.last_seen, 0);
    }

    #[test]
    fn alternating_paths_cross_once_then_keep_counting() {
        let cfg = cfg(3);
        let a = path(&[65001, 65002]);
        let b = path(&[65001, 65003]);
        let (mut rec, _) = FlapRecord::create("10.0.0.0/24", &a, 0, &cfg);

        assert_eq!(rec.observe(&b, 1, &cfg), Transition::Changed);
        assert_eq!(rec.observe(&a, 2, &cfg), Transition::Changed);
        assert_eq!(
            rec.observe(&b, 3, &cfg),
            Transition::Crossed { activate: true, notify: true }
        );
        assert_eq!(rec.window_changes, 0);
        assert_eq!(rec.total_changes, 3);

        assert_eq!(rec.observe(&a, 4, &cfg), Transition::Changed);
        assert_eq!(rec.observe(&b, 5, &cfg), Transition::Changed);
        assert_eq!(rec.total_changes, 5);
        assert_eq!(rec.window_changes, 2);
        assert_eq!(rec.last_seen, 5);
    }

    #[test]
    fn second_crossing_notifies_without_reactivating() {
        let cfg = cfg(2);
        let a = path(&[1]);
        let b = path(&[2]);
        let (mut rec, _) = FlapRecord::create("p", &a, 0, &cfg);

        rec.observe(&b, 1, &cfg);
        assert_eq!(
            rec.observe(&a, 2, &cfg),
            Transition::Crossed { activate: true, notify: true }
        );
        rec.observe(&b, 3, &cfg);
        assert_eq!(
            rec.observe(&a, 4, &cfg),
            Transition::Crossed { activate: false, notify: true }
        );
    }

    #[test]
    fn notify_once_suppresses_later_crossings() {
        let cfg = EngineConfig { notify_threshold: 2, notify_once: true, ..Default::default() };
        let a = path(&[1]);
        let b = path(&[2]);
        let (mut rec, _) = FlapRecord::create("p", &a, 0, &cfg);

        rec.observe(&b, 1, &cfg);
        assert_eq!(
            rec.observe(&a, 2, &cfg),
            Transition::Crossed { activate: true, notify: true }
        );
        rec.observe(&b, 3, &cfg);
        assert_eq!(
            rec.observe(&a, 4, &cfg),
            Transition::Crossed { activate: false, notify: false }
        );
    }

    #[test]
    fn threshold_zero_reports_on_creation() {
        let cfg = cfg(0);
        let (rec, t) = FlapRecord::create("p", &path(&[1]), 7, &cfg);
        assert_eq!(t, Transition::Crossed { activate: true, notify: true });
        assert_eq!(rec.total_changes, 1);
        assert_eq!(rec.first_seen, 7);
    }

    #[test]
    fn per_peer_baseline_is_not_a_change() {
        let cfg = EngineConfig { notify_threshold: 5, per_peer_state: true, ..Default::default() };
        let from_a = path(&[65001, 100]);
        let from_b = path(&[65002, 100]);
        let from_b2 = path(&[65002, 200]);
        let (mut rec, _) = FlapRecord::create("p", &from_a, 0, &cfg);

        assert_eq!(rec.observe(&from_b, 1, &cfg), Transition::Baseline);
        assert_eq!(rec.total_changes, 0);
        assert_eq!(rec.last_seen, 0);
        assert_eq!(rec.last_paths.len(), 2);

        assert_eq!(rec.observe(&from_b2, 2, &cfg), Transition::Changed);
        assert_eq!(rec.total_changes, 1);
        // The other peer's path is untouched.
        assert_eq!(rec.observe(&from_a, 3, &cfg), Transition::Unchanged);
    }

    #[test]
    fn per_peer_empty_path_keys_to_zero() {
        let cfg = EngineConfig { per_peer_state: true, ..Default::default() };
        let empty = path(&[]);
        assert_eq!(peer_key(&empty, true), 0);
        assert_eq!(peer_key(&path(&[65001]), false), 0);

        let (mut rec, _) = FlapRecord::create("p", &empty, 0, &cfg);
        // Stored path for key 0 is empty, so the next path on key 0 is a baseline.
        let unknown = path(&[0, 5]);
        assert_eq!(rec.observe(&unknown, 1, &cfg), Transition::Baseline);
    }

    #[test]
    fn path_history_is_distinct_and_bounded() {
        let cfg = cfg(u64::MAX);
        let (mut rec, _) = FlapRecord::create("p", &path(&[0]), 0, &cfg);

        let a = path(&[1]);
        let b = path(&[2]);
        rec.observe(&a, 1, &cfg);
        rec.observe(&b, 2, &cfg);
        rec.observe(&a, 3, &cfg);
        assert_eq!(rec.paths.len(), 3);

        for i in 10..(PATH_LIMIT as u32 + 100) {
            rec.observe(&path(&[i]), 4, &cfg);
        }
        assert_eq!(rec.paths.len(), PATH_LIMIT + 1);
    }

    #[test]
    fn path_history_disabled_keeps_nothing() {
        let cfg = EngineConfig { keep_path_info: false, ..Default::default() };
        let (mut rec, _) = FlapRecord::create("p", &path(&[1]), 0, &cfg);
        rec.observe(&path(&[2]), 1, &cfg);
        assert!(rec.paths.is_empty());
        assert_eq!(rec.total_changes, 1);
    }

    #[test]
    fn counters_saturate() {
        assert_eq!(bump(u64::MAX), u64::MAX);
        assert_eq!(bump(41), 42);

        let cfg = cfg(10);
        let (mut rec, _) = FlapRecord::create("p", &path(&[1]), 0, &cfg);
        rec.total_changes = u64::MAX;
        rec.observe(&path(&[2]), 1, &cfg);
        rec.observe(&path(&[1]), 2, &cfg);
        assert_eq!(rec.total_changes, u64::MAX);
        assert_eq!(rec.window_changes, 2);
    }

    #[test]
    fn staleness_uses_inclusive_window() {
        let cfg = cfg(10);
        let (rec, _) = FlapRecord::create("p", &path(&[1]), 100, &cfg);
        assert!(!rec.is_stale(159, 60));
        assert!(rec.is_stale(160, 60));
        assert!(!rec.is_stale(i64::MAX - 1, i64::MAX));
    }

    #[test]
    fn shallow_snapshot_shares_history_and_survives_writes() {
        let cfg = cfg(10);
        let (mut rec, _) = FlapRecord::create("p", &path(&[1]), 0, &cfg);
        let shallow = rec.snapshot(SnapshotMode::Shallow);
        let deep = rec.snapshot(SnapshotMode::Deep);

        assert!(Arc::ptr_eq(&shallow.paths, &rec.paths));
        assert!(!Arc::ptr_eq(&deep.paths, &rec.paths));

        rec.observe(&path(&[2]), 1, &cfg);
        // Copy-on-write: the live record moved on, the snapshot did not.
        assert_eq!(shallow.paths.len(), 1);
        assert_eq!(rec.paths.len(), 2);
        assert_eq!(shallow, deep);
    }
}
