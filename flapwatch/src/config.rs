// flapwatch/src/config.rs
//
// Engine configuration surface.
//
//   flap_window_secs   — inactivity after which a prefix is evicted; also the
//                        reaper period
//   notify_threshold   — path changes per window that declare a flap
//                        (0 = notify on every new prefix)
//   per_peer_state     — track the last path per originating AS instead of
//                        one last path per prefix
//   keep_path_info     — retain up to PATH_LIMIT distinct paths per prefix
//   notify_once        — only the first threshold crossing notifies
//   snapshot_mode      — isolation strength for API readers
//   queue_capacity     — bounded ingest queue size

use serde::{Deserialize, Serialize};

use crate::error::{FlapError, Result};

// ── Limits ────────────────────────────────────────────────────────────────────

/// Distinct paths retained per prefix (the list may reach PATH_LIMIT + 1).
pub const PATH_LIMIT: usize = 1_000;

/// Events discarded per shedding step.
pub const SHED_BATCH: usize = 50;

pub const DEFAULT_QUEUE_CAPACITY: usize = 11_000;

/// Upper bound on the ingest queue; the queue preallocates its full capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 24;

/// Pending flap notifications before the dispatcher starts dropping.
pub const NOTIFY_QUEUE: usize = 1_024;

// High watermark as a fraction of capacity: 10700 / 11000.
const HIGH_WATER_NUM: usize = 10_700;
const HIGH_WATER_DEN: usize = 11_000;

// ── Snapshot isolation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    /// Fully owned copies, consistent across all records as of one instant
    /// between two consumer steps.
    #[default]
    Deep,
    /// Top-level fields copied, path history shared with the live record.
    /// Each record is individually consistent; the set is best-effort.
    Shallow,
}

impl std::fmt::Display for SnapshotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deep    => write!(f, "deep"),
            Self::Shallow => write!(f, "shallow"),
        }
    }
}

// ── Engine configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub flap_window_secs: u64,
    pub notify_threshold: u64,
    pub per_peer_state:   bool,
    pub keep_path_info:   bool,
    pub notify_once:      bool,
    pub snapshot_mode:    SnapshotMode,
    pub queue_capacity:   usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flap_window_secs: 60,
            notify_threshold: 10,
            per_peer_state:   false,
            keep_path_info:   true,
            notify_once:      false,
            snapshot_mode:    SnapshotMode::Deep,
            queue_capacity:   DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.flap_window_secs == 0 {
            return Err(FlapError::Config("flap window must be at least one second".into()));
        }
        if self.flap_window_secs > i64::MAX as u64 {
            return Err(FlapError::Config("flap window out of range".into()));
        }
        if self.queue_capacity <= SHED_BATCH {
            return Err(FlapError::Config(format!(
                "queue capacity {} must exceed the shed batch of {}",
                self.queue_capacity, SHED_BATCH
            )));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(FlapError::Config(format!(
                "queue capacity {} exceeds the maximum of {}",
                self.queue_capacity, MAX_QUEUE_CAPACITY
            )));
        }
        Ok(())
    }

    /// Queue depth above which the overload shedder starts dropping.
    pub fn high_watermark(&self) -> usize {
        self.queue_capacity.saturating_mul(HIGH_WATER_NUM) / HIGH_WATER_DEN
    }

    /// Flap window as signed seconds for timestamp arithmetic.
    pub fn flap_window(&self) -> i64 {
        i64::try_from(self.flap_window_secs).unwrap_or(i64::MAX)
    }
}
