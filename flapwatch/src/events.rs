// flapwatch/src/events.rs
//
// Shared domain types flowing through flapwatch.
//
//   AsPath              — one candidate route (ordered AS numbers)
//   UpdateEvent         — one inbound announcement from the protocol producer
//   FlapSnapshot        — read-only view of a flapping prefix (API + notifications)
//   CompactFlapSnapshot — same view without path history
//   PrefixReport        — single-prefix lookup, paths grouped by origin peer
//   ActiveView          — active set + aggregate from one lock acquisition
//   AggregateMetrics    — active-flap count + summed path changes
//
// JSON field names follow the public HTTP API (PascalCase, `Asn` arrays), so
// dashboards written against the API keep working.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── AS paths ──────────────────────────────────────────────────────────────────

/// Ordered sequence of AS numbers for one candidate route.
///
/// Immutable once built; clones share the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "AsPathRepr")]
pub struct AsPath {
    #[serde(rename = "Asn")]
    asn: Arc<[u32]>,
}

/// Accepted input shapes: a bare array `[65001, 65002]` or the API form
/// `{"Asn": [65001, 65002]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AsPathRepr {
    Bare(Vec<u32>),
    Tagged {
        #[serde(rename = "Asn")]
        asn: Vec<u32>,
    },
}

impl From<AsPathRepr> for AsPath {
    fn from(repr: AsPathRepr) -> Self {
        match repr {
            AsPathRepr::Bare(asn) | AsPathRepr::Tagged { asn } => Self::new(asn),
        }
    }
}

impl AsPath {
    pub fn new(asn: Vec<u32>) -> Self {
        Self { asn: asn.into() }
    }

    pub fn asns(&self) -> &[u32] {
        &self.asn
    }

    pub fn first_asn(&self) -> Option<u32> {
        self.asn.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.asn.is_empty()
    }

    /// Copy into a fresh allocation that shares nothing with `self`.
    pub fn deep_clone(&self) -> Self {
        Self { asn: Arc::from(&self.asn[..]) }
    }
}

impl std::fmt::Display for AsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for asn in self.asn.iter() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", asn)?;
            first = false;
        }
        Ok(())
    }
}

/// Order-sensitive path equality. A missing path compares like an empty one,
/// so an empty candidate never counts as a change against "nothing seen yet".
pub fn paths_equal(previous: Option<&AsPath>, candidate: &AsPath) -> bool {
    let previous: &[u32] = previous.map(AsPath::asns).unwrap_or(&[]);
    previous == candidate.asns()
}

// ── Inbound updates ───────────────────────────────────────────────────────────

/// One unit of work from the protocol producer: every prefix in `prefixes`
/// was announced with the candidate paths in `paths`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub paths: Vec<AsPath>,
    /// Capture time; only used to pace replays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl UpdateEvent {
    pub fn new(prefixes: Vec<String>, paths: Vec<AsPath>) -> Self {
        Self { prefixes, paths, timestamp: None }
    }

    /// Convenience for the common single-prefix, single-path announcement.
    pub fn announce(prefix: impl Into<String>, asns: Vec<u32>) -> Self {
        Self::new(vec![prefix.into()], vec![AsPath::new(asns)])
    }

    /// The path used for flap tracking. Only the first candidate of a
    /// multi-path update is considered; withdrawals carry none.
    pub fn candidate(&self) -> Option<&AsPath> {
        self.paths.first()
    }
}

// ── Read-side views ───────────────────────────────────────────────────────────

/// Point-in-time view of one actively flapping prefix.
///
/// Serializes to the `/flaps/active` entry shape. Per-peer last paths and the
/// window counter travel with the snapshot for notification sinks but stay
/// out of the API payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlapSnapshot {
    pub prefix:         String,
    pub paths:          Arc<Vec<AsPath>>,
    #[serde(skip)]
    pub last_paths:     Arc<HashMap<u32, AsPath>>,
    pub first_seen:     i64,
    pub last_seen:      i64,
    #[serde(rename = "TotalCount")]
    pub total_changes:  u64,
    #[serde(skip)]
    pub window_changes: u64,
}

impl FlapSnapshot {
    pub fn compact(&self) -> CompactFlapSnapshot {
        CompactFlapSnapshot::from(self)
    }

    /// Path history grouped by originating (first) AS, in history order
    /// within each group. Empty paths group under 0.
    pub fn paths_by_first_asn(&self) -> BTreeMap<u32, Vec<AsPath>> {
        let mut groups: BTreeMap<u32, Vec<AsPath>> = BTreeMap::new();
        for path in self.paths.iter() {
            groups.entry(path.first_asn().unwrap_or(0)).or_default().push(path.clone());
        }
        groups
    }
}

/// `/flaps/prefix/<prefix>` body: one tracked prefix, active or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrefixReport {
    pub prefix:             String,
    pub active:             bool,
    pub first_seen:         i64,
    pub last_seen:          i64,
    #[serde(rename = "TotalCount")]
    pub total_changes:      u64,
    pub paths_by_first_asn: BTreeMap<u32, Vec<AsPath>>,
}

impl PrefixReport {
    pub fn new(flap: &FlapSnapshot, active: bool) -> Self {
        Self {
            prefix:             flap.prefix.clone(),
            active,
            first_seen:         flap.first_seen,
            last_seen:          flap.last_seen,
            total_changes:      flap.total_changes,
            paths_by_first_asn: flap.paths_by_first_asn(),
        }
    }
}

/// `/flaps/active/compact` entry: a FlapSnapshot without path history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompactFlapSnapshot {
    pub prefix:        String,
    pub first_seen:    i64,
    pub last_seen:     i64,
    #[serde(rename = "TotalCount")]
    pub total_changes: u64,
}

impl From<&FlapSnapshot> for CompactFlapSnapshot {
    fn from(flap: &FlapSnapshot) -> Self {
        Self {
            prefix:        flap.prefix.clone(),
            first_seen:    flap.first_seen,
            last_seen:     flap.last_seen,
            total_changes: flap.total_changes,
        }
    }
}

/// The active set and its aggregate, copied under one lock acquisition so
/// `metrics` always describes exactly `flaps`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveView {
    pub flaps:   Vec<FlapSnapshot>,
    pub metrics: AggregateMetrics,
}

/// Derived view over the active set; never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregateMetrics {
    pub active_flap_count:                   u64,
    pub active_flap_total_path_change_count: u64,
}
