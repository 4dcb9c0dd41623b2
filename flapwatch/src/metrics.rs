// flapwatch/src/metrics.rs
//
// Operational counters and the text exposition served on
// /flaps/metrics/prometheus.
//
// Exposition layout:
//
//   active_flap_count                     gauge   — prefixes in the active set
//   active_flap_route_change_count        gauge   — summed lifetime path changes
//                                                   of active prefixes
//   flapwatch_updates_received_total      counter — updates offered by producers
//   flapwatch_updates_applied_total       counter — updates applied to the table
//   flapwatch_updates_rejected_total      counter — refused at a full queue
//   flapwatch_updates_shed_total          counter — discarded by the shedder
//   flapwatch_shed_episodes_total         counter — overload episodes
//   flapwatch_notifications_sent_total    counter — handed to the dispatcher
//   flapwatch_notifications_dropped_total counter — lost to a full/closed queue
//   flapwatch_records_evicted_total       counter — removed by the reaper
//   flapwatch_tracked_prefixes            gauge   — live records in the table
//   flapwatch_queue_depth                 gauge   — pending updates

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::events::AggregateMetrics;

pub struct EngineMetrics {
    pub updates_received:       AtomicU64,
    pub updates_applied:        AtomicU64,
    pub updates_rejected:       AtomicU64,
    pub updates_shed:           AtomicU64,
    pub shed_episodes:          AtomicU64,
    pub notifications_sent:     AtomicU64,
    pub notifications_dropped:  AtomicU64,
    pub records_evicted:        AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn prometheus_text(
        &self,
        flaps:       &AggregateMetrics,
        tracked:     usize,
        queue_depth: usize,
    ) -> String {
        let mut out = String::with_capacity(2048);

        macro_rules! counter {
            ($name:expr, $help:expr, $val:expr) => {
                out.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
                    $name, $help, $name, $name, $val
                ));
            };
        }
        macro_rules! gauge {
            ($name:expr, $help:expr, $val:expr) => {
                out.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
                    $name, $help, $name, $name, $val
                ));
            };
        }

        gauge!(
            "active_flap_count",
            "Number of actively flapping prefixes",
            flaps.active_flap_count
        );
        gauge!(
            "active_flap_route_change_count",
            "Number of path changes caused by actively flapping prefixes",
            flaps.active_flap_total_path_change_count
        );

        counter!(
            "flapwatch_updates_received_total",
            "Route updates offered to the ingest queue",
            Self::get(&self.updates_received)
        );
        counter!(
            "flapwatch_updates_applied_total",
            "Route updates applied to the flap table",
            Self::get(&self.updates_applied)
        );
        counter!(
            "flapwatch_updates_rejected_total",
            "Route updates refused because the ingest queue was full",
            Self::get(&self.updates_rejected)
        );
        counter!(
            "flapwatch_updates_shed_total",
            "Queued route updates discarded by the overload shedder",
            Self::get(&self.updates_shed)
        );
        counter!(
            "flapwatch_shed_episodes_total",
            "Overload shedding episodes",
            Self::get(&self.shed_episodes)
        );
        counter!(
            "flapwatch_notifications_sent_total",
            "Flap notifications handed to the dispatcher",
            Self::get(&self.notifications_sent)
        );
        counter!(
            "flapwatch_notifications_dropped_total",
            "Flap notifications dropped at a full or closed dispatch queue",
            Self::get(&self.notifications_dropped)
        );
        counter!(
            "flapwatch_records_evicted_total",
            "Flap records evicted after the flap window",
            Self::get(&self.records_evicted)
        );

        gauge!(
            "flapwatch_tracked_prefixes",
            "Prefixes currently tracked in the flap table",
            tracked
        );
        gauge!(
            "flapwatch_queue_depth",
            "Route updates waiting in the ingest queue",
            queue_depth
        );

        out
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self {
            updates_received:      AtomicU64::new(0),
            updates_applied:       AtomicU64::new(0),
            updates_rejected:      AtomicU64::new(0),
            updates_shed:          AtomicU64::new(0),
            shed_episodes:         AtomicU64::new(0),
            notifications_sent:    AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            records_evicted:       AtomicU64::new(0),
        }
    }
}
