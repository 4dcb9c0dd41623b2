// flapwatch/src/lib.rs
//
// flapwatch — real-time BGP route flap detection.
//
// Route updates flow producer → ingest queue → single consumer → FlapEngine.
// Prefixes whose path changes reach the notify threshold within the flap
// window join the active set and are handed to the notification dispatcher;
// the reaper evicts idle prefixes every window; the HTTP API serves
// snapshots of the active set and aggregate metrics.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod source;
pub mod state;

pub use config::{EngineConfig, SnapshotMode};
pub use error::{FlapError, Result};
pub use events::{
    ActiveView, AggregateMetrics, AsPath, CompactFlapSnapshot, FlapSnapshot, PrefixReport, UpdateEvent,
};
pub use ingest::Pipeline;
pub use metrics::EngineMetrics;
pub use notify::{Dispatcher, NotifyHandle};
pub use state::engine::FlapEngine;
