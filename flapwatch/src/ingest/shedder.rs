// flapwatch/src/ingest/shedder.rs
//
// Overload shedding.
//
// When the update queue climbs above its high watermark the consumer is not
// keeping up. Stalling the producer would stall the routing session upstream,
// and letting the queue grow is unbounded memory, so we drop the oldest
// pending updates instead:
//
//   trigger  — depth > HIGH_WATER and no episode running → start one
//   episode  — discard SHED_BATCH updates from the head, yield, repeat while
//              depth > HIGH_WATER, then clear the running flag
//
// One atomic flag guarantees at most one episode at a time. Every episode is
// logged (start at WARN, end at INFO with the drop count).
//
// Producers may call in from plain threads. Episodes run on the runtime that
// was current when the shedder was built; without one, the caller sheds
// inline (the loop only takes the queue mutex).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::ingest::queue::UpdateQueue;
use crate::metrics::EngineMetrics;

pub struct OverloadShedder {
    running:    AtomicBool,
    high_water: usize,
    batch:      usize,
    metrics:    Arc<EngineMetrics>,
    runtime:    Option<Handle>,
}

impl OverloadShedder {
    pub fn new(high_water: usize, batch: usize, metrics: Arc<EngineMetrics>) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            high_water,
            batch: batch.max(1),
            metrics,
            runtime: Handle::try_current().ok(),
        })
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a shedding episode if the queue is over the watermark and none
    /// is running. Returns true when this call started one.
    pub fn trigger(self: &Arc<Self>, queue: &Arc<UpdateQueue>) -> bool {
        if queue.len() <= self.high_water {
            return false;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        EngineMetrics::incr(&self.metrics.shed_episodes);
        warn!(depth = queue.len(), high_water = self.high_water, "Can't keep up! Dropping some updates");

        match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(rt) => {
                rt.spawn(Arc::clone(self).episode(Arc::clone(queue)));
            }
            None => {
                let mut dropped = 0usize;
                while let Some(n) = self.step(queue) {
                    dropped += n;
                }
                self.finish(queue, dropped);
            }
        }
        true
    }

    async fn episode(self: Arc<Self>, queue: Arc<UpdateQueue>) {
        let mut dropped = 0usize;
        while let Some(n) = self.step(&queue) {
            dropped += n;
            tokio::task::yield_now().await;
        }
        self.finish(&queue, dropped);
    }

    /// One shed batch, or None once the queue is back under the watermark.
    fn step(&self, queue: &UpdateQueue) -> Option<usize> {
        if queue.len() <= self.high_water {
            return None;
        }
        let n = queue.shed(self.batch);
        if n == 0 {
            return None;
        }
        EngineMetrics::add(&self.metrics.updates_shed, n as u64);
        Some(n)
    }

    fn finish(&self, queue: &UpdateQueue, dropped: usize) {
        info!(dropped, depth = queue.len(), "Recovered");
        self.running.store(false, Ordering::Release);
    }
}
