// flapwatch/src/ingest/mod.rs
//
// Ingest pipeline: producer → bounded queue → single consumer → FlapEngine.
//
// Exactly one consumer task runs `Pipeline::run`, so updates for a prefix
// are applied in arrival order and the engine sees a single writer. The
// consumer checks the queue depth on every update and hands overload to the
// shedder; the producer side does the same when it hits a full queue.

pub mod queue;
pub mod shedder;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SHED_BATCH;
use crate::error::{FlapError, Result};
use crate::events::UpdateEvent;
use crate::metrics::EngineMetrics;
use crate::state::engine::FlapEngine;

use queue::{Queued, UpdateQueue};
use shedder::OverloadShedder;

pub struct Pipeline {
    engine:  Arc<FlapEngine>,
    queue:   Arc<UpdateQueue>,
    shedder: Arc<OverloadShedder>,
}

impl Pipeline {
    pub fn new(engine: Arc<FlapEngine>) -> Self {
        let cfg = engine.config();
        let queue = Arc::new(UpdateQueue::new(cfg.queue_capacity));
        let shedder = OverloadShedder::new(
            cfg.high_watermark(),
            SHED_BATCH,
            Arc::clone(&engine.metrics),
        );
        Self { engine, queue, shedder }
    }

    pub fn engine(&self) -> &Arc<FlapEngine> {
        &self.engine
    }

    pub fn queue(&self) -> &Arc<UpdateQueue> {
        &self.queue
    }

    pub fn shedder(&self) -> &Arc<OverloadShedder> {
        &self.shedder
    }

    /// Offer one update. Never blocks; a full queue is reported to the caller
    /// and starts a shedding episode.
    pub fn submit(&self, event: UpdateEvent) -> Result<()> {
        let metrics = &self.engine.metrics;
        EngineMetrics::incr(&metrics.updates_received);

        match self.queue.push(event) {
            Ok(()) => Ok(()),
            Err(e @ FlapError::QueueFull { .. }) => {
                EngineMetrics::incr(&metrics.updates_rejected);
                self.shedder.trigger(&self.queue);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Enqueue the shutdown sentinel; the consumer exits after draining
    /// everything queued before it.
    pub fn shutdown(&self) {
        self.queue.close();
    }

    /// The single consumer loop.
    pub async fn run(&self) {
        info!(
            capacity = self.queue.capacity(),
            high_water = self.shedder.high_water(),
            "Update consumer started"
        );
        loop {
            match self.queue.pop().await {
                Queued::Shutdown => break,
                Queued::Update(event) => {
                    self.shedder.trigger(&self.queue);
                    self.engine.apply(&event);
                }
            }
        }
        debug!(tracked = self.engine.tracked_prefixes(), "Update queue drained");
        info!("Update consumer stopped");
    }
}
