// flapwatch/src/ingest/queue.rs
//
// Bounded FIFO between the protocol producer and the single consumer.
//
// Producers never block: `push` refuses with QueueFull at capacity and the
// producer decides whether to back off or drop. The consumer awaits `pop`.
// `close` appends a shutdown sentinel that is exempt from the capacity check
// and is never discarded by `shed`, so every update queued before it is
// still delivered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{FlapError, Result};
use crate::events::UpdateEvent;

#[derive(Debug)]
pub enum Queued {
    Update(UpdateEvent),
    Shutdown,
}

pub struct UpdateQueue {
    items:    Mutex<VecDeque<Queued>>,
    capacity: usize,
    closed:   AtomicBool,
    ready:    Notify,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items:    Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed:   AtomicBool::new(false),
            ready:    Notify::new(),
        }
    }

    pub fn push(&self, event: UpdateEvent) -> Result<()> {
        {
            // `closed` only flips under this lock, so nothing lands behind
            // the sentinel.
            let mut items = self.items.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(FlapError::QueueClosed);
            }
            if items.len() >= self.capacity {
                return Err(FlapError::QueueFull { capacity: self.capacity });
            }
            items.push_back(Queued::Update(event));
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Queue the shutdown sentinel. Later pushes are refused.
    pub fn close(&self) {
        {
            let mut items = self.items.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            items.push_back(Queued::Shutdown);
        }
        self.ready.notify_one();
    }

    pub async fn pop(&self) -> Queued {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.ready.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<Queued> {
        self.items.lock().pop_front()
    }

    /// Discard up to `n` updates from the head. Stops at the sentinel.
    pub fn shed(&self, n: usize) -> usize {
        let mut items = self.items.lock();
        let mut dropped = 0;
        while dropped < n && matches!(items.front(), Some(Queued::Update(_))) {
            items.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
