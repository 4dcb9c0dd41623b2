// flapwatch/src/notify.rs
//
// Fire-and-forget flap notification dispatch.
//
// The ingest consumer must never wait on a notification sink, so each
// threshold crossing is handed off through a bounded channel with `try_send`.
// When the channel is full (or the dispatcher is gone) the notification is
// dropped and counted; the consumer moves on.
//
// The Dispatcher drains the channel on its own task:
//   - logs every flap at INFO
//   - optionally appends one JSON line per flap to
//     <output>/flap_notifications.jsonl
//
// Wire that file to an alerting pipeline (webhook relay, chat bot, SIEM).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::{AsPath, FlapSnapshot};

pub const NOTIFICATION_FILE: &str = "flap_notifications.jsonl";

// ── Hand-off ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Dropped,
}

/// Sending half held by the engine.
#[derive(Clone)]
pub struct NotifyHandle {
    tx: mpsc::Sender<FlapSnapshot>,
}

impl NotifyHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FlapSnapshot>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Never blocks.
    pub fn notify(&self, flap: FlapSnapshot) -> Delivery {
        match self.tx.try_send(flap) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(flap)) => {
                warn!(prefix = %flap.prefix, "Notification queue full — dropping flap notification");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(flap)) => {
                debug!(prefix = %flap.prefix, "Notification dispatcher gone — dropping flap notification");
                Delivery::Dropped
            }
        }
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct NotificationLine<'a> {
    #[serde(flatten)]
    flap:        &'a FlapSnapshot,
    #[serde(rename = "NotifiedAt")]
    notified_at: DateTime<Utc>,
}

pub struct Dispatcher {
    out: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(output_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &output_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self { out: output_dir })
    }

    pub async fn run(self, mut rx: mpsc::Receiver<FlapSnapshot>) {
        while let Some(flap) = rx.recv().await {
            if let Err(e) = self.dispatch(&flap).await {
                error!(prefix = %flap.prefix, "Notification dispatch failed: {}", e);
            }
        }
        debug!("Notification dispatcher stopped");
    }

    pub async fn dispatch(&self, flap: &FlapSnapshot) -> Result<()> {
        let current: Vec<String> = flap.last_paths.values().map(AsPath::to_string).collect();
        info!(
            prefix = %flap.prefix,
            total_changes = flap.total_changes,
            paths = flap.paths.len(),
            current = %current.join(", "),
            "Route flap detected"
        );

        if self.out.is_some() {
            let line = NotificationLine { flap, notified_at: Utc::now() };
            self.write(NOTIFICATION_FILE, &(serde_json::to_string(&line)? + "\n")).await?;
        }
        Ok(())
    }

    async fn write(&self, file: &str, content: &str) -> Result<()> {
        let Some(out) = &self.out else { return Ok(()) };
        let mut f = OpenOptions::new().create(true).append(true)
            .open(out.join(file)).await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}
