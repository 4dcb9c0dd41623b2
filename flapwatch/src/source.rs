// flapwatch/src/source.rs
//
// Update sources. The routing session itself lives outside this crate; a
// collector (BMP/BGP speaker, RIS Live bridge, bird export script) writes one
// UpdateEvent per line:
//
//   {"prefixes":["10.0.0.0/24"],"paths":[[65001,65002]]}
//   {"prefixes":["10.0.0.0/24"],"paths":[[65001,65003]],"timestamp":"2024-05-01T12:00:03Z"}
//
// Two modes:
//   tail    — follow a live file, starting at its end
//   replay  — feed a captured file at scaled speed, paced by `timestamp`
//
// A full queue is not fatal: the update is dropped (the shedder is already
// running and logging) and reading continues. A closed queue ends the source.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::FlapError;
use crate::events::UpdateEvent;
use crate::ingest::Pipeline;

/// Slowest accepted replay speed.
pub const MIN_REPLAY_SPEED: f64 = 1e-3;

/// Parse one JSONL line. Blank lines and malformed input yield None.
pub fn parse_line(line: &str) -> Option<UpdateEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<UpdateEvent>(line) {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!("Parse error: {}", e);
            None
        }
    }
}

/// Returns false once the pipeline is shut down.
fn offer(pipeline: &Pipeline, event: UpdateEvent) -> bool {
    match pipeline.submit(event) {
        Ok(()) => true,
        Err(FlapError::QueueFull { .. }) => {
            debug!("Update queue full, dropping update");
            true
        }
        Err(_) => false,
    }
}

pub async fn tail_jsonl(path: PathBuf, pipeline: Arc<Pipeline>, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {} // consume existing
    }

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let Some(event) = parse_line(&line) else { continue };
                if !offer(&pipeline, event) {
                    break;
                }
            }
            None => {
                if pipeline.queue().is_closed() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    Ok(())
}

/// Replay a capture in file order. Gaps between timestamped lines are
/// divided by `speed`; lines without a timestamp go out immediately.
pub async fn replay_jsonl(path: PathBuf, pipeline: Arc<Pipeline>, speed: f64) -> Result<usize> {
    if !speed.is_finite() || speed < MIN_REPLAY_SPEED {
        anyhow::bail!("replay speed must be a finite value of at least {}, got {}", MIN_REPLAY_SPEED, speed);
    }

    let content = tokio::fs::read_to_string(&path).await?;
    let events: Vec<UpdateEvent> = content.lines().filter_map(parse_line).collect();
    info!("Replaying {} updates from {} at {:.1}x", events.len(), path.display(), speed);

    let base_ts = events.iter().find_map(|e| e.timestamp);
    let base_wall = Instant::now();
    let mut sent = 0usize;

    for event in events {
        if let (Some(base), Some(ts)) = (base_ts, event.timestamp) {
            let offset_secs = (ts - base).num_milliseconds().max(0) as f64 / 1000.0 / speed;
            let target = Duration::try_from_secs_f64(offset_secs)
                .ok()
                .and_then(|offset| base_wall.checked_add(offset));
            match target {
                Some(target) => tokio::time::sleep_until(target).await,
                None => anyhow::bail!("replay offset of {:.0}s is out of range", offset_secs),
            }
        }
        if !offer(&pipeline, event) {
            break;
        }
        sent += 1;
    }
    info!(sent, "Replay finished");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ingest::queue::Queued;
    use crate::metrics::EngineMetrics;
    use crate::state::engine::FlapEngine;

    fn pipeline(capacity: usize) -> Arc<Pipeline> {
        let cfg = EngineConfig { queue_capacity: capacity, ..Default::default() };
        let engine = Arc::new(FlapEngine::new(cfg, EngineMetrics::new()));
        Arc::new(Pipeline::new(engine))
    }

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("flapwatch-{}-{}", std::process::id(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parse_line_skips_blank_and_garbage() {
        assert!(parse_line("   ").is_none());
        assert!(parse_line("{not json").is_none());
        let ev = parse_line(r#"{"prefixes":["10.0.0.0/24"],"paths":[[1,2]]}"#).unwrap();
        assert_eq!(ev.candidate().map(|p| p.asns().to_vec()), Some(vec![1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn replay_preserves_file_order() {
        let path = temp_file(
            "replay.jsonl",
            concat!(
                r#"{"prefixes":["a"],"paths":[[1]],"timestamp":"2024-05-01T12:00:00Z"}"#, "\n",
                "garbage\n",
                r#"{"prefixes":["b"],"paths":[[2]],"timestamp":"2024-05-01T12:00:10Z"}"#, "\n",
                r#"{"prefixes":["c"],"paths":[[3]]}"#, "\n",
            ),
        );
        let p = pipeline(100);

        let sent = replay_jsonl(path.clone(), Arc::clone(&p), 10.0).await.unwrap();
        assert_eq!(sent, 3);

        let order: Vec<String> = std::iter::from_fn(|| p.queue().try_pop())
            .filter_map(|q| match q {
                Queued::Update(e) => e.prefixes.first().cloned(),
                Queued::Shutdown => None,
            })
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn replay_rejects_non_positive_speed() {
        let p = pipeline(100);
        assert!(replay_jsonl(PathBuf::from("/nonexistent"), Arc::clone(&p), 0.0).await.is_err());
        assert!(replay_jsonl(PathBuf::from("/nonexistent"), Arc::clone(&p), f64::INFINITY).await.is_err());
    }

    #[tokio::test]
    async fn replay_rejects_vanishing_speed_before_reading() {
        let path = temp_file(
            "slow.jsonl",
            concat!(
                r#"{"prefixes":["a"],"paths":[[1]],"timestamp":"2024-05-01T12:00:00Z"}"#, "\n",
                r#"{"prefixes":["b"],"paths":[[2]],"timestamp":"2024-05-01T12:00:10Z"}"#, "\n",
            ),
        );
        let p = pipeline(100);
        assert!(replay_jsonl(path.clone(), Arc::clone(&p), 1e-320).await.is_err());
        assert!(p.queue().is_empty());
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn replay_stops_when_pipeline_closes() {
        let path = temp_file(
            "closed.jsonl",
            "{\"prefixes\":[\"a\"],\"paths\":[[1]]}\n{\"prefixes\":[\"b\"],\"paths\":[[1]]}\n",
        );
        let p = pipeline(100);
        p.shutdown();
        assert_eq!(replay_jsonl(path.clone(), p, 1.0).await.unwrap(), 0);
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn tail_reads_existing_lines_then_stops_on_close() {
        let path = temp_file("tail.jsonl", "{\"prefixes\":[\"a\"],\"paths\":[[1]]}\n");
        let p = pipeline(100);

        let reader = tokio::spawn(tail_jsonl(path.clone(), Arc::clone(&p), false));
        while p.queue().is_empty() {
            tokio::task::yield_now().await;
        }
        p.shutdown();
        reader.await.unwrap().unwrap();

        assert!(matches!(p.queue().try_pop(), Some(Queued::Update(_))));
        std::fs::remove_file(path).ok();
    }
}
