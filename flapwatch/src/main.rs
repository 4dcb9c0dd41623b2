// flapwatch/src/main.rs
//
// flapwatch — real-time BGP route flap detection
//
// Two feed modes:
//   tail    — follow a JSONL update feed written by a collector (production)
//   replay  — replay a captured feed at scaled speed (testing/research)
//
// Usage:
//   flapwatch --mode tail --path /var/run/bgp/updates.jsonl
//   flapwatch --mode replay --path captured.jsonl --speed 10.0 --notify-threshold 5
//   flapwatch --per-peer-state --notify-once --output /var/lib/flapwatch

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flapwatch::api::ApiServer;
use flapwatch::config::{EngineConfig, SnapshotMode, DEFAULT_QUEUE_CAPACITY, NOTIFY_QUEUE};
use flapwatch::ingest::Pipeline;
use flapwatch::metrics::EngineMetrics;
use flapwatch::notify::{Dispatcher, NotifyHandle};
use flapwatch::source::{replay_jsonl, tail_jsonl};
use flapwatch::state::engine::FlapEngine;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "flapwatch",
    about   = "Real-time BGP route flap detection",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/flapwatch_updates.jsonl",
          help = "JSONL update feed (tail/replay modes)")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, help = "Directory for flap_notifications.jsonl (log only when unset)")]
    output: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:8699", help = "HTTP API listen address")]
    listen: SocketAddr,

    #[arg(long, default_value = "60", help = "Flap window in seconds")]
    flap_window: u64,

    #[arg(long, default_value = "10", help = "Path changes per window that declare a flap")]
    notify_threshold: u64,

    #[arg(long, help = "Track the last path per originating AS")]
    per_peer_state: bool,

    #[arg(long, help = "Notify only on the first threshold crossing per prefix")]
    notify_once: bool,

    #[arg(long, help = "Do not retain path history")]
    no_path_info: bool,

    #[arg(long, help = "Share path history with live records in API snapshots")]
    shallow_snapshots: bool,

    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, help = "Ingest queue capacity")]
    queue_capacity: usize,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,    // follow a live JSONL feed
    Replay,  // replay a static JSONL capture at scaled speed
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            flap_window_secs: self.flap_window,
            notify_threshold: self.notify_threshold,
            per_peer_state:   self.per_peer_state,
            keep_path_info:   !self.no_path_info,
            notify_once:      self.notify_once,
            snapshot_mode:    if self.shallow_snapshots { SnapshotMode::Shallow } else { SnapshotMode::Deep },
            queue_capacity:   self.queue_capacity,
        }
    }
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner(cfg: &EngineConfig) {
    println!("\x1b[1m");
    println!("  flapwatch {}", env!("CARGO_PKG_VERSION"));
    println!("\x1b[0m");
    println!("  \x1b[90mReal-time BGP route flap detection | Rust\x1b[0m");
    println!(
        "  \x1b[90mwindow={}s  threshold={}  per_peer={}  notify_once={}  paths={}  snapshots={}\x1b[0m\n",
        cfg.flap_window_secs, cfg.notify_threshold, cfg.per_peer_state,
        cfg.notify_once, cfg.keep_path_info, cfg.snapshot_mode
    );
}

async fn print_stats_loop(pipeline: Arc<Pipeline>, start: Instant) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let engine  = pipeline.engine();
        let m       = &engine.metrics;
        let elapsed = start.elapsed().as_secs_f64();
        let applied = EngineMetrics::get(&m.updates_applied);
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  updates={}  ups={:.1}  shed={}  queue={}  prefixes={}  flapping={} ──\x1b[0m",
            elapsed, applied, applied as f64 / elapsed,
            EngineMetrics::get(&m.updates_shed),
            pipeline.queue().len(),
            engine.tracked_prefixes(), engine.active_count()
        );
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("flapwatch=info".parse()?))
        .compact().init();

    let cli = Cli::parse();
    let cfg = cli.engine_config();
    cfg.validate()?;

    print_banner(&cfg);

    // Engine + notification hand-off
    let metrics         = EngineMetrics::new();
    let (notifier, rx)  = NotifyHandle::channel(NOTIFY_QUEUE);
    let dispatcher      = Dispatcher::new(cli.output.clone())?;
    let engine          = Arc::new(FlapEngine::new(cfg, metrics).with_notifier(notifier));
    let pipeline        = Arc::new(Pipeline::new(Arc::clone(&engine)));
    let start           = Instant::now();
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(dispatcher.run(rx));

    // Single consumer
    let consumer = {
        let p = Arc::clone(&pipeline);
        tokio::spawn(async move { p.run().await })
    };

    // Reaper
    let reaper = tokio::spawn(Arc::clone(&engine).reap_loop(stop_rx));

    // HTTP API
    let api = Arc::new(ApiServer::new(Arc::clone(&engine), Arc::clone(pipeline.queue()), cli.listen));
    tokio::spawn(async move {
        if let Err(e) = api.serve().await {
            error!("HTTP API stopped: {}", e);
        }
    });

    // Stats printer
    tokio::spawn(print_stats_loop(Arc::clone(&pipeline), start));

    // Update source
    let source = Arc::clone(&pipeline);
    match cli.mode {
        Mode::Tail => {
            println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}", cli.path.display());
            let path = cli.path.clone();
            tokio::spawn(async move {
                if let Err(e) = tail_jsonl(path, source, true).await {
                    error!("Update feed failed: {}", e);
                }
            });
        }

        Mode::Replay => {
            println!("  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x", cli.path.display(), cli.speed);
            let path  = cli.path.clone();
            let speed = cli.speed;
            tokio::spawn(async move {
                if let Err(e) = replay_jsonl(path, source, speed).await {
                    error!("Replay failed: {}", e);
                }
            });
        }
    }

    if let Some(out) = &cli.output {
        println!("  Output: \x1b[90m{}\x1b[0m", out.display());
    }
    println!("  API: \x1b[90mhttp://{}\x1b[0m", cli.listen);
    println!("  Press Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    pipeline.shutdown();
    stop_tx.send(true).ok();
    consumer.await?;
    reaper.await?;

    info!(
        applied = EngineMetrics::get(&engine.metrics.updates_applied),
        shed    = EngineMetrics::get(&engine.metrics.updates_shed),
        flapping = engine.active_count(),
        "Stopped"
    );
    Ok(())
}
