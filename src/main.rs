// src/main.rs

use anyhow::{Context, Result};
use parking_occupancy::occupancy::{OccupancySummary, SpaceSnapshot};
use parking_occupancy::pipeline::{FrameOutput, MetricsSummary, PipelineEvent, SpaceDetections};
use parking_occupancy::source::FrameLoader;
use parking_occupancy::types::Pose;
use parking_occupancy::{
    Config, FrameInput, FrameProcessor, ManualCommand, ParkingRegistry, ParkingSession,
};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "config.yaml";

/// What gets written to `output.snapshot_path` after every tick.
#[derive(Serialize)]
struct Snapshot<'a> {
    tick: u64,
    timestamp_ms: u64,
    spaces: Vec<SpaceSnapshot>,
    summary: OccupancySummary,
    detections: &'a [SpaceDetections],
    free_roaming: &'a [(String, Pose)],
    metrics: MetricsSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🅿️  Parking Occupancy Tracker Starting");

    config.validate().context("invalid configuration")?;
    info!("✓ Configuration loaded");

    let registry = ParkingRegistry::load_dir(
        &config.parking.geometry_dir,
        &config.parking.file_prefix,
        config.parking.count,
        config.parking.column_order,
    )?;
    info!(
        "✓ {} parking spaces loaded from {}",
        registry.len(),
        config.parking.geometry_dir
    );

    let mut session = ParkingSession::from_config(registry, &config, now_ms())?;
    let mut processor = FrameProcessor::new(config.runtime.diagnostics_every);

    let transform = config.transform()?;
    let loaders: Vec<FrameLoader> = config
        .sources
        .bounding_boxes
        .iter()
        .chain(&config.sources.point_clouds)
        .map(|s| FrameLoader::new(s, &config.sources, transform.clone()))
        .collect();

    if loaders.is_empty() {
        warn!("No frame sources configured; only manual commands will be applied");
    } else {
        info!("✓ {} frame source(s) ready", loaders.len());
    }

    let (tx, mut commands) = mpsc::channel::<ManualCommand>(64);
    tokio::spawn(read_commands(tx));

    let mut interval = tokio::time::interval(Duration::from_millis(config.runtime.tick_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut tick: u64 = 0;
    loop {
        interval.tick().await;

        if let Some(max) = config.runtime.max_ticks {
            if tick >= max {
                info!("Reached max_ticks={}", max);
                break;
            }
        }
        tick += 1;

        while let Ok(command) = commands.try_recv() {
            match command.apply(&mut session, now_ms()) {
                Ok(outcome) => info!("⌨️  {}", outcome),
                Err(e) => warn!("Command {:?} rejected: {}", command, e),
            }
        }

        // Every source fetched this tick feeds one processing cycle.
        let now = now_ms();
        let mut active = 0;
        let mut input = FrameInput::new(tick, now);
        for loader in &loaders {
            let Some(index) = frame_index(tick, loader.count(), config.runtime.loop_sources)
            else {
                continue;
            };
            active += 1;

            match loader.load(index, now).await {
                Ok(frame) => input.merge(frame),
                Err(e) => processor.skip_frame(&mut session, &e),
            }
        }
        let last_output = (!input.is_empty()).then(|| processor.process(&mut session, input));

        for event in session.bus.drain() {
            log_event(&event);
        }

        if let Some(path) = &config.output.snapshot_path {
            if let Err(e) = write_snapshot(path, tick, &session, last_output.as_ref()).await {
                warn!("Failed to write snapshot: {:#}", e);
            }
        }

        if !loaders.is_empty() && active == 0 {
            info!("All frame sources exhausted after {} ticks", tick - 1);
            break;
        }
    }

    let summary = session.occupancy.summary();
    let metrics = session.metrics.summary();
    info!("\n📊 Final Report:");
    info!("  Frames processed: {}", metrics.frames_processed);
    info!("  Frames skipped: {}", metrics.frames_skipped);
    info!("  Detections seen: {}", metrics.detections_seen);
    info!("  Tracks created/pruned: {}/{}", metrics.tracks_created, metrics.tracks_pruned);
    info!("  Status transitions: {}", metrics.transitions);
    info!(
        "  Spaces: {} free ({} target), {} occupied, {} unknown, {} locked of {}",
        summary.free, summary.target, summary.occupied, summary.unknown, summary.locked, summary.total
    );
    info!("  Processing Speed: {:.1} FPS", metrics.fps);

    Ok(())
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Frame index (1-based) a source should serve on `tick`, or `None` once it
/// has run out of frames.
fn frame_index(tick: u64, count: u64, looping: bool) -> Option<u64> {
    if count == 0 {
        None
    } else if tick <= count {
        Some(tick)
    } else if looping {
        Some((tick - 1) % count + 1)
    } else {
        None
    }
}

async fn read_commands(tx: mpsc::Sender<ManualCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match line.parse::<ManualCommand>() {
                Ok(command) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{}", e),
            },
            Ok(None) => {
                debug!("stdin closed, no more manual commands");
                break;
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Occupancy(e) => info!(
            "🚗 Space {}: {} -> {} ({:?})",
            e.uid, e.from, e.to, e.cause
        ),
        PipelineEvent::Unlocked { uid, .. } => info!("🔓 Space {} unlocked", uid),
        PipelineEvent::TrackPruned { uid, frame_index } => {
            debug!("Track {} pruned at frame {}", uid, frame_index)
        }
        PipelineEvent::FrameSkipped { frame_index, reason } => {
            debug!("Frame {} skipped: {}", frame_index, reason)
        }
    }
}

async fn write_snapshot(
    path: &str,
    tick: u64,
    session: &ParkingSession,
    output: Option<&FrameOutput>,
) -> Result<()> {
    let snapshot = Snapshot {
        tick,
        timestamp_ms: now_ms(),
        spaces: session.occupancy.snapshot(),
        summary: session.occupancy.summary(),
        detections: output.map(|o| o.spaces.as_slice()).unwrap_or(&[]),
        free_roaming: output.map(|o| o.free_roaming.as_slice()).unwrap_or(&[]),
        metrics: session.metrics.summary(),
    };
    let json = serde_json::to_string_pretty(&snapshot)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_indices_follow_ticks() {
        assert_eq!(frame_index(1, 3, false), Some(1));
        assert_eq!(frame_index(3, 3, false), Some(3));
        assert_eq!(frame_index(4, 3, false), None);
        assert_eq!(frame_index(4, 3, true), Some(1));
        assert_eq!(frame_index(8, 3, true), Some(2));
        assert_eq!(frame_index(1, 0, true), None);
    }
}
