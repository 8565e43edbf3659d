// src/pipeline/frame_processor.rs
//
// One ingestion cycle:
//   predict -> gather payloads -> bucket by polygon -> associate -> prune
//   -> occupancy -> sort
//
// All failures are absorbed here. Non-finite detections are dropped, a frame
// that could not be fetched is skipped without touching any state.

use crate::error::SourceError;
use crate::geometry::distance;
use crate::occupancy::{OccupancyEvent, OccupancySummary};
use crate::parking::{count_points, ParkingRegistry, ParkingSpace};
use crate::pipeline::event_bus::PipelineEvent;
use crate::pipeline::frame_context::{FrameInput, FramePayload, ParkingSession};
use crate::tracking::Association;
use crate::types::{Detection, Pose, Vec3};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Kept poses for one space this frame, sorted by ascending x.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SpaceDetections {
    pub uid: String,
    pub poses: Vec<Pose>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FrameOutput {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    /// Spaces with at least one kept pose, in uid order.
    pub spaces: Vec<SpaceDetections>,
    pub free_roaming: Vec<(String, Pose)>,
    pub events: Vec<OccupancyEvent>,
    pub summary: OccupancySummary,
}

impl FrameOutput {
    pub fn poses_for(&self, uid: &str) -> &[Pose] {
        self.spaces
            .iter()
            .find(|s| s.uid == uid)
            .map(|s| s.poses.as_slice())
            .unwrap_or(&[])
    }
}

pub struct FrameProcessor {
    frame_count: u64,
    diagnostics_every: u64,
    last_tracked_count: usize,
}

impl FrameProcessor {
    pub fn new(diagnostics_every: u64) -> Self {
        Self {
            frame_count: 0,
            diagnostics_every: diagnostics_every.max(1),
            last_tracked_count: 0,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Records a frame that could not be fetched or parsed. Nothing else in
    /// the session changes.
    pub fn skip_frame(&mut self, session: &mut ParkingSession, error: &SourceError) {
        let frame_index = match error {
            SourceError::Unavailable { index, .. } | SourceError::Malformed { index, .. } => {
                *index
            }
        };
        warn!("Frame {} skipped: {}", frame_index, error);
        session.metrics.inc(&session.metrics.frames_skipped);
        session.bus.publish(PipelineEvent::FrameSkipped {
            frame_index,
            reason: error.to_string(),
        });
    }

    /// Process one frame through the entire pipeline.
    pub fn process(&mut self, session: &mut ParkingSession, input: FrameInput) -> FrameOutput {
        let started = Instant::now();
        self.frame_count += 1;
        let created_before = session.tracker.created_count();

        // 1. Predict every live track once.
        session.tracker.begin_frame(input.frame_index);

        // 2. Gather every payload of the tick; coverage is their union.
        let mut candidates: Vec<Detection> = Vec::new();
        let mut coverage: HashSet<String> = HashSet::new();
        for payload in input.payloads {
            match payload {
                FramePayload::Detections(detections) => {
                    let (valid, dropped) = drop_non_finite(detections);
                    session.metrics.add(&session.metrics.detections_seen, valid.len() as u64);
                    if dropped > 0 {
                        debug!("Frame {}: dropped {} non-finite detections", input.frame_index, dropped);
                        session.metrics.add(&session.metrics.detections_dropped, dropped as u64);
                    }
                    candidates.extend(valid);
                    coverage.extend(session.registry.uids().map(str::to_string));
                }
                FramePayload::PointCloud(points) => {
                    let counts = count_points(&session.registry, &points, &session.volume);
                    let occupied: HashSet<usize> = counts.occupied().collect();
                    candidates.extend(
                        session
                            .registry
                            .all()
                            .iter()
                            .filter(|space| occupied.contains(&space.index))
                            .map(|space| {
                                synthetic_detection(
                                    space,
                                    session.volume.z_center,
                                    session.volume.height,
                                    input.frame_index,
                                )
                            }),
                    );
                    session.metrics.add(&session.metrics.detections_seen, points.len() as u64);
                    coverage.extend(counts.covered);
                }
            }
        }
        let (buckets, unanchored) = bucket_by_polygon(session.registry.all(), candidates);

        // 3. Associate per space in uid order, then the leftovers.
        let mut kept: Vec<Vec<Pose>> = vec![Vec::new(); session.registry.len()];
        let mut present: HashSet<String> = HashSet::new();
        let mut roaming = unanchored;

        for bucket in buckets {
            for detection in bucket {
                let Some(pos) = session
                    .tracker
                    .anchor(&session.registry, &detection)
                    .map(|s| s.index)
                    .and_then(|index| position_of(&session.registry, index))
                else {
                    roaming.push(detection);
                    continue;
                };
                let uid = session.registry.all()[pos].uid.clone();

                let outcome = session.tracker.associate_anchored(&uid, &detection);
                if let Some(pose) = outcome.kept_pose() {
                    kept[pos].push(pose);
                    present.insert(uid);
                } else if outcome == Association::Deleted {
                    session.metrics.inc(&session.metrics.tracks_pruned);
                    session.bus.publish(PipelineEvent::TrackPruned {
                        uid,
                        frame_index: input.frame_index,
                    });
                }
            }
        }

        for detection in &roaming {
            session.tracker.associate_free(detection);
        }

        // Confident tracks without a detection this frame still count.
        for (pos, space) in session.registry.all().iter().enumerate() {
            if let Some(pose) = session.tracker.carry_forward(&space.uid) {
                kept[pos].push(pose);
                present.insert(space.uid.clone());
            }
        }

        // 4. Drop tracks that lost confidence entirely.
        for uid in session.tracker.prune_divergent() {
            session.metrics.inc(&session.metrics.tracks_pruned);
            session.bus.publish(PipelineEvent::TrackPruned {
                uid,
                frame_index: input.frame_index,
            });
        }

        // 5. Occupancy in uid order.
        let events = session.occupancy.derive(
            &present,
            coverage.iter().map(String::as_str),
            input.timestamp_ms,
        );
        session.metrics.add(&session.metrics.transitions, events.len() as u64);
        session
            .bus
            .publish_all(events.iter().cloned().map(PipelineEvent::Occupancy));

        // 6. Stable display order.
        let spaces: Vec<SpaceDetections> = session
            .registry
            .all()
            .iter()
            .zip(kept)
            .filter(|(_, poses)| !poses.is_empty())
            .map(|(space, mut poses)| {
                poses.sort_by(|a, b| a.position.x.total_cmp(&b.position.x));
                SpaceDetections {
                    uid: space.uid.clone(),
                    poses,
                }
            })
            .collect();

        let created = session.tracker.created_count().saturating_sub(created_before);
        session.metrics.add(&session.metrics.tracks_created, created);
        session.metrics.inc(&session.metrics.frames_processed);
        session
            .metrics
            .set_timing(&session.metrics.process_time_us, started.elapsed().as_micros() as u64);

        let summary = session.occupancy.summary();
        self.log_diagnostics(session, input.frame_index, &summary);

        FrameOutput {
            frame_index: input.frame_index,
            timestamp_ms: input.timestamp_ms,
            spaces,
            free_roaming: session.tracker.free_roaming_poses(),
            events,
            summary,
        }
    }

    fn log_diagnostics(
        &mut self,
        session: &ParkingSession,
        frame_index: u64,
        summary: &OccupancySummary,
    ) {
        let tracked = session.tracker.anchored_count();

        if self.frame_count % self.diagnostics_every == 0 {
            info!(
                "Frame {} (#{}): free={} occupied={} unknown={} locked={} | tracks={} | {:.1} fps",
                frame_index,
                self.frame_count,
                summary.free,
                summary.occupied,
                summary.unknown,
                summary.locked,
                session.tracker.len(),
                session.metrics.fps(),
            );
        }

        if tracked != self.last_tracked_count {
            if tracked > self.last_tracked_count {
                info!(
                    "Frame {}: anchored tracks increased {} -> {}",
                    frame_index, self.last_tracked_count, tracked
                );
            } else {
                debug!(
                    "Frame {}: anchored tracks decreased {} -> {}",
                    frame_index, self.last_tracked_count, tracked
                );
            }
            self.last_tracked_count = tracked;
        }
    }

    pub fn reset(&mut self) {
        self.frame_count = 0;
        self.last_tracked_count = 0;
    }
}

fn drop_non_finite(detections: Vec<Detection>) -> (Vec<Detection>, usize) {
    let total = detections.len();
    let valid: Vec<Detection> = detections.into_iter().filter(Detection::is_finite).collect();
    let dropped = total - valid.len();
    (valid, dropped)
}

/// Splits detections into one bucket per space (registry order) by polygon
/// containment. A detection lands in the first space containing it; the rest
/// are returned separately.
fn bucket_by_polygon(
    spaces: &[ParkingSpace],
    detections: Vec<Detection>,
) -> (Vec<Vec<Detection>>, Vec<Detection>) {
    let mut buckets = vec![Vec::new(); spaces.len()];
    let mut outside = Vec::new();
    for detection in detections {
        let xy = detection.xy();
        match spaces.iter().position(|s| s.contains(xy)) {
            Some(pos) => buckets[pos].push(detection),
            None => outside.push(detection),
        }
    }
    (buckets, outside)
}

fn position_of(registry: &ParkingRegistry, index: usize) -> Option<usize> {
    registry
        .all()
        .binary_search_by_key(&index, |s| s.index)
        .ok()
}

/// Stand-in detection for a point-cloud-occupied space: the stall's center
/// and direction, sized to the stall footprint.
fn synthetic_detection(space: &ParkingSpace, z_center: f64, height: f64, frame_index: u64) -> Detection {
    let c = &space.corners;
    let side_a = distance(c[0], c[1]);
    let side_b = distance(c[1], c[2]);
    Detection::new(
        Vec3::new(space.center.x, space.center.y, z_center),
        space.orientation,
        Vec3::new(side_a.max(side_b), side_a.min(side_b), height),
        frame_index,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::OccupancyStatus;
    use crate::types::{Config, Point2};

    fn session_with(config: &Config) -> ParkingSession {
        let sq = |cx: f64| {
            vec![
                Point2::new(cx - 0.5, -0.5),
                Point2::new(cx + 0.5, -0.5),
                Point2::new(cx + 0.5, 0.5),
                Point2::new(cx - 0.5, 0.5),
            ]
        };
        let registry = ParkingRegistry::load(&[sq(0.0), sq(10.0), sq(20.0)]).unwrap();
        ParkingSession::from_config(registry, config, 0).unwrap()
    }

    fn session() -> ParkingSession {
        session_with(&Config::default())
    }

    fn det(x: f64, y: f64) -> Detection {
        Detection::new(Vec3::new(x, y, 0.0), 0.0, Vec3::splat(1.0), 0)
    }

    #[test]
    fn detection_inside_space_occupies_it() {
        let mut s = session();
        let mut p = FrameProcessor::new(150);
        let out = p.process(&mut s, FrameInput::detections(1, 150, vec![det(0.1, 0.0)]));

        assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));
        assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Free));
        assert_eq!(out.poses_for("1").len(), 1);
        assert_eq!(out.summary.occupied, 1);
        assert_eq!(s.metrics.summary().tracks_created, 1);
    }

    #[test]
    fn nan_detection_is_dropped() {
        let mut s = session();
        let mut p = FrameProcessor::new(150);
        let out = p.process(
            &mut s,
            FrameInput::detections(1, 150, vec![det(f64::NAN, 0.0), det(10.0, 0.0)]),
        );
        assert_eq!(out.spaces.len(), 1);
        assert_eq!(out.spaces[0].uid, "2");
        assert_eq!(s.metrics.summary().detections_dropped, 1);
    }

    #[test]
    fn first_detection_wins_a_space() {
        let mut s = session();
        let mut p = FrameProcessor::new(150);
        let out = p.process(
            &mut s,
            FrameInput::detections(1, 150, vec![det(0.3, 0.0), det(-0.3, 0.0)]),
        );
        let poses = out.poses_for("1");
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].position.x, 0.3);
    }

    #[test]
    fn output_is_in_uid_order_with_sorted_poses() {
        let mut s = session();
        let mut p = FrameProcessor::new(150);
        let out = p.process(
            &mut s,
            FrameInput::detections(1, 150, vec![det(20.2, 0.0), det(0.0, 0.0), det(10.1, 0.0)]),
        );
        let uids: Vec<_> = out.spaces.iter().map(|s| s.uid.as_str()).collect();
        assert_eq!(uids, vec!["1", "2", "3"]);
        for space in &out.spaces {
            assert!(space
                .poses
                .windows(2)
                .all(|w| w[0].position.x <= w[1].position.x));
        }
    }

    #[test]
    fn diverged_track_is_removed_by_next_cycle() {
        let mut s = session();
        let mut p = FrameProcessor::new(150);
        p.process(&mut s, FrameInput::detections(1, 0, vec![det(0.0, 0.0)]));
        assert!(s.tracker.get("1").is_some());

        let mut t = 150;
        for f in 2..=4 {
            p.process(&mut s, FrameInput::detections(f, t, vec![]));
            t += 150;
        }
        assert!(s.tracker.get("1").is_none());
        assert!(s.metrics.summary().tracks_pruned >= 1);
        assert!(s
            .bus
            .drain()
            .iter()
            .any(|e| matches!(e, PipelineEvent::TrackPruned { uid, .. } if uid == "1")));
    }

    #[test]
    fn point_cloud_covers_only_its_footprint() {
        let mut s = session();
        let mut p = FrameProcessor::new(150);
        p.process(&mut s, FrameInput::detections(1, 0, vec![det(20.0, 0.0)]));
        assert_eq!(s.occupancy.status("3"), Some(OccupancyStatus::Occupied));

        let cloud: Vec<Vec3> = (0..20)
            .map(|i| Vec3::new(-0.4 + i as f64 * 0.04, 0.0, 3.0))
            .collect();
        let out = p.process(&mut s, FrameInput::point_cloud(2, 150, cloud));

        assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));
        assert_eq!(out.poses_for("1")[0].position.z, 3.0);
        // Spaces 2 and 3 are outside the cloud's bounds.
        assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Unknown));
        assert_eq!(s.occupancy.status("3"), Some(OccupancyStatus::Unknown));
    }

    #[test]
    fn merged_tick_predicts_once_and_unions_coverage() {
        let mut s = session();
        let mut p = FrameProcessor::new(150);
        let cloud = || -> Vec<Vec3> {
            (0..20)
                .map(|i| Vec3::new(-0.4 + i as f64 * 0.04, 0.0, 3.0))
                .collect()
        };

        let mut events = 0;
        for f in 1..=4u64 {
            let mut input = FrameInput::detections(f, f * 150, vec![det(20.0, 0.0)]);
            input.merge(FrameInput::point_cloud(f, f * 150, cloud()));
            let out = p.process(&mut s, input);
            events += out.events.len();

            assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Occupied));
            assert_eq!(s.occupancy.status("2"), Some(OccupancyStatus::Free));
            assert_eq!(s.occupancy.status("3"), Some(OccupancyStatus::Occupied));
        }
        // Only the first tick leaves the initial unknown state.
        assert_eq!(events, 3);

        // One predict per tick: the filter matches a detections-only run.
        let mut alone = session();
        let mut q = FrameProcessor::new(150);
        for f in 1..=4u64 {
            q.process(&mut alone, FrameInput::detections(f, f * 150, vec![det(20.0, 0.0)]));
        }
        let merged = s.tracker.get("3").unwrap();
        assert_eq!(merged.hits, 4);
        assert_eq!(
            merged.filter.position_variance(),
            alone.tracker.get("3").unwrap().filter.position_variance()
        );
    }

    #[test]
    fn free_roaming_detection_never_occupies() {
        let mut config = Config::default();
        config.tracking.association.track_free_roaming = true;
        let mut s = session_with(&config);
        let mut p = FrameProcessor::new(150);
        let out = p.process(&mut s, FrameInput::detections(1, 0, vec![det(5.0, 30.0)]));

        assert_eq!(out.free_roaming.len(), 1);
        assert_eq!(out.free_roaming[0].0, "veh-1");
        assert_eq!(out.summary.occupied, 0);
    }

    #[test]
    fn skipped_frame_leaves_state_untouched() {
        let mut s = session();
        let mut p = FrameProcessor::new(150);
        p.process(&mut s, FrameInput::detections(1, 0, vec![det(0.0, 0.0)]));
        let before = s.occupancy.snapshot();
        let (vx, _) = s.tracker.get("1").unwrap().filter.position_variance();

        let err = SourceError::Unavailable {
            index: 2,
            path: "missing.csv".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "nope"),
        };
        p.skip_frame(&mut s, &err);

        assert_eq!(s.occupancy.snapshot(), before);
        assert_eq!(s.tracker.get("1").unwrap().filter.position_variance().0, vx);
        assert_eq!(s.metrics.summary().frames_skipped, 1);
    }
}
