// src/tracking/association.rs
//
// Per-frame matching of detections to tracks.
//
// Design:
//   - Space-anchored tracks are keyed by the uid of the nearest parking-space
//     center within `capture_radius`; at most one track per space
//   - Greedy, first detection in iteration order wins a space; later
//     detections for a uid already updated this frame are ignored
//   - Free-roaming tracks (synthetic `veh-N` ids) follow unanchored detections
//     by nearest last-known position and never feed occupancy
//   - Tracks without a detection coast on their prediction and stay visible
//     while their covariance is still confident

use crate::parking::{ParkingRegistry, ParkingSpace};
use crate::tracking::kalman::{KalmanConfig, KalmanFilter, TrackConfidence};
use crate::geometry::distance;
use crate::types::{Detection, Pose};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Maximum distance from a detection to a space center for anchoring.
    pub capture_radius: f64,
    /// Track detections that anchor to no space as free-roaming vehicles.
    pub track_free_roaming: bool,
    /// Maximum jump between a free-roaming track and its next detection.
    pub free_roaming_radius: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            capture_radius: 20.0,
            track_free_roaming: false,
            free_roaming_radius: 5.0,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// A tracked object, either holding a parking space or roaming.
#[derive(Debug, Clone)]
pub struct Track {
    pub uid: String,
    pub filter: KalmanFilter,
    /// True when `uid` is a parking-space uid.
    pub anchored: bool,
    pub created_frame: u64,
    pub last_seen_frame: u64,
    pub hits: u32,
}

impl Track {
    fn new(
        uid: String,
        anchored: bool,
        detection: &Detection,
        frame_index: u64,
        config: &KalmanConfig,
    ) -> Self {
        Self {
            uid,
            filter: KalmanFilter::new(
                config,
                detection.position,
                detection.rotation,
                detection.scale,
            ),
            anchored,
            created_frame: frame_index,
            last_seen_frame: frame_index,
            hits: 1,
        }
    }

    fn apply(&mut self, detection: &Detection, frame_index: u64) {
        self.filter.update(detection.position, detection.rotation);
        self.filter.set_scale(detection.scale);
        self.last_seen_frame = frame_index;
        self.hits += 1;
    }

    pub fn pose(&self) -> Pose {
        self.filter.pose()
    }
}

/// What happened to one anchored detection.
#[derive(Debug, Clone, PartialEq)]
pub enum Association {
    /// No track existed; one was seeded and the raw detection is kept.
    Created(Pose),
    /// Existing track updated and confident; its smoothed pose is kept.
    Kept(Pose),
    /// Existing track updated but not yet trusted.
    Retained,
    /// Existing track diverged and was deleted.
    Deleted,
    /// The space already took a detection this frame.
    Ignored,
}

impl Association {
    /// Pose to report for this space this frame, if any.
    pub fn kept_pose(&self) -> Option<Pose> {
        match self {
            Self::Created(p) | Self::Kept(p) => Some(*p),
            _ => None,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct AssociationEngine {
    config: AssociationConfig,
    kalman: KalmanConfig,
    tracks: BTreeMap<String, Track>,
    updated_this_frame: HashSet<String>,
    frame_index: u64,
    next_free_id: u64,
    created_count: u64,
}

impl AssociationEngine {
    pub fn new(config: AssociationConfig, kalman: KalmanConfig) -> Self {
        Self {
            config,
            kalman,
            tracks: BTreeMap::new(),
            updated_this_frame: HashSet::new(),
            frame_index: 0,
            next_free_id: 1,
            created_count: 0,
        }
    }

    pub fn config(&self) -> &AssociationConfig {
        &self.config
    }

    pub fn kalman_config(&self) -> &KalmanConfig {
        &self.kalman
    }

    /// Starts a new frame: every live track is predicted exactly once.
    pub fn begin_frame(&mut self, frame_index: u64) {
        self.frame_index = frame_index;
        self.updated_this_frame.clear();
        for track in self.tracks.values_mut() {
            track.filter.predict();
        }
    }

    /// Nearest space whose center lies within the capture radius.
    pub fn anchor<'r>(
        &self,
        registry: &'r ParkingRegistry,
        detection: &Detection,
    ) -> Option<&'r ParkingSpace> {
        registry.nearest_within(detection.xy(), self.config.capture_radius)
    }

    /// Associates one detection already anchored to `uid`.
    pub fn associate_anchored(&mut self, uid: &str, detection: &Detection) -> Association {
        if self.updated_this_frame.contains(uid) {
            debug!("Space {}: extra detection ignored this frame", uid);
            return Association::Ignored;
        }
        self.updated_this_frame.insert(uid.to_string());

        let Some(track) = self.tracks.get_mut(uid) else {
            let track = Track::new(
                uid.to_string(),
                true,
                detection,
                self.frame_index,
                &self.kalman,
            );
            debug!(
                "New track for space {} at ({:.2}, {:.2})",
                uid, detection.position.x, detection.position.y
            );
            self.tracks.insert(uid.to_string(), track);
            self.created_count += 1;
            return Association::Created(Pose {
                position: detection.position,
                rotation: detection.rotation,
                scale: detection.scale,
            });
        };

        track.apply(detection, self.frame_index);
        match track.filter.classify(&self.kalman) {
            TrackConfidence::Confident => Association::Kept(track.pose()),
            TrackConfidence::Tentative => Association::Retained,
            TrackConfidence::Divergent => {
                let (vx, vy) = track.filter.position_variance();
                info!(
                    "Track {} deleted after update (variance {:.1}/{:.1})",
                    uid, vx, vy
                );
                self.tracks.remove(uid);
                Association::Deleted
            }
        }
    }

    /// Associates a detection that anchored to no space. Returns the pose to
    /// report, or `None` when free-roaming tracking is off.
    pub fn associate_free(&mut self, detection: &Detection) -> Option<Pose> {
        if !self.config.track_free_roaming {
            return None;
        }

        let point = detection.xy();
        let nearest = self
            .tracks
            .values()
            .filter(|t| !t.anchored && !self.updated_this_frame.contains(&t.uid))
            .map(|t| (t.uid.clone(), distance(point, t.filter.position())))
            .filter(|(_, d)| *d <= self.config.free_roaming_radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(uid, _)| uid);

        let uid = match nearest {
            Some(uid) => {
                if let Some(track) = self.tracks.get_mut(&uid) {
                    track.apply(detection, self.frame_index);
                }
                uid
            }
            None => {
                let uid = format!("veh-{}", self.next_free_id);
                self.next_free_id += 1;
                let track = Track::new(uid.clone(), false, detection, self.frame_index, &self.kalman);
                self.tracks.insert(uid.clone(), track);
                self.created_count += 1;
                debug!("New free-roaming track {}", uid);
                uid
            }
        };

        self.updated_this_frame.insert(uid.clone());
        self.tracks.get(&uid).map(Track::pose)
    }

    /// Predicted pose of a track that got no detection this frame but is
    /// still confident.
    pub fn carry_forward(&self, uid: &str) -> Option<Pose> {
        if self.updated_this_frame.contains(uid) {
            return None;
        }
        let track = self.tracks.get(uid)?;
        (track.filter.classify(&self.kalman) == TrackConfidence::Confident).then(|| track.pose())
    }

    /// Poses of confident free-roaming tracks, updated or coasting.
    pub fn free_roaming_poses(&self) -> Vec<(String, Pose)> {
        self.tracks
            .values()
            .filter(|t| !t.anchored)
            .filter(|t| {
                self.updated_this_frame.contains(&t.uid)
                    || t.filter.classify(&self.kalman) == TrackConfidence::Confident
            })
            .map(|t| (t.uid.clone(), t.pose()))
            .collect()
    }

    /// Deletes every track whose covariance crossed the divergence threshold.
    /// Returns the removed uids.
    pub fn prune_divergent(&mut self) -> Vec<String> {
        let kalman = &self.kalman;
        let mut removed = Vec::new();
        self.tracks.retain(|uid, t| {
            if t.filter.classify(kalman) == TrackConfidence::Divergent {
                let (vx, vy) = t.filter.position_variance();
                info!(
                    "Track {} pruned (variance {:.1}/{:.1}, last seen frame {})",
                    uid, vx, vy, t.last_seen_frame
                );
                removed.push(uid.clone());
                return false;
            }
            true
        });
        removed
    }

    pub fn was_updated(&self, uid: &str) -> bool {
        self.updated_this_frame.contains(uid)
    }

    pub fn get(&self, uid: &str) -> Option<&Track> {
        self.tracks.get(uid)
    }

    /// Live tracks in uid order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn anchored_count(&self) -> usize {
        self.tracks.values().filter(|t| t.anchored).count()
    }

    pub fn created_count(&self) -> u64 {
        self.created_count
    }

    pub fn remove(&mut self, uid: &str) -> Option<Track> {
        self.updated_this_frame.remove(uid);
        self.tracks.remove(uid)
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.updated_this_frame.clear();
        self.frame_index = 0;
        self.next_free_id = 1;
        self.created_count = 0;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Point2, Vec3};

    fn det(x: f64, y: f64) -> Detection {
        Detection::new(Vec3::new(x, y, 0.0), 0.0, Vec3::splat(1.0), 0)
    }

    fn engine() -> AssociationEngine {
        AssociationEngine::new(AssociationConfig::default(), KalmanConfig::default())
    }

    fn registry() -> ParkingRegistry {
        let sq = |cx: f64| {
            vec![
                Point2::new(cx - 0.5, -0.5),
                Point2::new(cx + 0.5, -0.5),
                Point2::new(cx + 0.5, 0.5),
                Point2::new(cx - 0.5, 0.5),
            ]
        };
        ParkingRegistry::load(&[sq(0.0), sq(10.0), sq(20.0)]).unwrap()
    }

    #[test]
    fn first_detection_creates_and_keeps_raw_pose() {
        let mut e = engine();
        e.begin_frame(1);
        let out = e.associate_anchored("1", &det(0.2, 0.1));
        match out {
            Association::Created(p) => assert_eq!(p.position, Vec3::new(0.2, 0.1, 0.0)),
            other => panic!("expected Created, got {:?}", other),
        }
        assert_eq!(e.len(), 1);
        assert_eq!(e.created_count(), 1);
    }

    #[test]
    fn repeated_detection_is_kept_smoothed() {
        let mut e = engine();
        e.begin_frame(1);
        e.associate_anchored("1", &det(0.0, 0.0));
        e.begin_frame(2);
        let out = e.associate_anchored("1", &det(0.4, 0.0));
        let pose = out.kept_pose().expect("confident after second hit");
        assert!(pose.position.x > 0.0 && pose.position.x < 0.4);
        assert_eq!(e.get("1").unwrap().hits, 2);
    }

    #[test]
    fn second_detection_same_space_same_frame_is_ignored() {
        let mut e = engine();
        e.begin_frame(1);
        e.associate_anchored("1", &det(0.0, 0.0));
        assert_eq!(e.associate_anchored("1", &det(0.3, 0.3)), Association::Ignored);
        assert_eq!(e.get("1").unwrap().hits, 1);
    }

    #[test]
    fn anchor_uses_capture_radius() {
        let e = engine();
        let reg = registry();
        assert_eq!(e.anchor(&reg, &det(9.0, 1.0)).unwrap().uid, "2");
        assert!(e.anchor(&reg, &det(100.0, 0.0)).is_none());
    }

    #[test]
    fn confident_track_carries_forward_then_goes_quiet() {
        let mut e = engine();
        for f in 1..=5 {
            e.begin_frame(f);
            e.associate_anchored("1", &det(0.0, 0.0));
        }
        e.begin_frame(6);
        assert!(e.carry_forward("1").is_some());

        let mut quiet_at = None;
        for f in 7..=12 {
            e.begin_frame(f);
            if e.carry_forward("1").is_none() {
                quiet_at = Some(f);
                break;
            }
        }
        assert!(quiet_at.is_some(), "coasting track never lost confidence");
    }

    #[test]
    fn unobserved_track_is_pruned() {
        let mut e = engine();
        e.begin_frame(1);
        e.associate_anchored("1", &det(0.0, 0.0));
        let mut pruned = Vec::new();
        for f in 2..=20 {
            e.begin_frame(f);
            pruned.extend(e.prune_divergent());
        }
        assert_eq!(pruned, vec!["1".to_string()]);
        assert!(e.is_empty());
    }

    #[test]
    fn free_roaming_disabled_by_default() {
        let mut e = engine();
        e.begin_frame(1);
        assert!(e.associate_free(&det(50.0, 50.0)).is_none());
        assert!(e.is_empty());
    }

    #[test]
    fn free_roaming_follows_nearest_track() {
        let mut e = AssociationEngine::new(
            AssociationConfig {
                track_free_roaming: true,
                ..Default::default()
            },
            KalmanConfig::default(),
        );
        e.begin_frame(1);
        e.associate_free(&det(50.0, 50.0));
        e.associate_free(&det(80.0, 50.0));
        assert_eq!(e.len(), 2);

        e.begin_frame(2);
        e.associate_free(&det(51.0, 50.0));
        assert_eq!(e.len(), 2, "close detection should reuse veh-1");
        assert_eq!(e.get("veh-1").unwrap().hits, 2);
        assert_eq!(e.anchored_count(), 0);

        e.associate_free(&det(51.5, 50.0));
        assert_eq!(e.len(), 3, "veh-1 already taken this frame");
    }

    #[test]
    fn reset_clears_table_and_ids() {
        let mut e = AssociationEngine::new(
            AssociationConfig {
                track_free_roaming: true,
                ..Default::default()
            },
            KalmanConfig::default(),
        );
        e.begin_frame(1);
        e.associate_free(&det(0.0, 0.0));
        e.reset();
        assert!(e.is_empty());
        e.begin_frame(1);
        e.associate_free(&det(0.0, 0.0));
        assert!(e.get("veh-1").is_some());
    }
}
