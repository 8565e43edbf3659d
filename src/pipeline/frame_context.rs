// src/pipeline/frame_context.rs
//
// Session state and per-frame input.
//
// ParkingSession owns everything that outlives a frame: the registry, the
// occupancy records, the track table, the event bus and the counters. The
// host owns the session and lends it to the frame processor each tick, so
// there is no global state and only one writer at a time.

use crate::error::{ConfigError, OccupancyError};
use crate::occupancy::{OccupancyConfig, OccupancyEvent, OccupancyMap, OccupancyStatus};
use crate::parking::{ParkingRegistry, VolumeConfig};
use crate::pipeline::event_bus::{EventBus, PipelineEvent};
use crate::pipeline::metrics::PipelineMetrics;
use crate::tracking::{AssociationConfig, AssociationEngine, KalmanConfig};
use crate::types::{Config, Detection, Vec3};
use tracing::info;

/// One source's observations, already in the registry's frame.
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Object detections (bounding boxes). Covers every space.
    Detections(Vec<Detection>),
    /// Raw cloud points. Covers the spaces under the cloud's footprint.
    PointCloud(Vec<Vec3>),
}

/// Everything observed during one tick. Sources fetched in the same tick are
/// merged into one input so tracks are predicted once and coverage is the
/// union over all payloads.
#[derive(Debug, Clone)]
pub struct FrameInput {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub payloads: Vec<FramePayload>,
}

impl FrameInput {
    pub fn new(frame_index: u64, timestamp_ms: u64) -> Self {
        Self {
            frame_index,
            timestamp_ms,
            payloads: Vec::new(),
        }
    }

    pub fn detections(frame_index: u64, timestamp_ms: u64, detections: Vec<Detection>) -> Self {
        Self::new(frame_index, timestamp_ms).with(FramePayload::Detections(detections))
    }

    pub fn point_cloud(frame_index: u64, timestamp_ms: u64, points: Vec<Vec3>) -> Self {
        Self::new(frame_index, timestamp_ms).with(FramePayload::PointCloud(points))
    }

    pub fn with(mut self, payload: FramePayload) -> Self {
        self.payloads.push(payload);
        self
    }

    /// Appends another source's payloads. Index and timestamp stay ours.
    pub fn merge(&mut self, other: FrameInput) {
        self.payloads.extend(other.payloads);
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

pub struct ParkingSession {
    pub registry: ParkingRegistry,
    pub occupancy: OccupancyMap,
    pub tracker: AssociationEngine,
    pub volume: VolumeConfig,
    pub bus: EventBus,
    pub metrics: PipelineMetrics,
}

impl ParkingSession {
    pub fn new(
        registry: ParkingRegistry,
        kalman: KalmanConfig,
        association: AssociationConfig,
        occupancy: OccupancyConfig,
        volume: VolumeConfig,
        event_capacity: usize,
        now_ms: u64,
    ) -> Result<Self, ConfigError> {
        kalman.validate()?;
        let occupancy = OccupancyMap::new(registry.uids(), occupancy, now_ms);
        info!(
            "Session ready: {} spaces, capture_radius={}, debounce={}ms",
            registry.len(),
            association.capture_radius,
            occupancy.config().debounce_ms
        );
        Ok(Self {
            occupancy,
            tracker: AssociationEngine::new(association, kalman),
            registry,
            volume,
            bus: EventBus::new(event_capacity),
            metrics: PipelineMetrics::new(),
        })
    }

    pub fn from_config(
        registry: ParkingRegistry,
        config: &Config,
        now_ms: u64,
    ) -> Result<Self, ConfigError> {
        Self::new(
            registry,
            config.tracking.kalman.clone(),
            config.tracking.association.clone(),
            config.occupancy.clone(),
            config.point_cloud.clone(),
            config.runtime.event_capacity,
            now_ms,
        )
    }

    fn publish(&mut self, events: &[OccupancyEvent]) {
        self.metrics.add(&self.metrics.manual_overrides, events.len() as u64);
        self.bus
            .publish_all(events.iter().cloned().map(PipelineEvent::Occupancy));
    }

    pub fn set_manual_status(
        &mut self,
        uid: &str,
        status: OccupancyStatus,
        now_ms: u64,
    ) -> Result<(), OccupancyError> {
        let event = self.occupancy.set_manual_status(uid, status, now_ms)?;
        self.publish(&[event]);
        Ok(())
    }

    pub fn unlock(&mut self, uid: &str, now_ms: u64) -> Result<bool, OccupancyError> {
        let was_locked = self.occupancy.unlock(uid)?;
        if was_locked {
            self.metrics.inc(&self.metrics.manual_overrides);
            self.bus.publish(PipelineEvent::Unlocked {
                uid: uid.to_string(),
                timestamp_ms: now_ms,
            });
        }
        Ok(was_locked)
    }

    /// Returns whether `uid` ended up as the target.
    pub fn select_target(&mut self, uid: &str, now_ms: u64) -> Result<bool, OccupancyError> {
        let events = self.occupancy.select_target(uid, now_ms)?;
        self.publish(&events);
        Ok(self.occupancy.status(uid) == Some(OccupancyStatus::Target))
    }

    pub fn clear_targets(&mut self, now_ms: u64) -> usize {
        let events = self.occupancy.clear_targets(now_ms);
        self.publish(&events);
        events.len()
    }

    /// Drops every track and returns occupancy to its initial state. The
    /// registry is kept. Pending events are discarded and replaced by one
    /// reset event per changed space; returns how many were published.
    pub fn reset(&mut self, now_ms: u64) -> usize {
        self.tracker.reset();
        self.bus.drain();
        let events = self.occupancy.reset(now_ms);
        self.bus
            .publish_all(events.iter().cloned().map(PipelineEvent::Occupancy));
        events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::TransitionCause;
    use crate::types::Point2;

    fn session() -> ParkingSession {
        let sq = |cx: f64| {
            vec![
                Point2::new(cx - 0.5, -0.5),
                Point2::new(cx + 0.5, -0.5),
                Point2::new(cx + 0.5, 0.5),
                Point2::new(cx - 0.5, 0.5),
            ]
        };
        let registry = ParkingRegistry::load(&[sq(0.0), sq(10.0)]).unwrap();
        ParkingSession::from_config(registry, &Config::default(), 0).unwrap()
    }

    #[test]
    fn invalid_kalman_config_is_fatal() {
        let registry = ParkingRegistry::load(&[vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ]])
        .unwrap();
        let mut config = Config::default();
        config.tracking.kalman.r_position = 0.0;
        assert!(ParkingSession::from_config(registry, &config, 0).is_err());
    }

    #[test]
    fn manual_operations_publish_events() {
        let mut s = session();
        s.set_manual_status("1", OccupancyStatus::Occupied, 10).unwrap();
        assert!(s.unlock("1", 20).unwrap());
        assert!(!s.unlock("1", 30).unwrap());

        let events = s.bus.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], PipelineEvent::Unlocked { .. }));
        assert!(s.set_manual_status("7", OccupancyStatus::Free, 0).is_err());
    }

    #[test]
    fn target_needs_free_space() {
        let mut s = session();
        assert!(!s.select_target("1", 0).unwrap(), "unknown is not free");
        s.set_manual_status("1", OccupancyStatus::Free, 0).unwrap();
        assert!(s.select_target("1", 5).unwrap());
        assert_eq!(s.clear_targets(10), 1);
        assert_eq!(s.occupancy.status("1"), Some(OccupancyStatus::Free));
    }

    #[test]
    fn reset_replaces_pending_events() {
        let mut s = session();
        s.set_manual_status("1", OccupancyStatus::Occupied, 10).unwrap();
        s.set_manual_status("2", OccupancyStatus::Free, 10).unwrap();

        assert_eq!(s.reset(50), 2);
        let events = s.bus.drain();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            PipelineEvent::Occupancy(o)
                if o.cause == TransitionCause::Reset && o.to == OccupancyStatus::Unknown
        )));
        assert!(s.tracker.is_empty());
    }
}
