// src/pipeline/event_bus.rs
//
// Decoupled event system. The frame processor and manual overrides publish
// here instead of calling into display code; the host drains once per tick.

use crate::occupancy::OccupancyEvent;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A space changed status (automatic, manual or coverage loss).
    Occupancy(OccupancyEvent),

    /// A space lock was cleared by hand.
    Unlocked { uid: String, timestamp_ms: u64 },

    /// A track was deleted because its covariance diverged.
    TrackPruned { uid: String, frame_index: u64 },

    /// A frame could not be fetched or parsed; state was left untouched.
    FrameSkipped { frame_index: u64, reason: String },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn publish_all(&mut self, events: impl IntoIterator<Item = PipelineEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}
