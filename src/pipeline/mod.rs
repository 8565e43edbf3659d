// src/pipeline/mod.rs

pub mod event_bus;
pub mod frame_context;
pub mod frame_processor;
pub mod metrics;

pub use event_bus::{EventBus, PipelineEvent};
pub use frame_context::{FrameInput, FramePayload, ParkingSession};
pub use frame_processor::{FrameOutput, FrameProcessor, SpaceDetections};
pub use metrics::{MetricsSummary, PipelineMetrics};
