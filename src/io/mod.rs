//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `frames` - Frame sources (image sequences, blank frames)
//! - `vision` - Plate detector / text recognizer seams and replay adapter
//! - `status_store` - Vehicle access status persistence
//! - `egress` - Detection event output (JSONL format)
//! - `snapshot` - Event snapshot images
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress;
pub mod frames;
pub mod prometheus;
pub mod snapshot;
pub mod status_store;
pub mod vision;

// Re-export commonly used types
pub use egress::{EventSink, JsonlEventSink, MemoryEventSink};
pub use frames::{BlankFrameSource, FrameSource, ImageSequenceSource};
pub use snapshot::{DirSnapshotStore, SnapshotStore};
pub use status_store::{FileStatusStore, MemoryStatusStore, VehicleStatusStore};
pub use vision::{RegionDetector, ReplayVision, TextRecognizer};
