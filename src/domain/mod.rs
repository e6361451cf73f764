//! Domain models - core plate, vehicle and event types
//!
//! This module contains the canonical data types used throughout the system:
//! - `DetectionEvent` - the audit record of one accepted plate occurrence
//! - `VehicleStatusRecord` - access status of a vehicle
//! - `Frame`, `Detection`, `Recognition` - collaborator inputs and outputs
//! - `KnownPlateRegistry` - ordered table of expected plates and time windows

pub mod registry;
pub mod types;

pub use registry::{KnownPlateEntry, KnownPlateRegistry};
pub use types::{
    BoundingBox, CorrectedPlate, Decision, Detection, DetectionEvent, Direction, EventSource,
    Frame, RawObservation, Recognition, VehicleStatus, VehicleStatusRecord,
};
