//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `normalizer` - OCR text cleanup and confusion folding
//! - `similarity` - Plate string similarity scoring
//! - `temporal` - Expected-appearance window bias
//! - `correction` - Two-pass plate correction against the known-plate registry
//! - `cooldown` - Per-plate emission cooldown
//! - `decision` - Access decision resolution
//! - `pipeline` - Frame pipeline orchestrator
//! - `gate` - Gate controller interface
//! - `gate_worker` - Async gate command worker

pub mod cooldown;
pub mod correction;
pub mod decision;
pub mod gate;
pub mod gate_worker;
pub mod normalizer;
pub mod pipeline;
pub mod similarity;
pub mod temporal;

// Re-export commonly used types
pub use correction::PlateCorrector;
pub use gate::GateController;
pub use gate_worker::{create_gate_worker, GateCmd, GateCmdWorker, GateTrigger};
pub use pipeline::{Pipeline, PipelineError};
