//! Frame pipeline orchestration
//!
//! The Pipeline drives one camera's frames through:
//! - Sampling (every Nth frame by 1-based index)
//! - ROI extraction and upscaling
//! - Plate detection, OCR and correction against the known-plate registry
//! - Cooldown deduplication
//! - Access decision, snapshot, event persistence and gate trigger
//!
//! It runs synchronously; each frame completes before the next is read.

mod handlers;
pub mod roi;
#[cfg(test)]
mod tests;

use crate::domain::types::{BoundingBox, DetectionEvent, Direction, Frame};
use crate::infra::config::{CollaboratorErrorPolicy, Config, RoiConfig};
use crate::infra::metrics::Metrics;
use crate::io::egress::EventSink;
use crate::io::frames::FrameSource;
use crate::io::snapshot::SnapshotStore;
use crate::io::status_store::VehicleStatusStore;
use crate::io::vision::{RegionDetector, TextRecognizer};
use crate::services::cooldown::CooldownTracker;
use crate::services::correction::PlateCorrector;
use crate::services::decision::DecisionResolver;
use crate::services::gate_worker::GateTrigger;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Collaborator that failed while processing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Detect,
    Recognize,
    Status,
    Sink,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::Detect => "detect",
            Stage::Recognize => "recognize",
            Stage::Status => "status",
            Stage::Sink => "sink",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame source unavailable: {source_name}: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("{stage} failed at frame {frame_index}: {source}")]
    Collaborator {
        stage: Stage,
        frame_index: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PipelineError {
    pub(crate) fn collaborator(stage: Stage, frame_index: u64, err: anyhow::Error) -> Self {
        PipelineError::Collaborator { stage, frame_index, source: err.into() }
    }
}

/// Outcome of one detected region (or of the whole-ROI fallback pass)
#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
    Emitted(DetectionEvent),
    /// No text, or text the correction engine could not resolve
    Unread { raw_text: Option<String>, ocr_confidence: f64 },
    /// Resolved plate still inside its cooldown window
    Cooldown { plate: String, since_last_seconds: f64 },
    /// Detector box collapsed to nothing after mapping back to the frame
    EmptyRegion { bbox: BoundingBox },
}

/// Per-frame result for display and testing
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub timestamp: f64,
    /// ROI was empty; nothing else ran
    pub roi_empty: bool,
    /// Detector returned no regions and the whole ROI was read instead
    pub fallback_used: bool,
    pub outcomes: Vec<RegionOutcome>,
}

impl FrameReport {
    pub fn events(&self) -> impl Iterator<Item = &DetectionEvent> {
        self.outcomes.iter().filter_map(|o| match o {
            RegionOutcome::Emitted(event) => Some(event),
            _ => None,
        })
    }
}

/// Totals for one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_seen: u64,
    /// Sampled frames, including ones abandoned partway through
    pub frames_processed: u64,
    /// Events persisted, counted as they are emitted
    pub events: u64,
    pub frames_failed: u64,
    /// Stop signal ended the run before the source was exhausted
    pub stopped: bool,
}

/// Media time of a frame in whole seconds
pub fn frame_timestamp(frame_index: u64, fps: f64) -> f64 {
    if !fps.is_finite() || fps <= 0.0 {
        return frame_index as f64;
    }
    (frame_index as f64 / fps).floor()
}

/// Pipeline parameters taken from `Config`
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frame_skip: u64,
    pub fps: f64,
    pub roi: RoiConfig,
    pub ocr_confidence: f64,
    pub fallback_ocr_confidence: f64,
    pub camera_id: String,
    pub direction: Direction,
    pub on_collaborator_error: CollaboratorErrorPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frame_skip: config.frame_skip().max(1),
            fps: config.fps(),
            roi: config.roi().clone(),
            ocr_confidence: config.ocr_confidence(),
            fallback_ocr_confidence: config.fallback_ocr_confidence(),
            camera_id: config.camera_id().to_string(),
            direction: config.direction(),
            on_collaborator_error: config.collaborator_error_policy(),
        }
    }
}

/// External services the pipeline talks to
pub struct Collaborators {
    pub detector: Arc<dyn RegionDetector>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub status_store: Arc<dyn VehicleStatusStore>,
    pub sink: Arc<dyn EventSink>,
    /// Snapshots are skipped when absent
    pub snapshots: Option<Arc<dyn SnapshotStore>>,
    pub gate: Arc<dyn GateTrigger>,
}

pub struct Pipeline {
    pub(crate) settings: PipelineSettings,
    pub(crate) corrector: PlateCorrector,
    pub(crate) cooldown: CooldownTracker,
    pub(crate) resolver: DecisionResolver,
    pub(crate) detector: Arc<dyn RegionDetector>,
    pub(crate) recognizer: Arc<dyn TextRecognizer>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) snapshots: Option<Arc<dyn SnapshotStore>>,
    pub(crate) gate: Arc<dyn GateTrigger>,
    pub(crate) metrics: Arc<Metrics>,
    /// Events emitted since construction
    pub(crate) emitted: u64,
}

impl Pipeline {
    pub fn new(config: &Config, collaborators: Collaborators, metrics: Arc<Metrics>) -> Self {
        let Collaborators { detector, recognizer, status_store, sink, snapshots, gate } = collaborators;
        Self {
            settings: PipelineSettings::from_config(config),
            corrector: PlateCorrector::from_config(config),
            cooldown: CooldownTracker::from_config(config),
            resolver: DecisionResolver::new(status_store, config.unknown_plate_policy()),
            detector,
            recognizer,
            sink,
            snapshots,
            gate,
            metrics,
            emitted: 0,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// True when the 1-based `frame_index` is sampled
    pub fn should_process(&self, frame_index: u64) -> bool {
        frame_index % self.settings.frame_skip == 0
    }

    /// Run one frame. Returns `None` for frames the sampler skips.
    ///
    /// On error, regions emitted before the failing stage stay emitted.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<Option<FrameReport>, PipelineError> {
        self.metrics.record_frame_seen();
        if !self.should_process(frame.index) {
            return Ok(None);
        }

        let started = Instant::now();
        let timestamp = frame_timestamp(frame.index, self.settings.fps);
        self.cooldown.evict(timestamp);
        self.metrics.set_cooldown_entries(self.cooldown.tracked() as u64);

        let result = self.handle_frame(frame, timestamp);
        self.metrics.record_frame_processed(started.elapsed().as_micros() as u64);
        result.map(Some)
    }

    /// Process frames until the source is exhausted or `stop` turns true.
    /// The stop flag is checked between frames.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &watch::Receiver<bool>,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        info!(camera_id = %self.settings.camera_id, frame_skip = %self.settings.frame_skip, "pipeline_started");

        loop {
            if *stop.borrow() {
                summary.stopped = true;
                info!(frames_seen = %summary.frames_seen, "pipeline_stop_requested");
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    let index = summary.frames_seen + 1;
                    summary.frames_seen += 1;
                    self.on_failure(PipelineError::collaborator(Stage::Source, index, e))?;
                    summary.frames_failed += 1;
                    continue;
                }
            };
            summary.frames_seen += 1;

            let emitted_before = self.emitted;
            let result = self.process_frame(&frame);
            summary.events += self.emitted - emitted_before;
            match result {
                Ok(Some(_)) => summary.frames_processed += 1,
                Ok(None) => {}
                Err(e) => {
                    summary.frames_processed += 1;
                    summary.frames_failed += 1;
                    self.on_failure(e)?;
                }
            }
        }

        info!(
            frames_seen = %summary.frames_seen,
            frames_processed = %summary.frames_processed,
            events = %summary.events,
            frames_failed = %summary.frames_failed,
            stopped = %summary.stopped,
            "pipeline_finished"
        );
        Ok(summary)
    }

    /// Apply the collaborator error policy. `Ok` means skip and continue.
    fn on_failure(&self, err: PipelineError) -> Result<(), PipelineError> {
        self.metrics.record_collaborator_error();
        match self.settings.on_collaborator_error {
            CollaboratorErrorPolicy::SkipFrame => {
                warn!(error = %err, "frame_abandoned");
                Ok(())
            }
            CollaboratorErrorPolicy::FailClosed => Err(err),
        }
    }
}
