//! Tests for the Pipeline module

use super::*;
use crate::domain::registry::{KnownPlateEntry, KnownPlateRegistry};
use crate::domain::types::{
    BoundingBox, Decision, Detection, EventSource, Recognition, VehicleStatus, VehicleStatusRecord,
};
use crate::infra::config::UnknownPlatePolicy;
use crate::io::egress::MemoryEventSink;
use crate::io::frames::BlankFrameSource;
use crate::io::snapshot::DirSnapshotStore;
use crate::io::status_store::MemoryStatusStore;
use crate::io::vision::ReplayVision;
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

const WIDTH: u32 = 200;
const HEIGHT: u32 = 100;

/// Frame at `seconds` of media time with the default 30 fps
fn frame_at(seconds: u64) -> Frame {
    frame(seconds * 30)
}

fn frame(index: u64) -> Frame {
    Frame { index, image: RgbImage::new(WIDTH, HEIGHT) }
}

fn site_registry() -> KnownPlateRegistry {
    KnownPlateRegistry::new(vec![
        KnownPlateEntry::new("MH20GV3260", "White Car", 23.0, 30.0),
        KnownPlateEntry::new("MH20CP0688", "Red Bike", 175.0, 177.0),
        KnownPlateEntry::new("MP68MG5114", "Black Bike", 230.0, 236.0),
    ])
    .unwrap()
}

fn site_config() -> Config {
    Config::default().with_registry(site_registry())
}

/// Box in upscaled-ROI coordinates that maps to a valid crop
fn plate_box(confidence: f64) -> Detection {
    Detection { bbox: BoundingBox::new(20.0, 10.0, 100.0, 40.0), confidence }
}

#[derive(Default, Clone)]
struct ScriptedFrame {
    regions: Vec<(Detection, Recognition)>,
    roi_read: Option<Recognition>,
}

/// Detector + recognizer returning scripted results per frame index
#[derive(Default)]
struct ScriptedVision {
    frames: HashMap<u64, ScriptedFrame>,
    fail_detect_at: Option<u64>,
    /// 1-based recognize call that errors
    fail_recognize_call: Option<usize>,
    current: Mutex<Option<u64>>,
    pending: Mutex<VecDeque<Recognition>>,
    detect_calls: Mutex<Vec<u64>>,
    min_confidences: Mutex<Vec<f64>>,
}

impl ScriptedVision {
    fn region(mut self, index: u64, detection: Detection, text: &str, confidence: f64) -> Self {
        self.frames
            .entry(index)
            .or_default()
            .regions
            .push((detection, Recognition::new(Some(text), confidence)));
        self
    }

    fn roi_read(mut self, index: u64, text: &str, confidence: f64) -> Self {
        self.frames.entry(index).or_default().roi_read = Some(Recognition::new(Some(text), confidence));
        self
    }

    fn fail_detect_at(mut self, index: u64) -> Self {
        self.fail_detect_at = Some(index);
        self
    }

    fn fail_recognize_call(mut self, call: usize) -> Self {
        self.fail_recognize_call = Some(call);
        self
    }
}

impl RegionDetector for ScriptedVision {
    fn start_frame(&self, frame_index: u64) {
        *self.current.lock() = Some(frame_index);
    }

    fn detect(&self, _image: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        let index = self.current.lock().unwrap_or(0);
        self.detect_calls.lock().push(index);
        if self.fail_detect_at == Some(index) {
            anyhow::bail!("detector offline");
        }
        let scripted = self.frames.get(&index).cloned().unwrap_or_default();
        *self.pending.lock() = scripted.regions.iter().map(|(_, r)| r.clone()).collect();
        Ok(scripted.regions.iter().map(|(d, _)| *d).collect())
    }
}

impl TextRecognizer for ScriptedVision {
    fn recognize(&self, _region: &RgbImage, min_confidence: f64) -> anyhow::Result<Recognition> {
        let calls = {
            let mut seen = self.min_confidences.lock();
            seen.push(min_confidence);
            seen.len()
        };
        if self.fail_recognize_call == Some(calls) {
            anyhow::bail!("recognizer timed out");
        }
        let read = match self.pending.lock().pop_front() {
            Some(read) => read,
            None => {
                let index = self.current.lock().unwrap_or(0);
                self.frames.get(&index).and_then(|f| f.roi_read.clone()).unwrap_or_default()
            }
        };
        if read.confidence < min_confidence {
            return Ok(Recognition { text: None, confidence: read.confidence });
        }
        Ok(read)
    }

    fn skip_region(&self) {
        self.pending.lock().pop_front();
    }
}

#[derive(Default)]
struct RecordingTrigger {
    fired: Mutex<Vec<(String, Decision)>>,
}

impl GateTrigger for RecordingTrigger {
    fn trigger(&self, plate: &str, decision: Decision) {
        self.fired.lock().push((plate.to_string(), decision));
    }
}

struct FailingSink;

impl EventSink for FailingSink {
    fn append(&self, _event: &DetectionEvent) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}

/// Test harness keeping handles on every fake collaborator
struct TestPipeline {
    pipeline: Pipeline,
    vision: Arc<ScriptedVision>,
    store: Arc<MemoryStatusStore>,
    sink: Arc<MemoryEventSink>,
    gate: Arc<RecordingTrigger>,
    metrics: Arc<Metrics>,
}

impl std::ops::Deref for TestPipeline {
    type Target = Pipeline;
    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

impl std::ops::DerefMut for TestPipeline {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.pipeline
    }
}

fn create_test_pipeline(config: Config, vision: ScriptedVision) -> TestPipeline {
    create_test_pipeline_with_store(config, vision, MemoryStatusStore::new())
}

fn create_test_pipeline_with_store(
    config: Config,
    vision: ScriptedVision,
    store: MemoryStatusStore,
) -> TestPipeline {
    let vision = Arc::new(vision);
    let store = Arc::new(store);
    let sink = Arc::new(MemoryEventSink::new());
    let gate = Arc::new(RecordingTrigger::default());
    let metrics = Arc::new(Metrics::new());
    let pipeline = Pipeline::new(
        &config,
        Collaborators {
            detector: vision.clone(),
            recognizer: vision.clone(),
            status_store: store.clone(),
            sink: sink.clone(),
            snapshots: None,
            gate: gate.clone(),
        },
        metrics.clone(),
    );
    TestPipeline { pipeline, vision, store, sink, gate, metrics }
}

fn stop_receiver(stopped: bool) -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(stopped)
}

#[test]
fn test_frame_timestamp_floors_to_seconds() {
    assert_eq!(frame_timestamp(689, 30.0), 22.0);
    assert_eq!(frame_timestamp(690, 30.0), 23.0);
    assert_eq!(frame_timestamp(719, 30.0), 23.0);
    assert_eq!(frame_timestamp(45, 0.0), 45.0);
}

#[test]
fn test_confused_read_emits_once_then_cooldown() {
    let vision = ScriptedVision::default()
        .region(690, plate_box(0.8), "MH2O GV326O", 0.6)
        .region(750, plate_box(0.8), "MH2O GV326O", 0.6);
    let mut p = create_test_pipeline(site_config(), vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    assert_eq!(report.timestamp, 23.0);
    let events: Vec<&DetectionEvent> = report.events().collect();
    assert_eq!(events.len(), 1);
    let event = events[0];
    assert_eq!(event.plate, "MH20GV3260");
    assert_eq!(event.status, VehicleStatus::Visitor);
    assert_eq!(event.decision, Decision::Allowed);
    assert_eq!(event.detection_confidence, 0.8);
    assert_eq!(event.ocr_confidence, 0.6);
    assert_eq!(event.frame_index, 690);
    assert_eq!(event.source, EventSource::Region);
    assert_eq!(event.camera_id, "gate_cam_1");

    let repeat = p.process_frame(&frame_at(25)).unwrap().unwrap();
    assert_eq!(repeat.events().count(), 0);
    assert_eq!(
        repeat.outcomes,
        vec![RegionOutcome::Cooldown { plate: "MH20GV3260".to_string(), since_last_seconds: 2.0 }]
    );

    assert_eq!(p.sink.len(), 1);
    assert_eq!(p.gate.fired.lock().clone(), vec![("MH20GV3260".to_string(), Decision::Allowed)]);
    assert_eq!(p.store.get("MH20GV3260").unwrap().unwrap().status, VehicleStatus::Visitor);
    assert_eq!(p.metrics.cooldown_total(), 1);
}

#[test]
fn test_cooldown_expires_after_window() {
    let vision = ScriptedVision::default()
        .region(690, plate_box(0.8), "MH20GV3260", 0.9)
        .region(1290, plate_box(0.8), "MH20GV3260", 0.9);
    let mut p = create_test_pipeline(site_config(), vision);

    assert_eq!(p.process_frame(&frame_at(23)).unwrap().unwrap().events().count(), 1);
    // exactly 20 s later
    assert_eq!(p.process_frame(&frame_at(43)).unwrap().unwrap().events().count(), 1);
    assert_eq!(p.sink.len(), 2);
}

#[test]
fn test_unsampled_frames_bypass_everything() {
    let vision = ScriptedVision::default().region(1, plate_box(0.9), "MH20GV3260", 0.9);
    let mut p = create_test_pipeline(site_config(), vision);

    assert!(p.process_frame(&frame(1)).unwrap().is_none());
    assert!(p.process_frame(&frame(2)).unwrap().is_none());
    assert!(p.process_frame(&frame(3)).unwrap().is_some());
    assert_eq!(p.vision.detect_calls.lock().clone(), vec![3]);
    assert_eq!(p.metrics.frames_total(), 3);
    assert_eq!(p.metrics.frames_processed(), 1);
}

#[test]
fn test_region_ocr_uses_region_threshold() {
    let vision = ScriptedVision::default().region(690, plate_box(0.8), "MH20GV3260", 0.45);
    let mut p = create_test_pipeline(site_config(), vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    assert!(!report.fallback_used);
    assert_eq!(report.events().count(), 1);
    assert_eq!(p.vision.min_confidences.lock().clone(), vec![0.4]);
}

#[test]
fn test_no_detections_falls_back_to_whole_roi() {
    let vision = ScriptedVision::default().roi_read(690, "MH2OGV326O", 0.7);
    let mut p = create_test_pipeline(site_config(), vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    assert!(report.fallback_used);
    let event = report.events().next().unwrap();
    assert_eq!(event.source, EventSource::Fallback);
    assert_eq!(event.detection_confidence, 0.0);
    assert_eq!(p.vision.min_confidences.lock().clone(), vec![0.5]);

    let summary = p.metrics.report();
    assert_eq!(summary.fallback_attempts, 1);
    assert_eq!(summary.fallback_matches, 1);
}

#[test]
fn test_fallback_threshold_is_stricter() {
    // readable for a region pass, too weak for the whole-ROI pass
    let vision = ScriptedVision::default().roi_read(690, "MH20GV3260", 0.45);
    let mut p = create_test_pipeline(site_config(), vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    assert!(report.fallback_used);
    assert_eq!(
        report.outcomes,
        vec![RegionOutcome::Unread { raw_text: None, ocr_confidence: 0.45 }]
    );
    assert!(p.sink.is_empty());
    assert_eq!(p.metrics.report().fallback_matches, 0);
}

#[test]
fn test_blacklisted_plate_blocked_and_gate_blocked() {
    let store = MemoryStatusStore::with_records([VehicleStatusRecord::new(
        "MH20CP0688",
        VehicleStatus::Blacklisted,
    )]);
    let vision = ScriptedVision::default().region(5250, plate_box(0.9), "MH2OCP0688", 0.8);
    let mut p = create_test_pipeline_with_store(site_config(), vision, store);

    let report = p.process_frame(&frame_at(175)).unwrap().unwrap();
    let event = report.events().next().unwrap();
    assert_eq!(event.plate, "MH20CP0688");
    assert_eq!(event.status, VehicleStatus::Blacklisted);
    assert_eq!(event.decision, Decision::Blocked);
    assert_eq!(p.gate.fired.lock().clone(), vec![("MH20CP0688".to_string(), Decision::Blocked)]);
}

#[test]
fn test_deny_policy_blocks_unknown_plates() {
    let config = site_config().with_unknown_plate_policy(UnknownPlatePolicy::Deny);
    let vision = ScriptedVision::default().region(690, plate_box(0.9), "MH20GV3260", 0.9);
    let mut p = create_test_pipeline(config, vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    let event = report.events().next().unwrap();
    assert_eq!(event.status, VehicleStatus::Visitor);
    assert_eq!(event.decision, Decision::Blocked);
}

#[test]
fn test_unreadable_regions_are_not_emitted() {
    let vision = ScriptedVision::default()
        .region(690, plate_box(0.9), "??", 0.9)
        .region(690, Detection { bbox: BoundingBox::new(120.0, 10.0, 190.0, 40.0), confidence: 0.7 }, "MH20GV3260", 0.2);
    let mut p = create_test_pipeline(site_config(), vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    assert_eq!(
        report.outcomes,
        vec![
            RegionOutcome::Unread { raw_text: Some("??".to_string()), ocr_confidence: 0.9 },
            RegionOutcome::Unread { raw_text: None, ocr_confidence: 0.2 },
        ]
    );
    assert!(p.sink.is_empty());
    assert!(p.gate.fired.lock().is_empty());
    assert!(p.store.list().unwrap().is_empty());
    assert_eq!(p.metrics.unread_total(), 2);
}

#[test]
fn test_degenerate_box_is_empty_region_without_fallback() {
    let flat = Detection { bbox: BoundingBox::new(20.0, 10.0, 20.0, 40.0), confidence: 0.9 };
    let vision = ScriptedVision::default()
        .region(690, flat, "MH20GV3260", 0.9)
        .roi_read(690, "MH20GV3260", 0.9);
    let mut p = create_test_pipeline(site_config(), vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    assert!(!report.fallback_used);
    assert_eq!(report.outcomes, vec![RegionOutcome::EmptyRegion { bbox: flat.bbox }]);
    assert!(p.vision.min_confidences.lock().is_empty());
    assert!(p.sink.is_empty());
}

#[test]
fn test_collapsed_region_does_not_shift_later_reads() {
    let flat = Detection { bbox: BoundingBox::new(20.0, 10.0, 20.0, 40.0), confidence: 0.9 };
    let vision = ScriptedVision::default()
        .region(690, flat, "MH20CP0688", 0.9)
        .region(690, Detection { bbox: BoundingBox::new(120.0, 10.0, 190.0, 40.0), confidence: 0.8 }, "MH20GV3260", 0.9);
    let mut p = create_test_pipeline(site_config(), vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    assert_eq!(report.outcomes[0], RegionOutcome::EmptyRegion { bbox: flat.bbox });
    let plates: Vec<&str> = report.events().map(|e| e.plate.as_str()).collect();
    assert_eq!(plates, vec!["MH20GV3260"]);
    assert_eq!(p.gate.fired.lock().clone(), vec![("MH20GV3260".to_string(), Decision::Allowed)]);
}

#[test]
fn test_replayed_collapsed_region_does_not_shift_later_reads() {
    let jsonl = r#"{"frame": 690, "regions": [{"bbox": [20, 10, 20, 40], "confidence": 0.9, "fragments": [{"text": "MH20CP0688", "confidence": 0.9}]}, {"bbox": [120, 10, 190, 40], "confidence": 0.8, "fragments": [{"text": "MH20GV3260", "confidence": 0.9}]}]}"#;
    let vision = Arc::new(ReplayVision::from_jsonl(jsonl, 0.25, 0.4).unwrap());
    let sink = Arc::new(MemoryEventSink::new());
    let mut pipeline = Pipeline::new(
        &site_config(),
        Collaborators {
            detector: vision.clone(),
            recognizer: vision,
            status_store: Arc::new(MemoryStatusStore::new()),
            sink: sink.clone(),
            snapshots: None,
            gate: Arc::new(RecordingTrigger::default()),
        },
        Arc::new(Metrics::new()),
    );

    let report = pipeline.process_frame(&frame_at(23)).unwrap().unwrap();
    assert!(matches!(report.outcomes[0], RegionOutcome::EmptyRegion { .. }));
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plate, "MH20GV3260");
    assert_eq!(events[0].detection_confidence, 0.8);
}

#[test]
fn test_empty_roi_skips_frame() {
    let roi = crate::infra::config::RoiConfig { top: 0.6, bottom: 0.5, ..Default::default() };
    let vision = ScriptedVision::default().region(690, plate_box(0.9), "MH20GV3260", 0.9);
    let mut p = create_test_pipeline(site_config().with_roi(roi), vision);

    let report = p.process_frame(&frame_at(23)).unwrap().unwrap();
    assert!(report.roi_empty);
    assert!(report.outcomes.is_empty());
    assert!(p.vision.detect_calls.lock().is_empty());
}

#[test]
fn test_two_plates_in_one_frame() {
    let vision = ScriptedVision::default()
        .region(5250, plate_box(0.9), "MH20CP0688", 0.9)
        .region(5250, Detection { bbox: BoundingBox::new(120.0, 10.0, 190.0, 40.0), confidence: 0.7 }, "MP68MG5114", 0.8);
    let mut p = create_test_pipeline(site_config(), vision);

    let report = p.process_frame(&frame_at(175)).unwrap().unwrap();
    let plates: Vec<&str> = report.events().map(|e| e.plate.as_str()).collect();
    assert_eq!(plates, vec!["MH20CP0688", "MP68MG5114"]);
    assert_eq!(p.cooldown().tracked(), 2);
}

#[test]
fn test_sink_failure_does_not_trigger_gate_or_cooldown() {
    let vision = Arc::new(ScriptedVision::default().region(690, plate_box(0.9), "MH20GV3260", 0.9));
    let gate = Arc::new(RecordingTrigger::default());
    let mut pipeline = Pipeline::new(
        &site_config(),
        Collaborators {
            detector: vision.clone(),
            recognizer: vision,
            status_store: Arc::new(MemoryStatusStore::new()),
            sink: Arc::new(FailingSink),
            snapshots: None,
            gate: gate.clone(),
        },
        Arc::new(Metrics::new()),
    );

    let err = pipeline.process_frame(&frame_at(23)).unwrap_err();
    assert!(matches!(err, PipelineError::Collaborator { stage: Stage::Sink, frame_index: 690, .. }));
    assert!(gate.fired.lock().is_empty());
    assert_eq!(pipeline.cooldown().tracked(), 0);
}

#[test]
fn test_skip_frame_policy_continues_after_failure() {
    let vision = ScriptedVision::default()
        .fail_detect_at(3)
        .region(6, plate_box(0.9), "MH20GV3260", 0.9);
    let mut p = create_test_pipeline(site_config(), vision);
    let mut source = BlankFrameSource::new(7, WIDTH, HEIGHT);
    let (_tx, rx) = stop_receiver(false);

    let summary = p.run(&mut source, &rx).unwrap();
    assert_eq!(summary.frames_seen, 7);
    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.frames_failed, 1);
    assert_eq!(summary.events, 1);
    assert!(!summary.stopped);
    assert_eq!(p.metrics.collaborator_errors(), 1);
}

#[test]
fn test_emission_before_failing_region_is_counted() {
    let vision = ScriptedVision::default()
        .region(3, plate_box(0.9), "MH20GV3260", 0.9)
        .region(3, Detection { bbox: BoundingBox::new(120.0, 10.0, 190.0, 40.0), confidence: 0.7 }, "MP68MG5114", 0.8)
        .fail_recognize_call(2);
    let mut p = create_test_pipeline(site_config(), vision);
    let mut source = BlankFrameSource::new(3, WIDTH, HEIGHT);
    let (_tx, rx) = stop_receiver(false);

    let summary = p.run(&mut source, &rx).unwrap();
    assert_eq!(summary.frames_failed, 1);
    assert_eq!(summary.events, 1);
    assert_eq!(summary.events, p.sink.len() as u64);
    assert_eq!(summary.frames_processed, 1);
    assert_eq!(p.metrics.frames_processed(), summary.frames_processed);
    assert_eq!(p.gate.fired.lock().clone(), vec![("MH20GV3260".to_string(), Decision::Allowed)]);
    assert_eq!(p.metrics.collaborator_errors(), 1);
}

#[test]
fn test_fail_closed_policy_stops_run() {
    let config = site_config().with_collaborator_error_policy(CollaboratorErrorPolicy::FailClosed);
    let vision = ScriptedVision::default()
        .fail_detect_at(3)
        .region(6, plate_box(0.9), "MH20GV3260", 0.9);
    let mut p = create_test_pipeline(config, vision);
    let mut source = BlankFrameSource::new(7, WIDTH, HEIGHT);
    let (_tx, rx) = stop_receiver(false);

    let err = p.run(&mut source, &rx).unwrap_err();
    assert!(matches!(err, PipelineError::Collaborator { stage: Stage::Detect, frame_index: 3, .. }));
    assert!(p.sink.is_empty());
}

#[test]
fn test_stop_signal_checked_before_each_frame() {
    let mut p = create_test_pipeline(site_config(), ScriptedVision::default());
    let mut source = BlankFrameSource::new(30, WIDTH, HEIGHT);
    let (_tx, rx) = stop_receiver(true);

    let summary = p.run(&mut source, &rx).unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.frames_seen, 0);
    // the source was not drained
    assert_eq!(source.next_frame().unwrap().unwrap().index, 1);
}

#[test]
fn test_run_until_exhausted() {
    let mut p = create_test_pipeline(Config::default().with_frame_skip(2), ScriptedVision::default());
    let mut source = BlankFrameSource::new(5, WIDTH, HEIGHT);
    let (_tx, rx) = stop_receiver(false);

    let summary = p.run(&mut source, &rx).unwrap();
    assert_eq!(summary, RunSummary { frames_seen: 5, frames_processed: 2, ..Default::default() });
}

#[test]
fn test_snapshot_saved_with_event() {
    let dir = tempfile::tempdir().unwrap();
    let vision = Arc::new(ScriptedVision::default().roi_read(690, "MH20GV3260", 0.9));
    let sink = Arc::new(MemoryEventSink::new());
    let mut pipeline = Pipeline::new(
        &site_config(),
        Collaborators {
            detector: vision.clone(),
            recognizer: vision,
            status_store: Arc::new(MemoryStatusStore::new()),
            sink: sink.clone(),
            snapshots: Some(Arc::new(DirSnapshotStore::new(dir.path()))),
            gate: Arc::new(RecordingTrigger::default()),
        },
        Arc::new(Metrics::new()),
    );

    pipeline.process_frame(&frame_at(23)).unwrap();
    let events = sink.events();
    let reference = events[0].image_reference.clone().unwrap();
    assert!(reference.ends_with(&format!("23_MH20GV3260_allowed_fallback_{}.jpg", events[0].id)));
    assert!(std::path::Path::new(&reference).exists());
}
