//! Per-frame stages: ROI, detection, per-region reads and emission

use super::roi::{map_to_frame, roi_rect, upscale};
use super::{FrameReport, Pipeline, PipelineError, RegionOutcome, Stage};
use crate::domain::types::{
    new_uuid_v7, Decision, DetectionEvent, EventSource, Frame, RawObservation,
};
use crate::io::snapshot::snapshot_name;
use chrono::{SecondsFormat, Utc};
use image::RgbImage;
use tracing::{debug, info, warn};

impl Pipeline {
    /// Run ROI extraction, detection and all region reads for a sampled frame
    pub(crate) fn handle_frame(
        &mut self,
        frame: &Frame,
        timestamp: f64,
    ) -> Result<FrameReport, PipelineError> {
        let (width, height) = frame.image.dimensions();
        let mut report = FrameReport {
            frame_index: frame.index,
            timestamp,
            roi_empty: false,
            fallback_used: false,
            outcomes: Vec::new(),
        };

        let Some(rect) = roi_rect(width, height, &self.settings.roi) else {
            warn!(frame = %frame.index, width = %width, height = %height, "roi_empty");
            report.roi_empty = true;
            return Ok(report);
        };
        let roi_image = rect.crop(&frame.image);
        let factor = self.settings.roi.upscale_factor;
        let upscaled = upscale(&roi_image, factor);

        self.detector.start_frame(frame.index);
        let detections = self
            .detector
            .detect(&upscaled)
            .map_err(|e| PipelineError::collaborator(Stage::Detect, frame.index, e))?;

        if detections.is_empty() {
            report.fallback_used = true;
            let outcome = self.read_whole_roi(frame.index, timestamp, &roi_image, &upscaled)?;
            report.outcomes.push(outcome);
            return Ok(report);
        }

        for detection in &detections {
            self.metrics.record_region();
            let Some(crop_rect) = map_to_frame(&detection.bbox, &rect, factor, width, height) else {
                self.metrics.record_empty_region();
                self.recognizer.skip_region();
                debug!(frame = %frame.index, bbox = ?detection.bbox, "empty_region");
                report.outcomes.push(RegionOutcome::EmptyRegion { bbox: detection.bbox });
                continue;
            };

            let crop = crop_rect.crop(&frame.image);
            let recognition = self
                .recognizer
                .recognize(&crop, self.settings.ocr_confidence)
                .map_err(|e| PipelineError::collaborator(Stage::Recognize, frame.index, e))?;

            let observation = RawObservation {
                text: recognition.text,
                confidence: recognition.confidence,
                frame_timestamp_seconds: timestamp,
                detection_confidence: Some(detection.confidence),
            };
            let outcome = self.resolve(frame.index, &observation, EventSource::Region, &crop)?;
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Detector found nothing: read the whole upscaled ROI with the stricter bound
    fn read_whole_roi(
        &mut self,
        frame_index: u64,
        timestamp: f64,
        roi_image: &RgbImage,
        upscaled: &RgbImage,
    ) -> Result<RegionOutcome, PipelineError> {
        let recognition = self
            .recognizer
            .recognize(upscaled, self.settings.fallback_ocr_confidence)
            .map_err(|e| PipelineError::collaborator(Stage::Recognize, frame_index, e))?;

        let observation = RawObservation {
            text: recognition.text,
            confidence: recognition.confidence,
            frame_timestamp_seconds: timestamp,
            detection_confidence: None,
        };
        let outcome = self.resolve(frame_index, &observation, EventSource::Fallback, roi_image)?;
        self.metrics.record_fallback(!matches!(outcome, RegionOutcome::Unread { .. }));
        Ok(outcome)
    }

    /// Correct, deduplicate, decide and emit one reading
    fn resolve(
        &mut self,
        frame_index: u64,
        observation: &RawObservation,
        source: EventSource,
        snapshot_image: &RgbImage,
    ) -> Result<RegionOutcome, PipelineError> {
        let Some(corrected) = self.corrector.correct_observation(observation) else {
            self.metrics.record_unread();
            debug!(
                frame = %frame_index,
                raw_text = ?observation.text,
                ocr_confidence = %format!("{:.2}", observation.confidence),
                source = %source.as_str(),
                "plate_unread"
            );
            return Ok(RegionOutcome::Unread {
                raw_text: observation.text.clone(),
                ocr_confidence: observation.confidence,
            });
        };

        let plate = corrected.canonical_text;
        let now = observation.frame_timestamp_seconds;

        if !self.cooldown.should_emit(&plate, now) {
            let since_last_seconds = self.cooldown.since_last(&plate, now).unwrap_or(0.0);
            self.metrics.record_cooldown();
            debug!(
                frame = %frame_index,
                plate = %plate,
                since_last_s = %since_last_seconds,
                "plate_cooldown"
            );
            return Ok(RegionOutcome::Cooldown { plate, since_last_seconds });
        }

        let access = self
            .resolver
            .decide(&plate)
            .map_err(|e| PipelineError::collaborator(Stage::Status, frame_index, e))?;

        let id = new_uuid_v7();
        let image_reference =
            self.save_snapshot(snapshot_image, &id, now, &plate, access.decision, source);

        let event = DetectionEvent {
            id,
            plate: plate.clone(),
            decision: access.decision,
            status: access.status,
            detection_confidence: observation.detection_confidence.unwrap_or(0.0),
            ocr_confidence: observation.confidence,
            timestamp: now,
            frame_index,
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            camera_id: self.settings.camera_id.clone(),
            direction: self.settings.direction,
            source,
            image_reference,
        };

        self.sink
            .append(&event)
            .map_err(|e| PipelineError::collaborator(Stage::Sink, frame_index, e))?;
        self.cooldown.record_emission(&plate, now);
        self.metrics.set_cooldown_entries(self.cooldown.tracked() as u64);

        self.emitted += 1;

        self.gate.trigger(&plate, access.decision);
        self.metrics.record_event(access.decision == Decision::Allowed);

        info!(
            plate = %plate,
            decision = %access.decision,
            status = %access.status,
            frame = %frame_index,
            ts = %now,
            score = %format!("{:.3}", corrected.match_score),
            det_conf = %format!("{:.2}", event.detection_confidence),
            ocr_conf = %format!("{:.2}", event.ocr_confidence),
            source = %source.as_str(),
            "plate_emitted"
        );

        Ok(RegionOutcome::Emitted(event))
    }

    /// Save the event snapshot. Failures are logged and leave the event without
    /// an image reference.
    fn save_snapshot(
        &self,
        image: &RgbImage,
        event_id: &str,
        timestamp: f64,
        plate: &str,
        decision: Decision,
        source: EventSource,
    ) -> Option<String> {
        let store = self.snapshots.as_ref()?;
        let fallback = source == EventSource::Fallback;
        let name = snapshot_name(timestamp, plate, decision.as_str(), fallback, event_id);
        match store.save(image, &name) {
            Ok(reference) => Some(reference),
            Err(e) => {
                self.metrics.record_collaborator_error();
                warn!(plate = %plate, error = %e, "snapshot_failed");
                None
            }
        }
    }
}
