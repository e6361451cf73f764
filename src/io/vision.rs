//! Plate detector and text recognizer seams
//!
//! Model inference lives outside this crate. The pipeline talks to it through
//! `RegionDetector` and `TextRecognizer`; `ReplayVision` implements both from
//! a JSONL file of recorded model outputs so a run can be reproduced offline.
//!
//! Replay file format, one line per processed frame:
//!
//! ```text
//! {"frame": 690, "regions": [{"bbox": [x1, y1, x2, y2], "confidence": 0.8,
//!   "fragments": [{"text": "MH2O GV326O", "confidence": 0.6}]}],
//!  "roi_fragments": []}
//! ```
//!
//! Region boxes are in upscaled-ROI pixel coordinates, as a detector would
//! report them.

use crate::domain::types::{BoundingBox, Detection, Recognition};
use anyhow::Context;
use image::RgbImage;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

pub trait RegionDetector: Send + Sync {
    /// Called once before `detect` for each processed frame
    fn start_frame(&self, _frame_index: u64) {}

    fn detect(&self, image: &RgbImage) -> anyhow::Result<Vec<Detection>>;
}

pub trait TextRecognizer: Send + Sync {
    /// Read text in `region`. Text is `None` when nothing was read or the
    /// average fragment confidence is below `min_confidence`.
    fn recognize(&self, region: &RgbImage, min_confidence: f64) -> anyhow::Result<Recognition>;

    /// The next region from the last `detect` will not be read. Recognizers
    /// that queue per-region output must drop that region's entry.
    fn skip_region(&self) {}
}

/// One OCR text fragment
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub confidence: f64,
}

/// Join fragments into one reading.
///
/// Blank fragments are ignored; the rest are joined with spaces and their
/// confidences averaged. Below `min_confidence` the text is dropped but the
/// average is still reported.
pub fn assemble_fragments(fragments: &[TextFragment], min_confidence: f64) -> Recognition {
    let kept: Vec<&TextFragment> = fragments.iter().filter(|f| !f.text.trim().is_empty()).collect();
    if kept.is_empty() {
        return Recognition::empty();
    }

    let text = kept.iter().map(|f| f.text.trim()).collect::<Vec<_>>().join(" ");
    let confidence = kept.iter().map(|f| f.confidence).sum::<f64>() / kept.len() as f64;

    if confidence < min_confidence {
        return Recognition { text: None, confidence };
    }
    Recognition { text: Some(text), confidence }
}

/// Intersection over union of two boxes
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression, highest confidence first.
/// Returns indices into `dets` of the kept detections.
pub fn non_max_suppression(dets: &[Detection], iou_threshold: f64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dets.len()).collect();
    order.sort_by(|&a, &b| dets[b].confidence.total_cmp(&dets[a].confidence));

    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        if keep.iter().all(|&k| iou(&dets[k].bbox, &dets[idx].bbox) < iou_threshold) {
            keep.push(idx);
        }
    }
    keep
}

#[derive(Debug, Clone, Deserialize)]
struct ReplayRegion {
    bbox: [f64; 4],
    confidence: f64,
    #[serde(default)]
    fragments: Vec<TextFragment>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReplayFrame {
    frame: u64,
    #[serde(default)]
    regions: Vec<ReplayRegion>,
    #[serde(default)]
    roi_fragments: Vec<TextFragment>,
}

#[derive(Default)]
struct ReplayCursor {
    frame: Option<ReplayFrame>,
    /// Fragments of the regions returned by the last `detect`, in order
    pending: VecDeque<Vec<TextFragment>>,
}

/// Detector + recognizer backed by recorded outputs keyed by frame index
pub struct ReplayVision {
    frames: FxHashMap<u64, ReplayFrame>,
    confidence_threshold: f64,
    iou_threshold: f64,
    cursor: Mutex<ReplayCursor>,
}

impl ReplayVision {
    pub fn from_jsonl(content: &str, confidence_threshold: f64, iou_threshold: f64) -> anyhow::Result<Self> {
        let mut frames = FxHashMap::default();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let frame: ReplayFrame = serde_json::from_str(line)
                .with_context(|| format!("Invalid replay record on line {}", line_no + 1))?;
            frames.insert(frame.frame, frame);
        }
        Ok(Self { frames, confidence_threshold, iou_threshold, cursor: Mutex::new(ReplayCursor::default()) })
    }

    pub fn from_file<P: AsRef<Path>>(path: P, confidence_threshold: f64, iou_threshold: f64) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read observations {}", path.display()))?;
        let vision = Self::from_jsonl(&content, confidence_threshold, iou_threshold)?;
        info!(path = %path.display(), frames = %vision.frames.len(), "replay_observations_loaded");
        Ok(vision)
    }

    /// Highest frame index with recorded output
    pub fn last_frame(&self) -> Option<u64> {
        self.frames.keys().copied().max()
    }
}

impl RegionDetector for ReplayVision {
    fn start_frame(&self, frame_index: u64) {
        let mut cursor = self.cursor.lock();
        cursor.frame = self.frames.get(&frame_index).cloned();
        cursor.pending.clear();
    }

    fn detect(&self, _image: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        let mut cursor = self.cursor.lock();
        let Some(frame) = cursor.frame.as_ref() else {
            return Ok(Vec::new());
        };

        let candidates: Vec<&ReplayRegion> =
            frame.regions.iter().filter(|r| r.confidence >= self.confidence_threshold).collect();
        let dets: Vec<Detection> = candidates
            .iter()
            .map(|r| Detection {
                bbox: BoundingBox::new(r.bbox[0], r.bbox[1], r.bbox[2], r.bbox[3]),
                confidence: r.confidence,
            })
            .collect();

        let keep = non_max_suppression(&dets, self.iou_threshold);
        let pending: VecDeque<Vec<TextFragment>> =
            keep.iter().map(|&i| candidates[i].fragments.clone()).collect();
        let kept: Vec<Detection> = keep.iter().map(|&i| dets[i]).collect();

        debug!(frame = %frame.frame, candidates = %dets.len(), kept = %kept.len(), "replay_detect");
        cursor.pending = pending;
        Ok(kept)
    }
}

impl TextRecognizer for ReplayVision {
    fn recognize(&self, _region: &RgbImage, min_confidence: f64) -> anyhow::Result<Recognition> {
        let mut cursor = self.cursor.lock();
        let fragments = match cursor.pending.pop_front() {
            Some(fragments) => fragments,
            // no region outstanding: whole-ROI pass
            None => cursor.frame.as_ref().map(|f| f.roi_fragments.clone()).unwrap_or_default(),
        };
        Ok(assemble_fragments(&fragments, min_confidence))
    }

    fn skip_region(&self) {
        self.cursor.lock().pending.pop_front();
    }
}
