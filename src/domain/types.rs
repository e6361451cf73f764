//! Shared types for the plate recognition pipeline

use image::RgbImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Access status of a vehicle as held by the status store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    Allowed,
    Blacklisted,
    Visitor,
}

impl VehicleStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Allowed => "allowed",
            VehicleStatus::Blacklisted => "blacklisted",
            VehicleStatus::Visitor => "visitor",
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VehicleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allowed" => Ok(VehicleStatus::Allowed),
            "blacklisted" => Ok(VehicleStatus::Blacklisted),
            "visitor" => Ok(VehicleStatus::Visitor),
            other => Err(format!("unknown vehicle status '{other}'")),
        }
    }
}

/// Access decision derived from a vehicle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allowed,
    Blocked,
}

impl Decision {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Travel direction a camera is installed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Entry,
    Exit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }
}

/// Which OCR pass produced a plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// OCR ran on a detector bounding box
    Region,
    /// Detector found nothing, OCR ran on the whole ROI
    Fallback,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Region => "region",
            EventSource::Fallback => "fallback",
        }
    }
}

/// Vehicle record held by the status store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatusRecord {
    pub plate: String,
    pub status: VehicleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

impl VehicleStatusRecord {
    pub fn new(plate: &str, status: VehicleStatus) -> Self {
        Self { plate: plate.to_string(), status, owner_name: None, remarks: None }
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner_name = Some(owner.to_string());
        self
    }

    pub fn with_remarks(mut self, remarks: &str) -> Self {
        self.remarks = Some(remarks.to_string());
        self
    }
}

/// A single decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based, monotonically increasing index within the source
    pub index: u64,
    pub image: RgbImage,
}

/// Axis-aligned box in pixel coordinates (x1,y1 top-left, x2,y2 bottom-right)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// Region returned by the plate detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
}

/// Output of the text recognizer for one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Recognition {
    /// Raw text, `None` when nothing was read or confidence was below the bound
    pub text: Option<String>,
    /// Average confidence over the recognized fragments
    pub confidence: f64,
}

impl Recognition {
    pub fn new(text: Option<&str>, confidence: f64) -> Self {
        Self { text: text.map(str::to_string), confidence }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// One noisy OCR reading, consumed once by the correction engine
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub text: Option<String>,
    pub confidence: f64,
    pub frame_timestamp_seconds: f64,
    pub detection_confidence: Option<f64>,
}

/// Plate resolved by the correction engine
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedPlate {
    pub canonical_text: String,
    /// Winning score (biased when it came from the first pass)
    pub match_score: f64,
}

/// Finalized record of one accepted, deduplicated, decided plate occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: String,
    pub plate: String,
    pub decision: Decision,
    pub status: VehicleStatus,
    pub detection_confidence: f64,
    pub ocr_confidence: f64,
    /// Media time of the frame in whole seconds
    pub timestamp: f64,
    pub frame_index: u64,
    /// Wall-clock time the event was created (RFC 3339)
    pub recorded_at: String,
    pub camera_id: String,
    pub direction: Direction,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<String>,
}

impl DetectionEvent {
    /// Convert to a single-line JSON string for egress
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
