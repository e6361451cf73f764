//! Detection event egress
//!
//! Events are written in JSONL format (one JSON object per line),
//! append-only and in emission order.

use crate::domain::types::DetectionEvent;
use anyhow::Context;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-only sink for detection events
pub trait EventSink: Send + Sync {
    fn append(&self, event: &DetectionEvent) -> anyhow::Result<()>;
}

/// JSONL file sink
pub struct JsonlEventSink {
    file_path: PathBuf,
}

impl JsonlEventSink {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "egress_initialized");
        Self { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path.display(), bytes = %line.len(), "egress_written");
        Ok(())
    }
}

impl EventSink for JsonlEventSink {
    fn append(&self, event: &DetectionEvent) -> anyhow::Result<()> {
        self.append_line(&event.to_json()).with_context(|| {
            format!("Failed to append event to {}", self.file_path.display())
        })
    }
}

/// In-memory sink for tests and dry runs
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<DetectionEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DetectionEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemoryEventSink {
    fn append(&self, event: &DetectionEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
