//! Frame sources
//!
//! - `ImageSequenceSource` - decoded video frames stored as image files
//! - `BlankFrameSource` - fixed-size black frames, for replaying recorded
//!   detector output without the footage

use crate::domain::types::Frame;
use crate::services::pipeline::PipelineError;
use anyhow::Context;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::info;

pub trait FrameSource: Send {
    /// Next frame in order, `None` when the stream is exhausted
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Image files in a directory, read in file-name order.
/// Frame indices are 1-based positions in that order.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    position: usize,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, PipelineError> {
        let dir = dir.as_ref();
        let unavailable = |reason: String| PipelineError::SourceUnavailable {
            source_name: dir.display().to_string(),
            reason,
        };

        let entries = std::fs::read_dir(dir).map_err(|e| unavailable(e.to_string()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        if files.is_empty() {
            return Err(unavailable("no image frames found".to_string()));
        }
        files.sort();

        info!(dir = %dir.display(), frames = %files.len(), "frame_source_opened");
        Ok(Self { files, position: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        // advance first so an undecodable file is skipped on the next call
        self.position += 1;
        let image = image::open(path)
            .with_context(|| format!("Failed to decode frame {}", path.display()))?
            .to_rgb8();
        Ok(Some(Frame { index: self.position as u64, image }))
    }
}

pub struct BlankFrameSource {
    count: u64,
    width: u32,
    height: u32,
    next_index: u64,
}

impl BlankFrameSource {
    pub fn new(count: u64, width: u32, height: u32) -> Self {
        Self { count, width, height, next_index: 1 }
    }
}

impl FrameSource for BlankFrameSource {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        if self.next_index > self.count {
            return Ok(None);
        }
        let frame = Frame { index: self.next_index, image: RgbImage::new(self.width, self.height) };
        self.next_index += 1;
        Ok(Some(frame))
    }
}
