//! Event snapshots - JPEG frames saved alongside detection events

use anyhow::Context;
use image::RgbImage;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

const JPEG_QUALITY: u8 = 85;

pub trait SnapshotStore: Send + Sync {
    /// Persist `image`, returns a reference to stored it (path or key)
    fn save(&self, image: &RgbImage, name_hint: &str) -> anyhow::Result<String>;
}

/// File name for an event snapshot: `{ts}_{plate}_{decision}[_fallback]_{event_id}.jpg`
///
/// Media time restarts with every run, so the event id keeps names unique.
pub fn snapshot_name(
    timestamp: f64,
    plate: &str,
    decision: &str,
    fallback: bool,
    event_id: &str,
) -> String {
    let suffix = if fallback { "_fallback" } else { "" };
    format!("{}_{}_{}{}_{}.jpg", timestamp as u64, plate, decision, suffix, event_id)
}

/// Writes JPEG files into a directory (created on first use)
pub struct DirSnapshotStore {
    dir: PathBuf,
}

impl DirSnapshotStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotStore for DirSnapshotStore {
    fn save(&self, image: &RgbImage, name_hint: &str) -> anyhow::Result<String> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create snapshot dir {}", self.dir.display()))?;

        // keep hints from escaping the snapshot dir
        let file_name: String = name_hint
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        let path = self.dir.join(file_name);

        let file = fs::File::create(&path)
            .with_context(|| format!("Failed to create snapshot {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        image
            .write_with_encoder(encoder)
            .with_context(|| format!("Failed to encode snapshot {}", path.display()))?;

        debug!(path = %path.display(), "snapshot_saved");
        Ok(path.display().to_string())
    }
}
