//! Vehicle status store
//!
//! Holds the access status of every plate the site knows about. Unknown
//! plates are created as `visitor` on first lookup.
//!
//! - `MemoryStatusStore` - process-local, used in tests and dry runs
//! - `FileStatusStore` - JSON file, rewritten atomically on every change

use crate::domain::types::{VehicleStatus, VehicleStatusRecord};
use anyhow::Context;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub trait VehicleStatusStore: Send + Sync {
    fn get(&self, plate: &str) -> anyhow::Result<Option<VehicleStatusRecord>>;

    /// Status of `plate`, creating it as `visitor` when unknown.
    /// Returns the status and whether the record was just created.
    fn get_or_create_status(&self, plate: &str) -> anyhow::Result<(VehicleStatus, bool)>;

    /// Insert or replace a record
    fn upsert(&self, record: VehicleStatusRecord) -> anyhow::Result<()>;

    /// Change the status of an existing plate. Returns false if unknown.
    fn set_status(&self, plate: &str, status: VehicleStatus) -> anyhow::Result<bool>;

    /// All records ordered by plate
    fn list(&self) -> anyhow::Result<Vec<VehicleStatusRecord>>;
}

fn sorted(records: &FxHashMap<String, VehicleStatusRecord>) -> Vec<VehicleStatusRecord> {
    let mut out: Vec<VehicleStatusRecord> = records.values().cloned().collect();
    out.sort_by(|a, b| a.plate.cmp(&b.plate));
    out
}

#[derive(Default)]
pub struct MemoryStatusStore {
    records: RwLock<FxHashMap<String, VehicleStatusRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = VehicleStatusRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.plate.clone(), record);
            }
        }
        store
    }
}

impl VehicleStatusStore for MemoryStatusStore {
    fn get(&self, plate: &str) -> anyhow::Result<Option<VehicleStatusRecord>> {
        Ok(self.records.read().get(plate).cloned())
    }

    fn get_or_create_status(&self, plate: &str) -> anyhow::Result<(VehicleStatus, bool)> {
        if let Some(record) = self.records.read().get(plate) {
            return Ok((record.status, false));
        }
        let mut records = self.records.write();
        // re-check under the write lock
        if let Some(record) = records.get(plate) {
            return Ok((record.status, false));
        }
        records.insert(plate.to_string(), VehicleStatusRecord::new(plate, VehicleStatus::Visitor));
        Ok((VehicleStatus::Visitor, true))
    }

    fn upsert(&self, record: VehicleStatusRecord) -> anyhow::Result<()> {
        self.records.write().insert(record.plate.clone(), record);
        Ok(())
    }

    fn set_status(&self, plate: &str, status: VehicleStatus) -> anyhow::Result<bool> {
        match self.records.write().get_mut(plate) {
            Some(record) => {
                record.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list(&self) -> anyhow::Result<Vec<VehicleStatusRecord>> {
        Ok(sorted(&self.records.read()))
    }
}

/// JSON-file backed store (array of records)
pub struct FileStatusStore {
    path: PathBuf,
    records: RwLock<FxHashMap<String, VehicleStatusRecord>>,
}

impl FileStatusStore {
    /// Open the store, starting empty when the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut records = FxHashMap::default();

        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read status store {}", path.display()))?;
            if !content.trim().is_empty() {
                let list: Vec<VehicleStatusRecord> = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse status store {}", path.display()))?;
                for record in list {
                    records.insert(record.plate.clone(), record);
                }
            }
        }

        info!(path = %path.display(), vehicles = %records.len(), "status_store_opened");
        Ok(Self { path, records: RwLock::new(records) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write all records to a temp file and rename over the store
    fn persist(&self, records: &FxHashMap<String, VehicleStatusRecord>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&sorted(records))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write status store {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace status store {}", self.path.display()))?;
        debug!(path = %self.path.display(), vehicles = %records.len(), "status_store_persisted");
        Ok(())
    }
}

impl VehicleStatusStore for FileStatusStore {
    fn get(&self, plate: &str) -> anyhow::Result<Option<VehicleStatusRecord>> {
        Ok(self.records.read().get(plate).cloned())
    }

    fn get_or_create_status(&self, plate: &str) -> anyhow::Result<(VehicleStatus, bool)> {
        if let Some(record) = self.records.read().get(plate) {
            return Ok((record.status, false));
        }
        let mut records = self.records.write();
        if let Some(record) = records.get(plate) {
            return Ok((record.status, false));
        }
        records.insert(plate.to_string(), VehicleStatusRecord::new(plate, VehicleStatus::Visitor));
        if let Err(e) = self.persist(&records) {
            records.remove(plate);
            return Err(e);
        }
        Ok((VehicleStatus::Visitor, true))
    }

    fn upsert(&self, record: VehicleStatusRecord) -> anyhow::Result<()> {
        let mut records = self.records.write();
        records.insert(record.plate.clone(), record);
        self.persist(&records)
    }

    fn set_status(&self, plate: &str, status: VehicleStatus) -> anyhow::Result<bool> {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(plate) else {
            return Ok(false);
        };
        record.status = status;
        self.persist(&records)?;
        Ok(true)
    }

    fn list(&self) -> anyhow::Result<Vec<VehicleStatusRecord>> {
        Ok(sorted(&self.records.read()))
    }
}
