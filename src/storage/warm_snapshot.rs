//! Warm snapshot - memory-mapped copy of the last good serving snapshot.
//!
//! Written after each successful refresh so a restarted engine can serve from
//! local disk while the durable store is unreachable.
//!
//! # File Format
//! ```text
//! Metadata (JSON, first line, padded):
//!   magic: "ADSN"
//!   format: 1
//!   snapshot_version: u64
//!   line_items: usize
//!   ad_units: usize
//!
//! Body (bincode):
//!   SnapshotData { line_items, ad_units }
//! ```

use log::debug;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::snapshot::SnapshotData;

const MAGIC: &str = "ADSN";
const FORMAT: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Metadata {
    magic: String,
    format: u32,
    snapshot_version: u64,
    line_items: usize,
    ad_units: usize,
}

/// A warm snapshot restored from disk.
#[derive(Debug, Clone)]
pub struct WarmSnapshot {
    pub snapshot_version: u64,
    pub data: SnapshotData,
}

#[derive(Debug, Clone)]
pub struct WarmSnapshotFile {
    path: PathBuf,
}

impl WarmSnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomically replaces the file with `data`.
    pub fn write(&self, snapshot_version: u64, data: &SnapshotData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let metadata = Metadata {
            magic: MAGIC.to_string(),
            format: FORMAT,
            snapshot_version,
            line_items: data.line_items.len(),
            ad_units: data.ad_units.len(),
        };
        let header = serde_json::to_string(&metadata)
            .map_err(|e| EngineError::Snapshot(format!("Serialize metadata failed: {}", e)))?;
        file.write_all(header.as_bytes())?;
        file.write_all(b"\n")?;

        let body = bincode::serialize(data)?;
        file.write_all(&body)?;

        file.sync_all()?;
        drop(file);

        // Atomic rename
        std::fs::rename(&tmp_path, &self.path)?;
        debug!(
            "Warm snapshot v{} written to {} ({} bytes)",
            snapshot_version,
            self.path.display(),
            body.len()
        );
        Ok(())
    }

    /// Reads the file back. `Ok(None)` when no warm snapshot exists yet.
    pub fn load(&self) -> Result<Option<WarmSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        // SAFETY: the file is only ever replaced by rename, never written in place
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.is_empty() {
            return Err(EngineError::Snapshot("File is empty".to_string()));
        }

        let newline_pos = mmap
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| EngineError::Snapshot("No metadata line found".to_string()))?;

        let metadata_str = std::str::from_utf8(&mmap[..newline_pos])
            .map_err(|e| EngineError::Snapshot(format!("Invalid UTF-8 in metadata: {}", e)))?;
        let metadata: Metadata = serde_json::from_str(metadata_str.trim())
            .map_err(|e| EngineError::Snapshot(format!("Parse metadata failed: {}", e)))?;

        if metadata.magic != MAGIC {
            return Err(EngineError::Snapshot("Invalid magic number".to_string()));
        }
        if metadata.format != FORMAT {
            return Err(EngineError::Snapshot(format!(
                "Unsupported format: {}",
                metadata.format
            )));
        }

        let data: SnapshotData = bincode::deserialize(&mmap[newline_pos + 1..])?;
        if data.line_items.len() != metadata.line_items || data.ad_units.len() != metadata.ad_units {
            return Err(EngineError::Snapshot(
                "Body does not match metadata counts".to_string(),
            ));
        }

        Ok(Some(WarmSnapshot {
            snapshot_version: metadata.snapshot_version,
            data,
        }))
    }
}
