//! On-disk evidence images for logged sightings.

use crate::crop::FaceCrop;
use crate::types::IdentityId;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("failed to create evidence directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write evidence image {path}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Writes face crops as JPEG files under one directory.
///
/// File names are `person_<id>_<timestamp>_<seq>.jpg`. The timestamp has
/// millisecond resolution and `seq` is a per-writer counter, so two
/// sightings never share a file name.
pub struct EvidenceStore {
    dir: PathBuf,
    seq: AtomicU64,
}

impl EvidenceStore {
    /// Open (creating if needed) the evidence directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, EvidenceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| EvidenceError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build the path for a new evidence image without writing it.
    pub fn next_path(&self, identity: IdentityId, at: NaiveDateTime) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = at.format("%Y%m%d%H%M%S%3f");
        self.dir.join(format!("person_{identity}_{stamp}_{seq:06}.jpg"))
    }

    /// Write `crop` and return the evidence reference stored with the visit.
    pub fn write(
        &self,
        crop: &FaceCrop,
        identity: IdentityId,
        at: NaiveDateTime,
    ) -> Result<String, EvidenceError> {
        let path = self.next_path(identity, at);
        crop.save_jpeg(&path).map_err(|source| EvidenceError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path.to_string_lossy().into_owned())
    }
}
