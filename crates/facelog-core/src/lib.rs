//! facelog-core: identity resolution for camera sightings.
//!
//! Face crops are embedded (ArcFace via ONNX Runtime), matched against a
//! gallery of known identities by cosine similarity, and logged as visits.
//! Repeat sightings inside a cooldown window are suppressed, and each
//! accepted observation refines the identity's stored embedding.

pub mod cooldown;
pub mod crop;
pub mod embedder;
pub mod evidence;
pub mod matcher;
pub mod memory;
pub mod quality;
pub mod resolver;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use cooldown::CooldownTracker;
pub use crop::{crop_face, CropError, FaceCrop, FaceRect};
pub use embedder::{EmbedError, Embedder, OnnxEmbedder};
pub use evidence::{EvidenceError, EvidenceStore};
pub use matcher::{CosineMatcher, MatchResult, Matcher};
pub use memory::MemoryStore;
pub use resolver::{Outcome, ResolveError, Resolver, ResolverConfig};
pub use store::{FaceStore, IdentityStore, StoreError, VisitLog};
pub use types::{DateFilter, Embedding, GalleryEntry, Identity, IdentityId, Visit, VisitId};

/// Default location of the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facelog/models")
}
