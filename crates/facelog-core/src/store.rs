//! Persistence contracts the resolver depends on.
//!
//! Implementations must be safe for concurrent use. `facelog-store` provides
//! the SQLite implementation; [`crate::memory::MemoryStore`] keeps everything
//! in process.

use crate::types::{DateFilter, Embedding, GalleryEntry, Identity, IdentityId, Visit, VisitId};
use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("identity {0} does not exist")]
    UnknownIdentity(IdentityId),
    #[error("identity {id} has a corrupt embedding ({bytes} bytes)")]
    CorruptEmbedding { id: IdentityId, bytes: usize },
    #[error("corrupt timestamp {0:?}")]
    CorruptTimestamp(String),
}

impl StoreError {
    /// True for errors that mean a record reference is dangling rather than
    /// the store being unreachable.
    pub fn is_integrity(&self) -> bool {
        matches!(self, StoreError::UnknownIdentity(_))
    }
}

/// The gallery of enrolled identities.
pub trait IdentityStore: Send + Sync {
    /// Register a new identity with `sample_count = 1`.
    fn create_identity(&self, embedding: &Embedding, registered_at: NaiveDateTime) -> Result<IdentityId, StoreError>;

    /// Fetch one identity, with `portrait_ref` taken from its earliest visit.
    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    /// Compare-and-swap refinement: replace the embedding and bump
    /// `sample_count` to `expected_count + 1`, only if the stored count is
    /// still `expected_count`. Returns false on a lost race.
    ///
    /// Errors with [`StoreError::UnknownIdentity`] if the identity is gone.
    fn update_identity(
        &self,
        id: IdentityId,
        embedding: &Embedding,
        expected_count: u32,
    ) -> Result<bool, StoreError>;

    /// Snapshot of every identity's embedding, ordered by ascending id.
    fn all_identities(&self) -> Result<Vec<GalleryEntry>, StoreError>;

    /// Identities whose registration date passes `filter`, ordered by id.
    fn identities(&self, filter: DateFilter) -> Result<Vec<Identity>, StoreError>;

    /// Delete an identity together with all of its visits. Returns false if
    /// it did not exist.
    fn delete_identity_cascade(&self, id: IdentityId) -> Result<bool, StoreError>;

    fn count_identities(&self) -> Result<u64, StoreError>;
}

/// Append-only log of sightings.
pub trait VisitLog: Send + Sync {
    /// Errors with [`StoreError::UnknownIdentity`] if `identity` does not exist.
    fn insert_visit(
        &self,
        identity: IdentityId,
        evidence_ref: &str,
        location: &str,
        observed_at: NaiveDateTime,
    ) -> Result<VisitId, StoreError>;

    fn delete_visit(&self, id: VisitId) -> Result<bool, StoreError>;

    /// Visits whose observation date passes `filter`, oldest first.
    fn visits(&self, filter: DateFilter) -> Result<Vec<Visit>, StoreError>;

    /// Visits of one identity, newest first.
    fn visits_for_identity(&self, identity: IdentityId, filter: DateFilter) -> Result<Vec<Visit>, StoreError>;

    fn count_visits(&self) -> Result<u64, StoreError>;
}

/// Everything the resolver needs from persistence.
pub trait FaceStore: IdentityStore + VisitLog {}

impl<T: IdentityStore + VisitLog> FaceStore for T {}
