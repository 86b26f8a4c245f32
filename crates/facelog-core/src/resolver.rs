//! Identity resolution pipeline.
//!
//! One call to [`Resolver::resolve`] per aligned face crop: blur gate,
//! embedding, gallery match, then exactly one of suppress, refine-and-log or
//! register-and-log. Frame-skip conditions come back as [`Outcome`] values;
//! only integrity violations are errors.

use crate::cooldown::{CooldownTracker, DEFAULT_COOLDOWN_SECS};
use crate::crop::FaceCrop;
use crate::embedder::Embedder;
use crate::evidence::{EvidenceError, EvidenceStore};
use crate::matcher::{CosineMatcher, Matcher};
use crate::quality::{self, DEFAULT_BLUR_THRESHOLD};
use crate::store::{FaceStore, StoreError};
use crate::types::{Embedding, IdentityId, VisitId};
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
pub const DEFAULT_LOCATION: &str = "Location Info";

/// Compare-and-swap attempts before a refinement is reported as a store failure.
const MAX_REFINE_ATTEMPTS: usize = 64;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// A match needs cosine similarity strictly above this.
    pub similarity_threshold: f32,
    /// Minimum Laplacian variance of an acceptable crop.
    pub blur_threshold: f64,
    /// Re-detections within this window of the last logged sighting are suppressed.
    pub cooldown: TimeDelta,
    /// Site tag stored with every visit.
    pub location: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            blur_threshold: DEFAULT_BLUR_THRESHOLD,
            cooldown: TimeDelta::seconds(DEFAULT_COOLDOWN_SECS),
            location: DEFAULT_LOCATION.to_string(),
        }
    }
}

/// What happened to one face crop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Crop too blurry; nothing computed or logged.
    QualityRejected { blur_score: f64 },
    /// The embedder failed; nothing logged.
    ExtractionFailed { reason: String },
    /// Known identity seen again within the cooldown window; nothing logged.
    Suppressed { identity: IdentityId, similarity: f32 },
    /// Known identity: embedding refined and a visit logged.
    Resolved {
        identity: IdentityId,
        similarity: f32,
        visit: VisitId,
        sample_count: u32,
    },
    /// New identity registered and a visit logged.
    Registered { identity: IdentityId, visit: VisitId },
    /// Store or evidence directory unreachable; the caller may retry on a later frame.
    StoreUnavailable { reason: String },
}

impl Outcome {
    /// The identity this crop resolved to, if any.
    pub fn identity(&self) -> Option<IdentityId> {
        match self {
            Outcome::Suppressed { identity, .. }
            | Outcome::Resolved { identity, .. }
            | Outcome::Registered { identity, .. } => Some(*identity),
            _ => None,
        }
    }

    /// True when a visit was written.
    pub fn is_logged(&self) -> bool {
        matches!(self, Outcome::Resolved { .. } | Outcome::Registered { .. })
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("integrity violation for identity {identity}: {detail}")]
    IntegrityViolation { identity: IdentityId, detail: String },
}

/// The identity resolution pipeline for one running session.
///
/// Owns the cooldown state; the store is shared and injected.
pub struct Resolver<S: FaceStore> {
    store: Arc<S>,
    embedder: Box<dyn Embedder>,
    matcher: Box<dyn Matcher>,
    evidence: EvidenceStore,
    cooldown: CooldownTracker,
    config: ResolverConfig,
}

impl<S: FaceStore> Resolver<S> {
    pub fn new(
        store: Arc<S>,
        embedder: Box<dyn Embedder>,
        evidence: EvidenceStore,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            matcher: Box::new(CosineMatcher),
            evidence,
            cooldown: CooldownTracker::new(config.cooldown),
            config,
        }
    }

    /// Replace the default [`CosineMatcher`].
    pub fn with_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Resolve one aligned face crop observed at `now`.
    pub fn resolve(&self, crop: &FaceCrop, now: NaiveDateTime) -> Result<Outcome, ResolveError> {
        let blur_score = quality::laplacian_variance(&crop.to_gray());
        if blur_score < self.config.blur_threshold {
            tracing::debug!(blur_score, threshold = self.config.blur_threshold, "blurry crop rejected");
            return Ok(Outcome::QualityRejected { blur_score });
        }

        let probe = match self.embedder.embed(crop) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::debug!(error = %e, "embedding extraction failed");
                return Ok(Outcome::ExtractionFailed { reason: e.to_string() });
            }
        };

        let gallery = match self.store.all_identities() {
            Ok(gallery) => gallery,
            Err(e) => return self.store_failure(None, e),
        };

        let result = self
            .matcher
            .compare(&probe, &gallery, self.config.similarity_threshold);

        match result.hit() {
            Some((identity, similarity)) => {
                // The window stays anchored to the last logged sighting.
                if self.cooldown.should_suppress(identity, now) {
                    tracing::debug!(%identity, similarity, "seen recently; not logging");
                    return Ok(Outcome::Suppressed { identity, similarity });
                }
                self.log_known(crop, identity, similarity, &probe, now)
            }
            None => {
                tracing::debug!(
                    best_similarity = result.similarity,
                    gallery = gallery.len(),
                    "no match; registering"
                );
                self.register(crop, &probe, now)
            }
        }
    }

    /// Delete an identity with all its visits and drop its cooldown entry.
    pub fn forget_identity(&self, identity: IdentityId) -> Result<bool, StoreError> {
        let removed = self.store.delete_identity_cascade(identity)?;
        self.cooldown.forget(identity);
        if removed {
            tracing::info!(%identity, "identity deleted");
        }
        Ok(removed)
    }

    /// Evidence, then the visit row, then refinement. A refinement that
    /// fails takes its visit back out, so `sample_count` and the visit log
    /// only ever move together.
    fn log_known(
        &self,
        crop: &FaceCrop,
        identity: IdentityId,
        similarity: f32,
        probe: &Embedding,
        now: NaiveDateTime,
    ) -> Result<Outcome, ResolveError> {
        let evidence = match self.evidence.write(crop, identity, now) {
            Ok(evidence) => evidence,
            Err(e) => return Ok(self.evidence_failure(e)),
        };
        let visit = match self
            .store
            .insert_visit(identity, &evidence, &self.config.location, now)
        {
            Ok(visit) => visit,
            Err(e) => return self.store_failure(Some(identity), e),
        };
        let sample_count = match self.refine(identity, probe) {
            Ok(count) => count,
            Err(e) => {
                self.undo_visit(visit);
                return self.store_failure(Some(identity), e);
            }
        };
        self.cooldown.mark_seen(identity, now);

        tracing::info!(%identity, %visit, similarity, sample_count, "recognized; visit logged");
        Ok(Outcome::Resolved {
            identity,
            similarity,
            visit,
            sample_count,
        })
    }

    /// The identity row needs to exist before its evidence can be named, so
    /// a later failure removes it again.
    fn register(&self, crop: &FaceCrop, probe: &Embedding, now: NaiveDateTime) -> Result<Outcome, ResolveError> {
        let identity = match self.store.create_identity(probe, now) {
            Ok(id) => id,
            Err(e) => return self.store_failure(None, e),
        };
        let evidence = match self.evidence.write(crop, identity, now) {
            Ok(evidence) => evidence,
            Err(e) => {
                self.undo_registration(identity);
                return Ok(self.evidence_failure(e));
            }
        };
        let visit = match self
            .store
            .insert_visit(identity, &evidence, &self.config.location, now)
        {
            Ok(visit) => visit,
            Err(e) => {
                if !e.is_integrity() {
                    self.undo_registration(identity);
                }
                return self.store_failure(Some(identity), e);
            }
        };
        self.cooldown.mark_seen(identity, now);

        tracing::info!(%identity, %visit, "new identity registered; visit logged");
        Ok(Outcome::Registered { identity, visit })
    }

    fn undo_visit(&self, visit: VisitId) {
        if let Err(e) = self.store.delete_visit(visit) {
            tracing::warn!(%visit, error = %e, "could not remove visit of failed refinement");
        }
    }

    fn undo_registration(&self, identity: IdentityId) {
        if let Err(e) = self.store.delete_identity_cascade(identity) {
            tracing::warn!(%identity, error = %e, "could not remove half-registered identity");
        }
    }

    /// Fold `observation` into the stored running average, retrying when a
    /// concurrent refinement of the same identity wins the race.
    fn refine(&self, identity: IdentityId, observation: &Embedding) -> Result<u32, StoreError> {
        for attempt in 1..=MAX_REFINE_ATTEMPTS {
            let current = self
                .store
                .get_identity(identity)?
                .ok_or(StoreError::UnknownIdentity(identity))?;
            let refined = current.embedding.refined(current.sample_count, observation);
            if self
                .store
                .update_identity(identity, &refined, current.sample_count)?
            {
                return Ok(current.sample_count + 1);
            }
            tracing::debug!(%identity, attempt, "concurrent refinement; retrying");
            std::thread::yield_now();
        }
        Err(StoreError::Unavailable(format!(
            "refinement of identity {identity} kept conflicting"
        )))
    }

    fn store_failure(&self, identity: Option<IdentityId>, e: StoreError) -> Result<Outcome, ResolveError> {
        match (identity, e.is_integrity()) {
            (Some(identity), true) => {
                tracing::error!(%identity, error = %e, "integrity violation; aborting resolution");
                Err(ResolveError::IntegrityViolation {
                    identity,
                    detail: e.to_string(),
                })
            }
            _ => {
                tracing::warn!(error = %e, "store unavailable");
                Ok(Outcome::StoreUnavailable { reason: e.to_string() })
            }
        }
    }

    fn evidence_failure(&self, e: EvidenceError) -> Outcome {
        tracing::warn!(error = %e, "evidence image not written");
        Outcome::StoreUnavailable { reason: e.to_string() }
    }
}
