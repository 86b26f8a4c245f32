//! Gallery matching.
//!
//! The resolver only talks to the [`Matcher`] trait, so the brute-force
//! [`CosineMatcher`] can be swapped for an approximate nearest-neighbour
//! index without touching callers.

use crate::types::{Embedding, GalleryEntry, IdentityId};

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best candidate, 0.0 if there was none.
    pub similarity: f32,
    /// Identity of the best candidate, only set when `matched`.
    pub identity: Option<IdentityId>,
}

impl MatchResult {
    pub fn no_match(similarity: f32) -> Self {
        Self {
            matched: false,
            similarity,
            identity: None,
        }
    }

    /// `(identity, similarity)` when the probe matched.
    pub fn hit(&self) -> Option<(IdentityId, f32)> {
        match (self.matched, self.identity) {
            (true, Some(id)) => Some((id, self.similarity)),
            _ => None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery snapshot.
pub trait Matcher: Send + Sync {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Exhaustive cosine similarity matcher.
///
/// A match requires the best score to be strictly greater than `threshold`.
/// Ties keep the earliest entry in gallery order. Entries that are degenerate
/// (zero norm, non-finite) or whose dimension differs from the probe are
/// skipped, and a degenerate probe never matches.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        if probe.is_degenerate() {
            return MatchResult::no_match(0.0);
        }

        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            if entry.embedding.dim() != probe.dim() || entry.embedding.is_degenerate() {
                tracing::trace!(identity = %entry.id, "skipping unusable gallery embedding");
                continue;
            }
            let sim = probe.similarity(&entry.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                identity: Some(gallery[idx].id),
            },
            Some(_) => MatchResult::no_match(best_sim),
            None => MatchResult::no_match(0.0),
        }
    }
}
