use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Store-assigned handle of an enrolled identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned handle of a logged visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitId(pub i64);

impl fmt::Display for VisitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace-style models).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// True when cosine similarity against this vector is undefined:
    /// zero norm, or any non-finite component.
    pub fn is_degenerate(&self) -> bool {
        let norm = self.norm();
        !(norm.is_finite() && norm > 0.0)
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A zero-norm input
    /// yields 0.0 instead of NaN.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Fold one more observation into a running average built from `count`
    /// observations: `(self * count + observation) / (count + 1)`.
    pub fn refined(&self, count: u32, observation: &Embedding) -> Embedding {
        let n = count as f32;
        let values = self
            .values
            .iter()
            .zip(observation.values.iter())
            .map(|(e, q)| (e * n + q) / (n + 1.0))
            .collect();
        Embedding { values }
    }
}

/// One enrolled person.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Running average of every accepted observation.
    #[serde(skip_serializing)]
    pub embedding: Embedding,
    /// Number of observations folded into `embedding`; starts at 1.
    pub sample_count: u32,
    pub registered_at: NaiveDateTime,
    /// Evidence image of the earliest visit still on record.
    pub portrait_ref: Option<String>,
}

/// The slice of an identity the matcher needs.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub id: IdentityId,
    pub embedding: Embedding,
}

impl From<Identity> for GalleryEntry {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            embedding: identity.embedding,
        }
    }
}

/// One logged sighting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Visit {
    pub id: VisitId,
    pub identity_id: IdentityId,
    pub observed_at: NaiveDateTime,
    pub evidence_ref: String,
    pub location: String,
}

/// Calendar-date filter for identity and visit listings. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFilter {
    #[default]
    All,
    On(NaiveDate),
    Between(NaiveDate, NaiveDate),
}

pub const DATE_FORMAT: &str = "%Y-%m-%d";

impl DateFilter {
    pub fn contains(&self, at: &NaiveDateTime) -> bool {
        let date = at.date();
        match *self {
            DateFilter::All => true,
            DateFilter::On(day) => date == day,
            DateFilter::Between(from, to) => from <= date && date <= to,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid date filter {0:?}: expected YYYY-MM-DD or YYYY-MM-DD..YYYY-MM-DD")]
pub struct DateFilterParseError(String);

impl FromStr for DateFilter {
    type Err = DateFilterParseError;

    /// Accepts `""` (all), `"2024-05-01"` or `"2024-05-01..2024-05-31"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(DateFilter::All);
        }
        let parse = |d: &str| {
            NaiveDate::parse_from_str(d.trim(), DATE_FORMAT)
                .map_err(|_| DateFilterParseError(s.to_string()))
        };
        match s.split_once("..") {
            Some((from, to)) => Ok(DateFilter::Between(parse(from)?, parse(to)?)),
            None => Ok(DateFilter::On(parse(s)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        assert!((emb(&[1.0, 0.0]).similarity(&emb(&[-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let pairs = [
            (emb(&[0.3, -1.2, 4.0]), emb(&[2.0, 0.5, -0.25])),
            (emb(&[1.0, 1.0, 1.0]), emb(&[0.1, 0.2, 0.3])),
            (emb(&[-5.0, 0.0, 2.5]), emb(&[-5.0, 0.1, 2.4])),
        ];
        for (a, b) in &pairs {
            assert_eq!(a.similarity(b), b.similarity(a));
        }
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let zero = emb(&[0.0, 0.0]);
        assert_eq!(zero.similarity(&emb(&[1.0, 0.0])), 0.0);
        assert_eq!(zero.similarity(&zero), 0.0);
        assert!(zero.is_degenerate());
        assert!(emb(&[f32::NAN, 1.0]).is_degenerate());
        assert!(!emb(&[0.0, 1.0]).is_degenerate());
    }

    #[test]
    fn test_refined_is_weighted_average() {
        let e0 = emb(&[1.0, 2.0, -3.0]);
        let v = emb(&[4.0, 0.0, 1.0]);
        let n0 = 3u32;
        let refined = e0.refined(n0, &v);
        for i in 0..3 {
            let expected = (e0.values[i] * n0 as f32 + v.values[i]) / (n0 as f32 + 1.0);
            assert!((refined.values[i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_refined_converges_to_constant_observation() {
        let v = emb(&[0.0, 1.0]);
        let mut e = emb(&[1.0, 0.0]);
        let mut count = 1u32;
        for _ in 0..10_000 {
            e = e.refined(count, &v);
            count += 1;
        }
        assert!((e.values[0]).abs() < 1e-3, "got {:?}", e.values);
        assert!((e.values[1] - 1.0).abs() < 1e-3, "got {:?}", e.values);
    }

    #[test]
    fn test_date_filter_parse() {
        let d = |s: &str| NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap();
        assert_eq!("".parse::<DateFilter>().unwrap(), DateFilter::All);
        assert_eq!("2024-05-01".parse::<DateFilter>().unwrap(), DateFilter::On(d("2024-05-01")));
        assert_eq!(
            "2024-05-01..2024-05-31".parse::<DateFilter>().unwrap(),
            DateFilter::Between(d("2024-05-01"), d("2024-05-31"))
        );
        assert!("05/01/2024".parse::<DateFilter>().is_err());
        assert!("2024-05-01..".parse::<DateFilter>().is_err());
    }

    #[test]
    fn test_date_filter_contains_inclusive() {
        let filter: DateFilter = "2024-05-01..2024-05-03".parse().unwrap();
        let at = |s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        assert!(filter.contains(&at("2024-05-01 00:00:00")));
        assert!(filter.contains(&at("2024-05-03 23:59:59")));
        assert!(!filter.contains(&at("2024-05-04 00:00:00")));
        assert!(DateFilter::All.contains(&at("1999-01-01 12:00:00")));
    }
}
