use std::path::PathBuf;
use std::sync::Arc;

use facelog_core::{DateFilter, FaceRect, IdentityId, IdentityStore, StoreError, VisitId, VisitLog};
use facelog_store::SqliteStore;
use serde::Serialize;
use zbus::interface;

use crate::engine::EngineHandle;

/// Settings echoed by `Status()`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub model_path: String,
    pub db_path: String,
    pub evidence_dir: String,
    pub similarity_threshold: f32,
    pub blur_threshold: f64,
    pub cooldown_secs: i64,
    pub location: String,
}

/// D-Bus interface for the facelog daemon.
///
/// Bus name: org.facelog.Facelog1
/// Object path: /org/facelog/Facelog1
///
/// Every method replying with data returns a JSON string.
pub struct FacelogService {
    engine: EngineHandle,
    store: Arc<SqliteStore>,
    info: ServiceInfo,
}

impl FacelogService {
    pub fn new(engine: EngineHandle, store: Arc<SqliteStore>, info: ServiceInfo) -> Self {
        Self { engine, store, info }
    }

    /// Run a store query off the async executor.
    async fn query<T, F>(&self, f: F) -> zbus::fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("store task failed: {e}")))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

#[interface(name = "org.facelog.Facelog1")]
impl FacelogService {
    /// Resolve an aligned face crop image.
    async fn resolve_crop(&self, path: &str) -> zbus::fdo::Result<String> {
        tracing::debug!(path, "resolve_crop requested");
        let outcome = self
            .engine
            .resolve_crop(PathBuf::from(path))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&outcome)
    }

    /// Crop the detector rectangle out of a frame image and resolve it.
    async fn resolve_face(&self, path: &str, x: i32, y: i32, width: u32, height: u32) -> zbus::fdo::Result<String> {
        tracing::debug!(path, x, y, width, height, "resolve_face requested");
        let rect = FaceRect { x, y, width, height };
        let outcome = self
            .engine
            .resolve_face(PathBuf::from(path), rect)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&outcome)
    }

    /// Identities registered on the given date or date range ("" for all).
    async fn list_identities(&self, date: &str) -> zbus::fdo::Result<String> {
        let filter = parse_filter(date)?;
        let identities = self.query(move |s| s.identities(filter)).await?;
        to_json(&identities)
    }

    /// Visits observed on the given date or date range ("" for all).
    async fn list_visits(&self, date: &str) -> zbus::fdo::Result<String> {
        let filter = parse_filter(date)?;
        let visits = self.query(move |s| s.visits(filter)).await?;
        to_json(&visits)
    }

    /// Visits of one identity, newest first.
    async fn identity_visits(&self, id: i64, date: &str) -> zbus::fdo::Result<String> {
        let filter = parse_filter(date)?;
        let visits = self
            .query(move |s| s.visits_for_identity(IdentityId(id), filter))
            .await?;
        to_json(&visits)
    }

    /// Delete an identity and all of its visits.
    async fn remove_identity(&self, id: i64) -> zbus::fdo::Result<bool> {
        tracing::info!(identity = id, "remove_identity requested");
        self.engine
            .forget(IdentityId(id))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Delete a single visit.
    async fn remove_visit(&self, id: i64) -> zbus::fdo::Result<bool> {
        tracing::info!(visit = id, "remove_visit requested");
        self.query(move |s| s.delete_visit(VisitId(id))).await
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let (identities, visits) = self
            .query(|s| Ok((s.count_identities()?, s.count_visits()?)))
            .await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities": identities,
            "visits": visits,
            "config": self.info,
        })
        .to_string())
    }
}

fn parse_filter(date: &str) -> zbus::fdo::Result<DateFilter> {
    date.parse()
        .map_err(|e: facelog_core::types::DateFilterParseError| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("serialize: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter_rejects_bad_dates() {
        assert_eq!(parse_filter("").unwrap(), DateFilter::All);
        assert!(matches!(parse_filter("2024-13-01"), Err(zbus::fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = facelog_core::Outcome::Registered {
            identity: IdentityId(3),
            visit: VisitId(9),
        };
        let json: serde_json::Value = serde_json::from_str(&to_json(&outcome).unwrap()).unwrap();
        assert_eq!(json["outcome"], "registered");
        assert_eq!(json["identity"], 3);
        assert_eq!(json["visit"], 9);
    }
}
