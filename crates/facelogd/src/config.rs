use std::path::PathBuf;

use chrono::TimeDelta;
use facelog_core::crop::{DEFAULT_CROP_SIZE, DEFAULT_MIN_FACE_SIZE};
use facelog_core::embedder::DEFAULT_EMBEDDING_DIM;
use facelog_core::resolver::{DEFAULT_LOCATION, DEFAULT_SIMILARITY_THRESHOLD};
use facelog_core::ResolverConfig;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory evidence crops are written to.
    pub evidence_dir: PathBuf,
    /// Cosine similarity a match must strictly exceed.
    pub similarity_threshold: f32,
    /// Minimum Laplacian variance of an accepted crop.
    pub blur_threshold: f64,
    /// Seconds during which a re-detected identity is not logged again.
    pub cooldown_secs: i64,
    /// Site tag stored with every visit.
    pub location: String,
    /// Detector rectangles smaller than this (either side) are rejected.
    pub min_face_size: u32,
    /// Side length crops are resized to before resolution.
    pub crop_size: u32,
    /// Output dimension of the embedding model.
    pub embedding_dim: usize,
}

impl Config {
    /// Load configuration from `FACELOG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACELOG_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facelog_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facelog");

        let db_path = std::env::var("FACELOG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("facelog.db"));

        let evidence_dir = std::env::var("FACELOG_EVIDENCE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("captured_faces"));

        Self {
            model_dir,
            db_path,
            evidence_dir,
            similarity_threshold: env_parse("FACELOG_SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD),
            blur_threshold: env_parse("FACELOG_BLUR_THRESHOLD", facelog_core::quality::DEFAULT_BLUR_THRESHOLD),
            cooldown_secs: env_parse("FACELOG_COOLDOWN_SECS", facelog_core::cooldown::DEFAULT_COOLDOWN_SECS),
            location: std::env::var("FACELOG_LOCATION").unwrap_or_else(|_| DEFAULT_LOCATION.to_string()),
            min_face_size: env_parse("FACELOG_MIN_FACE_SIZE", DEFAULT_MIN_FACE_SIZE),
            crop_size: env_parse("FACELOG_CROP_SIZE", DEFAULT_CROP_SIZE),
            embedding_dim: env_parse("FACELOG_EMBEDDING_DIM", DEFAULT_EMBEDDING_DIM),
        }
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            similarity_threshold: self.similarity_threshold,
            blur_threshold: self.blur_threshold,
            cooldown: TimeDelta::seconds(self.cooldown_secs.max(0)),
            location: self.location.clone(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_default_when_unset() {
        assert_eq!(env_parse("FACELOG_TEST_UNSET_KEY_XYZ", 7u32), 7);
    }

    #[test]
    fn test_resolver_config_clamps_negative_cooldown() {
        let config = Config {
            model_dir: PathBuf::from("/models"),
            db_path: PathBuf::from("/tmp/facelog.db"),
            evidence_dir: PathBuf::from("/tmp/faces"),
            similarity_threshold: 0.7,
            blur_threshold: 100.0,
            cooldown_secs: -5,
            location: "Lobby".into(),
            min_face_size: 40,
            crop_size: 160,
            embedding_dim: 512,
        };
        let rc = config.resolver_config();
        assert_eq!(rc.cooldown, TimeDelta::zero());
        assert_eq!(rc.location, "Lobby");
        assert_eq!(config.arcface_model_path(), "/models/w600k_r50.onnx");
    }
}
