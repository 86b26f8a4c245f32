use std::sync::Arc;

use anyhow::{Context, Result};
use facelog_core::{EvidenceStore, OnnxEmbedder, Resolver};
use facelog_store::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::{FacelogService, ServiceInfo};
use engine::CropSettings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facelogd starting");
    let config = Config::from_env();

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), "database opened");

    let evidence = EvidenceStore::open(&config.evidence_dir)
        .with_context(|| format!("opening evidence directory {}", config.evidence_dir.display()))?;

    let model_path = config.arcface_model_path();
    let embedder = OnnxEmbedder::load(&model_path, config.embedding_dim)
        .with_context(|| format!("loading embedding model {model_path}"))?;

    let resolver = Resolver::new(store.clone(), Box::new(embedder), evidence, config.resolver_config());
    let engine = engine::spawn_engine(
        resolver,
        CropSettings {
            min_face_size: config.min_face_size,
            crop_size: config.crop_size,
        },
    )?;

    let info = ServiceInfo {
        model_path,
        db_path: config.db_path.display().to_string(),
        evidence_dir: config.evidence_dir.display().to_string(),
        similarity_threshold: config.similarity_threshold,
        blur_threshold: config.blur_threshold,
        cooldown_secs: config.cooldown_secs,
        location: config.location.clone(),
    };
    let service = FacelogService::new(engine, store, info);

    let _conn = zbus::connection::Builder::session()?
        .name("org.facelog.Facelog1")?
        .serve_at("/org/facelog/Facelog1", service)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(
        similarity_threshold = config.similarity_threshold,
        cooldown_secs = config.cooldown_secs,
        location = %config.location,
        "facelogd ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("facelogd shutting down");

    Ok(())
}
