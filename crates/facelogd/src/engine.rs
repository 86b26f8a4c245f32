use std::path::PathBuf;

use facelog_core::{crop_face, CropError, FaceCrop, FaceRect, FaceStore, IdentityId, Outcome, Resolver};
use facelog_core::{ResolveError, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("crop error: {0}")]
    Crop(#[from] CropError),
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    ResolveCrop {
        path: PathBuf,
        reply: oneshot::Sender<Result<Outcome, EngineError>>,
    },
    ResolveFace {
        path: PathBuf,
        rect: FaceRect,
        reply: oneshot::Sender<Result<Outcome, EngineError>>,
    },
    Forget {
        identity: IdentityId,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Resolve an already aligned face crop stored at `path`.
    pub async fn resolve_crop(&self, path: PathBuf) -> Result<Outcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ResolveCrop { path, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Cut `rect` out of the frame at `path`, then resolve the crop.
    pub async fn resolve_face(&self, path: PathBuf, rect: FaceRect) -> Result<Outcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ResolveFace {
                path,
                rect,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Delete an identity with its visits and clear its cooldown entry.
    pub async fn forget(&self, identity: IdentityId) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Forget {
                identity,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Crop geometry applied to `ResolveFace` requests.
#[derive(Debug, Clone, Copy)]
pub struct CropSettings {
    pub min_face_size: u32,
    pub crop_size: u32,
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the resolver, and with it the cooldown state, so
/// sightings are resolved one at a time in arrival order.
pub fn spawn_engine<S: FaceStore + 'static>(
    resolver: Resolver<S>,
    crop: CropSettings,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facelog-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::ResolveCrop { path, reply } => {
                        let result = run_resolve_crop(&resolver, &path);
                        let _ = reply.send(result);
                    }
                    EngineRequest::ResolveFace { path, rect, reply } => {
                        let result = run_resolve_face(&resolver, &path, rect, crop);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Forget { identity, reply } => {
                        let result = resolver.forget_identity(identity).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn run_resolve_crop<S: FaceStore>(resolver: &Resolver<S>, path: &std::path::Path) -> Result<Outcome, EngineError> {
    let crop = FaceCrop::open(path)?;
    tracing::debug!(path = %path.display(), width = crop.width(), height = crop.height(), "resolving crop");
    Ok(resolver.resolve(&crop, now())?)
}

fn run_resolve_face<S: FaceStore>(
    resolver: &Resolver<S>,
    path: &std::path::Path,
    rect: FaceRect,
    settings: CropSettings,
) -> Result<Outcome, EngineError> {
    let frame = image::open(path).map_err(CropError::from)?.to_rgb8();
    let crop = crop_face(&frame, rect, settings.min_face_size, settings.crop_size)?;
    tracing::debug!(path = %path.display(), ?rect, "resolving detected face");
    Ok(resolver.resolve(&crop, now())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelog_core::embedder::{EmbedError, Embedder};
    use facelog_core::{Embedding, EvidenceStore, IdentityStore, MemoryStore, ResolverConfig, VisitLog};
    use image::RgbImage;
    use std::sync::Arc;

    struct ConstEmbedder;

    impl Embedder for ConstEmbedder {
        fn embed(&self, _crop: &FaceCrop) -> Result<Embedding, EmbedError> {
            Ok(Embedding::new(vec![0.6, 0.8]))
        }
    }

    fn checkerboard(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if ((x / 4) + (y / 4)) % 2 == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        })
    }

    fn engine(dir: &tempfile::TempDir) -> (EngineHandle, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let evidence = EvidenceStore::open(dir.path().join("faces")).unwrap();
        let resolver = Resolver::new(store.clone(), Box::new(ConstEmbedder), evidence, ResolverConfig::default());
        let settings = CropSettings {
            min_face_size: 40,
            crop_size: 160,
        };
        (spawn_engine(resolver, settings).unwrap(), store)
    }

    #[tokio::test]
    async fn test_resolve_crop_then_suppress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.png");
        checkerboard(160, 160).save(&path).unwrap();
        let (handle, store) = engine(&dir);

        let first = handle.resolve_crop(path.clone()).await.unwrap();
        assert!(matches!(first, Outcome::Registered { .. }));
        let second = handle.resolve_crop(path).await.unwrap();
        assert!(matches!(second, Outcome::Suppressed { .. }));
        assert_eq!(store.count_visits().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolve_face_rejects_out_of_frame_rect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        checkerboard(320, 240).save(&path).unwrap();
        let (handle, store) = engine(&dir);

        let rect = FaceRect {
            x: 300,
            y: 10,
            width: 80,
            height: 80,
        };
        let err = handle.resolve_face(path.clone(), rect).await.unwrap_err();
        assert!(matches!(err, EngineError::Crop(CropError::OutOfBounds { .. })));

        let rect = FaceRect {
            x: 20,
            y: 20,
            width: 100,
            height: 100,
        };
        let outcome = handle.resolve_face(path, rect).await.unwrap();
        assert!(outcome.is_logged());
        assert_eq!(store.count_identities().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forget_clears_identity_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.png");
        checkerboard(160, 160).save(&path).unwrap();
        let (handle, store) = engine(&dir);

        let outcome = handle.resolve_crop(path.clone()).await.unwrap();
        let identity = outcome.identity().unwrap();
        assert!(handle.forget(identity).await.unwrap());
        assert!(store.get_identity(identity).unwrap().is_none());

        // no cooldown left over: the same face registers again right away
        let again = handle.resolve_crop(path).await.unwrap();
        assert!(matches!(again, Outcome::Registered { .. }));
    }

    #[tokio::test]
    async fn test_missing_image_is_crop_error() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, _store) = engine(&dir);
        let err = handle
            .resolve_crop(dir.path().join("nope.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Crop(CropError::Image(_))));
    }
}
