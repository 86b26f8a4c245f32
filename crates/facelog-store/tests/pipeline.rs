//! Resolver running against a real SQLite database.

use std::collections::HashMap;
use std::sync::{Arc, Barrier};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use facelog_core::embedder::{EmbedError, Embedder};
use facelog_core::{
    DateFilter, Embedding, EvidenceStore, FaceCrop, IdentityId, IdentityStore, Outcome, Resolver,
    ResolverConfig, VisitLog,
};
use facelog_store::SqliteStore;
use image::RgbImage;

struct TagEmbedder(HashMap<u8, Vec<f32>>);

impl Embedder for TagEmbedder {
    fn embed(&self, crop: &FaceCrop) -> Result<Embedding, EmbedError> {
        let tag = crop.image().get_pixel(0, 0).0[0];
        self.0
            .get(&tag)
            .map(|v| Embedding::new(v.clone()))
            .ok_or_else(|| EmbedError::InferenceFailed(format!("unknown tag {tag}")))
    }
}

fn crop(tag: u8) -> FaceCrop {
    let mut img = RgbImage::from_fn(160, 160, |x, y| {
        if ((x / 5) + (y / 5)) % 2 == 0 {
            image::Rgb([10, 10, 10])
        } else {
            image::Rgb([240, 240, 240])
        }
    });
    img.put_pixel(0, 0, image::Rgb([tag, tag, tag]));
    FaceCrop::from_rgb(img)
}

fn t(secs: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(14, 0, 0)
        .unwrap()
        + TimeDelta::seconds(secs)
}

fn resolver(
    dir: &tempfile::TempDir,
    table: HashMap<u8, Vec<f32>>,
    config: ResolverConfig,
) -> Resolver<SqliteStore> {
    let store = SqliteStore::open(dir.path().join("facelog.db")).unwrap();
    let evidence = EvidenceStore::open(dir.path().join("captured_faces")).unwrap();
    Resolver::new(Arc::new(store), Box::new(TagEmbedder(table)), evidence, config)
}

#[test]
fn test_end_to_end_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let table = HashMap::from([(1, vec![0.6, 0.8, 0.0]), (2, vec![0.0, 0.0, 1.0])]);
    let r = resolver(&dir, table, ResolverConfig::default());

    assert!(matches!(
        r.resolve(&crop(1), t(0)).unwrap(),
        Outcome::Registered { identity: IdentityId(1), .. }
    ));
    assert_eq!(r.store().count_visits().unwrap(), 1);

    assert!(matches!(
        r.resolve(&crop(1), t(1)).unwrap(),
        Outcome::Suppressed { identity: IdentityId(1), .. }
    ));
    assert_eq!(r.store().count_visits().unwrap(), 1);

    assert!(matches!(
        r.resolve(&crop(1), t(25)).unwrap(),
        Outcome::Resolved { identity: IdentityId(1), sample_count: 2, .. }
    ));
    assert_eq!(r.store().count_visits().unwrap(), 2);
    assert_eq!(r.store().get_identity(IdentityId(1)).unwrap().unwrap().sample_count, 2);

    // a different person in the same frame window
    assert!(matches!(
        r.resolve(&crop(2), t(26)).unwrap(),
        Outcome::Registered { identity: IdentityId(2), .. }
    ));

    let visits = r.store().visits("2024-06-03".parse().unwrap()).unwrap();
    assert_eq!(visits.len(), 3);
    for visit in &visits {
        assert!(std::path::Path::new(&visit.evidence_ref).is_file());
        assert_eq!(visit.location, "Location Info");
    }
}

#[test]
fn test_forget_identity_cascades_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let table = HashMap::from([(1, vec![1.0, 0.0])]);
    let r = resolver(&dir, table, ResolverConfig::default());

    r.resolve(&crop(1), t(0)).unwrap();
    r.resolve(&crop(1), t(30)).unwrap();
    assert_eq!(r.store().count_visits().unwrap(), 2);

    assert!(r.forget_identity(IdentityId(1)).unwrap());
    assert!(r.store().visits_for_identity(IdentityId(1), DateFilter::All).unwrap().is_empty());
    assert_eq!(r.store().count_identities().unwrap(), 0);
}

#[test]
fn test_concurrent_refinements_against_sqlite() {
    const N: u32 = 6;
    let dir = tempfile::tempdir().unwrap();
    let mut table = HashMap::from([(1, vec![1.0, 0.0])]);
    for i in 0..N as u8 {
        table.insert(10 + i, vec![1.0, 0.1 * i as f32]);
    }
    let config = ResolverConfig {
        cooldown: TimeDelta::zero(),
        ..ResolverConfig::default()
    };
    let r = resolver(&dir, table, config);
    r.resolve(&crop(1), t(0)).unwrap();

    let barrier = Barrier::new(N as usize);
    std::thread::scope(|scope| {
        for i in 0..N as u8 {
            let (r, barrier) = (&r, &barrier);
            scope.spawn(move || {
                barrier.wait();
                let outcome = r.resolve(&crop(10 + i), t(1)).unwrap();
                assert!(matches!(outcome, Outcome::Resolved { identity: IdentityId(1), .. }));
            });
        }
    });

    let identity = r.store().get_identity(IdentityId(1)).unwrap().unwrap();
    assert_eq!(identity.sample_count, 1 + N);
    let expected_y: f32 = (0..N).map(|i| 0.1 * i as f32).sum::<f32>() / (N + 1) as f32;
    assert!((identity.embedding.values[0] - 1.0).abs() < 1e-6);
    assert!((identity.embedding.values[1] - expected_y).abs() < 1e-5);
    assert_eq!(r.store().count_visits().unwrap(), 1 + N as u64);
}
