//! SQLite-backed gallery and visit log.
//!
//! One connection behind a mutex. Embeddings are little-endian f32 BLOBs;
//! timestamps are local wall-clock text so `date()` filters work in SQL.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use facelog_core::store::{IdentityStore, StoreError, VisitLog};
use facelog_core::types::{
    DateFilter, Embedding, GalleryEntry, Identity, IdentityId, Visit, VisitId, DATE_FORMAT,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    embedding BLOB NOT NULL,
    sample_count INTEGER NOT NULL DEFAULT 1 CHECK(sample_count >= 1),
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS visits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    observed_at TEXT NOT NULL,
    evidence_ref TEXT NOT NULL,
    location TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_visits_identity ON visits(identity_id, observed_at);
CREATE INDEX IF NOT EXISTS idx_visits_observed ON visits(observed_at);
";

/// Identity columns plus the evidence of its earliest visit as the portrait.
const IDENTITY_SELECT: &str = "
SELECT i.id, i.embedding, i.sample_count, i.registered_at,
       (SELECT v.evidence_ref FROM visits v WHERE v.identity_id = i.id
        ORDER BY v.observed_at ASC, v.id ASC LIMIT 1)
FROM identities i";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(unavailable)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "database opened");
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(unavailable)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(unavailable)?;
        conn.pragma_update(None, "foreign_keys", 1).map_err(unavailable)?;
        conn.execute_batch(SCHEMA_SQL).map_err(unavailable)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("database connection lock poisoned".into()))
    }
}

impl IdentityStore for SqliteStore {
    fn create_identity(&self, embedding: &Embedding, registered_at: NaiveDateTime) -> Result<IdentityId, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO identities (embedding, sample_count, registered_at) VALUES (?1, 1, ?2)",
            params![encode_embedding(&embedding.values), format_ts(&registered_at)],
        )
        .map_err(unavailable)?;
        Ok(IdentityId(conn.last_insert_rowid()))
    }

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{IDENTITY_SELECT} WHERE i.id = ?1"),
                params![id.0],
                identity_row,
            )
            .optional()
            .map_err(unavailable)?;
        row.map(IdentityRow::into_identity).transpose()
    }

    fn update_identity(&self, id: IdentityId, embedding: &Embedding, expected_count: u32) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE identities SET embedding = ?1, sample_count = sample_count + 1
                 WHERE id = ?2 AND sample_count = ?3",
                params![encode_embedding(&embedding.values), id.0, expected_count],
            )
            .map_err(unavailable)?;
        if changed == 1 {
            return Ok(true);
        }
        let exists = conn
            .query_row("SELECT 1 FROM identities WHERE id = ?1", params![id.0], |_| Ok(()))
            .optional()
            .map_err(unavailable)?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StoreError::UnknownIdentity(id))
        }
    }

    fn all_identities(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, embedding FROM identities ORDER BY id")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))
            .map_err(unavailable)?;

        let mut gallery = Vec::new();
        for row in rows {
            let (id, blob) = row.map_err(unavailable)?;
            let id = IdentityId(id);
            gallery.push(GalleryEntry {
                id,
                embedding: decode_embedding(id, &blob)?,
            });
        }
        Ok(gallery)
    }

    fn identities(&self, filter: DateFilter) -> Result<Vec<Identity>, StoreError> {
        let (from, to) = bounds(filter);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{IDENTITY_SELECT}
                 WHERE (?1 IS NULL OR date(i.registered_at) >= ?1)
                   AND (?2 IS NULL OR date(i.registered_at) <= ?2)
                 ORDER BY i.id"
            ))
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![from, to], identity_row)
            .map_err(unavailable)?;
        rows.map(|row| row.map_err(unavailable)?.into_identity())
            .collect()
    }

    fn delete_identity_cascade(&self, id: IdentityId) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(unavailable)?;
        let visits = tx
            .execute("DELETE FROM visits WHERE identity_id = ?1", params![id.0])
            .map_err(unavailable)?;
        let removed = tx
            .execute("DELETE FROM identities WHERE id = ?1", params![id.0])
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;
        tracing::debug!(identity = %id, visits, removed, "cascade delete");
        Ok(removed > 0)
    }

    fn count_identities(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(n as u64)
    }
}

impl VisitLog for SqliteStore {
    fn insert_visit(
        &self,
        identity: IdentityId,
        evidence_ref: &str,
        location: &str,
        observed_at: NaiveDateTime,
    ) -> Result<VisitId, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO visits (identity_id, observed_at, evidence_ref, location) VALUES (?1, ?2, ?3, ?4)",
            params![identity.0, format_ts(&observed_at), evidence_ref, location],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StoreError::UnknownIdentity(identity),
            _ => unavailable(e),
        })?;
        Ok(VisitId(conn.last_insert_rowid()))
    }

    fn delete_visit(&self, id: VisitId) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM visits WHERE id = ?1", params![id.0])
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    fn visits(&self, filter: DateFilter) -> Result<Vec<Visit>, StoreError> {
        let (from, to) = bounds(filter);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, identity_id, observed_at, evidence_ref, location FROM visits
                 WHERE (?1 IS NULL OR date(observed_at) >= ?1)
                   AND (?2 IS NULL OR date(observed_at) <= ?2)
                 ORDER BY observed_at ASC, id ASC",
            )
            .map_err(unavailable)?;
        let rows = stmt.query_map(params![from, to], visit_row).map_err(unavailable)?;
        rows.map(|row| row.map_err(unavailable)?.into_visit()).collect()
    }

    fn visits_for_identity(&self, identity: IdentityId, filter: DateFilter) -> Result<Vec<Visit>, StoreError> {
        let (from, to) = bounds(filter);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, identity_id, observed_at, evidence_ref, location FROM visits
                 WHERE identity_id = ?1
                   AND (?2 IS NULL OR date(observed_at) >= ?2)
                   AND (?3 IS NULL OR date(observed_at) <= ?3)
                 ORDER BY observed_at DESC, id DESC",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![identity.0, from, to], visit_row)
            .map_err(unavailable)?;
        rows.map(|row| row.map_err(unavailable)?.into_visit()).collect()
    }

    fn count_visits(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM visits", [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(n as u64)
    }
}

struct IdentityRow {
    id: i64,
    embedding: Vec<u8>,
    sample_count: u32,
    registered_at: String,
    portrait_ref: Option<String>,
}

impl IdentityRow {
    fn into_identity(self) -> Result<Identity, StoreError> {
        let id = IdentityId(self.id);
        Ok(Identity {
            id,
            embedding: decode_embedding(id, &self.embedding)?,
            sample_count: self.sample_count,
            registered_at: parse_ts(&self.registered_at)?,
            portrait_ref: self.portrait_ref,
        })
    }
}

fn identity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRow> {
    Ok(IdentityRow {
        id: row.get(0)?,
        embedding: row.get(1)?,
        sample_count: row.get(2)?,
        registered_at: row.get(3)?,
        portrait_ref: row.get(4)?,
    })
}

struct VisitRow {
    id: i64,
    identity_id: i64,
    observed_at: String,
    evidence_ref: String,
    location: String,
}

impl VisitRow {
    fn into_visit(self) -> Result<Visit, StoreError> {
        Ok(Visit {
            id: VisitId(self.id),
            identity_id: IdentityId(self.identity_id),
            observed_at: parse_ts(&self.observed_at)?,
            evidence_ref: self.evidence_ref,
            location: self.location,
        })
    }
}

fn visit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VisitRow> {
    Ok(VisitRow {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        observed_at: row.get(2)?,
        evidence_ref: row.get(3)?,
        location: row.get(4)?,
    })
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Inclusive date bounds as `YYYY-MM-DD` text; `None` is unbounded.
fn bounds(filter: DateFilter) -> (Option<String>, Option<String>) {
    let day = |d: NaiveDate| Some(d.format(DATE_FORMAT).to_string());
    match filter {
        DateFilter::All => (None, None),
        DateFilter::On(d) => (day(d), day(d)),
        DateFilter::Between(from, to) => (day(from), day(to)),
    }
}

fn format_ts(at: &NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|_| StoreError::CorruptTimestamp(raw.to_string()))
}

fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_embedding(id: IdentityId, blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::CorruptEmbedding { id, bytes: blob.len() });
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding::new(values))
}
