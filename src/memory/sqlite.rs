//! Durable vector store on `SQLite` + sqlite-vec

use std::path::Path;
use std::sync::Once;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use uuid::Uuid;

use super::{
    MemoryMetadata, MemoryRecord, MemorySource, VectorStore, check_dimension, from_bytes,
    to_bytes,
};
use crate::{Error, Result};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register sqlite-vec extension for all new connections
///
/// Must run before any connection is opened. Only the first call has any
/// effect.
#[allow(unsafe_code)]
fn register_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the entry point exported by the
        // sqlite-vec crate for `sqlite3_auto_extension`. The transmute only
        // restates its pointer with the signature rusqlite's FFI expects.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut i8,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> i32,
            >(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

type DbPool = Pool<SqliteConnectionManager>;
type DbConn = PooledConnection<SqliteConnectionManager>;

/// Vector store persisted in a `SQLite` file
///
/// Ranking uses sqlite-vec's `vec_distance_cosine`; the autoincrement `seq`
/// column breaks ties in insertion order.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: DbPool,
    dimension: usize,
}

impl SqliteVectorStore {
    /// Open (or create) the store at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened, or was created with a
    /// different embedding width
    pub fn open<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self> {
        register_sqlite_vec();

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;

        let store = Self { pool, dimension };
        store.init()?;

        tracing::info!(
            path = %path.as_ref().display(),
            dimension,
            version = SCHEMA_VERSION,
            "memory database initialized"
        );
        Ok(store)
    }

    /// Open a private in-memory database (for testing)
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        register_sqlite_vec();

        // One connection, since each in-memory connection is its own database
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;

        let store = Self { pool, dimension };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        migrate(&conn)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .ok();

        match stored.and_then(|s| s.parse::<usize>().ok()) {
            Some(existing) => check_dimension(existing, self.dimension),
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO store_meta (key, value) VALUES ('dimension', ?1)",
                    [self.dimension.to_string()],
                )?;
                Ok(())
            }
        }
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS memory_records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                input TEXT NOT NULL,
                response TEXT NOT NULL,
                timestamp REAL NOT NULL,
                source TEXT NOT NULL,
                audio_url TEXT
            );

            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            ",
        )?;
    }

    Ok(())
}

/// One `memory_records` row before validation
struct StoredRow {
    seq: i64,
    id: String,
    text: String,
    embedding: Vec<u8>,
    input: String,
    response: String,
    timestamp: f64,
    source: String,
    audio_url: Option<String>,
}

impl StoredRow {
    /// Decode into a record; corrupt rows are logged and skipped
    fn into_record(self, dimension: usize) -> Option<MemoryRecord> {
        let Ok(id) = Uuid::parse_str(&self.id) else {
            tracing::warn!(seq = self.seq, id = %self.id, "skipping memory row with invalid id");
            return None;
        };
        let Some(source) = MemorySource::from_str_value(&self.source) else {
            tracing::warn!(
                seq = self.seq,
                source = %self.source,
                "skipping memory row with unknown source"
            );
            return None;
        };
        let embedding = from_bytes(&self.embedding);
        if embedding.len() != dimension {
            tracing::warn!(
                seq = self.seq,
                expected = dimension,
                actual = embedding.len(),
                "skipping memory row with wrong embedding width"
            );
            return None;
        }

        Some(MemoryRecord {
            id,
            text: self.text,
            embedding,
            metadata: MemoryMetadata {
                input: self.input,
                response: self.response,
                timestamp: self.timestamp,
                source,
                audio_url: self.audio_url,
            },
        })
    }
}

impl VectorStore for SqliteVectorStore {
    fn add(&self, record: MemoryRecord) -> Result<()> {
        check_dimension(self.dimension, record.embedding.len())?;
        let conn = self.conn()?;

        conn.execute(
            r"INSERT INTO memory_records (id, text, embedding, input, response, timestamp, source, audio_url)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.id.to_string(),
                record.text,
                to_bytes(&record.embedding),
                record.metadata.input,
                record.metadata.response,
                record.metadata.timestamp,
                record.metadata.source.as_str(),
                record.metadata.audio_url,
            ],
        )?;

        Ok(())
    }

    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<String>> {
        check_dimension(self.dimension, embedding.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;

        // Zero vectors give a NULL distance; rank them as orthogonal
        let mut stmt = conn.prepare(
            r"SELECT text FROM memory_records
              ORDER BY COALESCE(vec_distance_cosine(embedding, ?1), 1.0), seq
              LIMIT ?2",
        )?;

        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(rusqlite::params![to_bytes(embedding), k as i64], |row| {
            row.get::<_, String>(0)
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn get_all(&self) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r"SELECT seq, id, text, embedding, input, response, timestamp, source, audio_url
              FROM memory_records ORDER BY seq",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(StoredRow {
                seq: row.get(0)?,
                id: row.get(1)?,
                text: row.get(2)?,
                embedding: row.get(3)?,
                input: row.get(4)?,
                response: row.get(5)?,
                timestamp: row.get(6)?,
                source: row.get(7)?,
                audio_url: row.get(8)?,
            })
        })?;

        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_record(self.dimension))
            .collect())
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_records", [], |row| {
            row.get(0)
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str, embedding: Vec<f32>) -> MemoryRecord {
        MemoryRecord::new(text, "reply", embedding, MemorySource::Text, None)
    }

    #[test]
    fn test_add_and_query() {
        let store = SqliteVectorStore::open_in_memory(2).unwrap();
        store.add(record("far", vec![0.0, 1.0])).unwrap();
        store.add(record("near", vec![1.0, 0.1])).unwrap();

        let hits = store.query(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits, vec!["near reply"]);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let store = SqliteVectorStore::open_in_memory(2).unwrap();
        store.add(record("first", vec![0.0, 1.0])).unwrap();
        store.add(record("second", vec![0.0, 1.0])).unwrap();

        let hits = store.query(&[0.0, 1.0], 2).unwrap();
        assert_eq!(hits, vec!["first reply", "second reply"]);
    }

    #[test]
    fn test_empty_store() {
        let store = SqliteVectorStore::open_in_memory(4).unwrap();
        assert!(store.query(&[0.5; 4], 3).unwrap().is_empty());
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let store = SqliteVectorStore::open_in_memory(3).unwrap();
        assert!(matches!(
            store.add(record("x", vec![1.0])),
            Err(Error::DimensionMismatch { expected: 3, actual: 1 })
        ));
        assert!(matches!(
            store.query(&[1.0, 0.0], 1),
            Err(Error::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_corrupt_rows_are_skipped() {
        let store = SqliteVectorStore::open_in_memory(2).unwrap();
        store.add(record("good", vec![1.0, 0.0])).unwrap();

        let conn = store.conn().unwrap();
        let insert = r"INSERT INTO memory_records
            (id, text, embedding, input, response, timestamp, source, audio_url)
            VALUES (?1, 'bad', ?2, 'in', 'out', 1.0, ?3, NULL)";
        let good_id = Uuid::new_v4().to_string();
        let two_dims = to_bytes(&[0.0, 1.0]);
        conn.execute(insert, rusqlite::params!["not-a-uuid", two_dims, "text"])
            .unwrap();
        conn.execute(insert, rusqlite::params![good_id, two_dims, "fax"])
            .unwrap();
        conn.execute(insert, rusqlite::params![good_id, to_bytes(&[1.0]), "voice"])
            .unwrap();
        drop(conn);

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text, "good reply");
        assert!(!all[0].id.is_nil());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");

        {
            let store = SqliteVectorStore::open(&path, 2).unwrap();
            let mut r = record("kept", vec![1.0, 0.0]);
            r.metadata.source = MemorySource::Voice;
            r.metadata.audio_url = Some("/audio/resp-1.mp3".to_string());
            store.add(r).unwrap();
        }

        let store = SqliteVectorStore::open(&path, 2).unwrap();
        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text, "kept reply");
        assert_eq!(all[0].embedding, vec![1.0, 0.0]);
        assert_eq!(all[0].metadata.source, MemorySource::Voice);
        assert_eq!(all[0].metadata.audio_url.as_deref(), Some("/audio/resp-1.mp3"));

        assert!(matches!(
            SqliteVectorStore::open(&path, 3),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }
}
