//! facegate-store — append-only SQLite store of registered faces.
//!
//! One table, `faces(name TEXT, encoding BLOB, timestamp TEXT)`. The
//! encoding column holds the embedding as little-endian f64 values; the
//! timestamp is local ISO-8601 time without an offset. Rows are only ever
//! inserted, and readers see them in insertion order.

use chrono::{Local, NaiveDateTime};
use facegate_core::{Embedding, FaceRecord};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp layout of the `timestamp` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS faces (name TEXT, encoding BLOB, timestamp TEXT)";

/// `$XDG_DATA_HOME/facegate/faces.db`.
pub fn default_db_path() -> PathBuf {
    facegate_core::data_dir().join("faces.db")
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("name must not be empty")]
    EmptyName,
    #[error("embedding must not be empty")]
    EmptyEmbedding,
    #[error("stored embedding for {name:?} is {len} bytes, not a whole number of f64 values")]
    CorruptEmbedding { name: String, len: usize },
}

/// A registered name and when it was registered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisteredUser {
    pub name: String,
    pub registered_at: String,
}

/// Handle to the face database. Dropping it closes the connection.
pub struct FaceStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl FaceStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "face store opened");
        Ok(Self { conn, path: Some(path.to_path_buf()) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register a face under `name`, stamped with the current local time.
    pub fn register(&self, name: &str, embedding: &Embedding) -> Result<FaceRecord, StoreError> {
        self.register_at(name, embedding, Local::now().naive_local())
    }

    pub fn register_at(
        &self,
        name: &str,
        embedding: &Embedding,
        at: NaiveDateTime,
    ) -> Result<FaceRecord, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if embedding.values.is_empty() {
            return Err(StoreError::EmptyEmbedding);
        }

        let record = FaceRecord {
            name: name.to_string(),
            embedding: embedding.clone(),
            registered_at: at.format(TIMESTAMP_FORMAT).to_string(),
        };
        self.conn.execute(
            "INSERT INTO faces (name, encoding, timestamp) VALUES (?1, ?2, ?3)",
            params![record.name, encode_embedding(&record.embedding), record.registered_at],
        )?;

        tracing::info!(
            name = %record.name,
            dim = record.embedding.dim(),
            at = %record.registered_at,
            "face registered"
        );
        Ok(record)
    }

    /// Every record, in insertion order.
    pub fn load_gallery(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, encoding, timestamp FROM faces ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut gallery = Vec::new();
        for row in rows {
            let (name, blob, registered_at) = row?;
            let embedding = decode_embedding(&name, &blob)?;
            gallery.push(FaceRecord { name, embedding, registered_at });
        }
        tracing::debug!(records = gallery.len(), "gallery loaded");
        Ok(gallery)
    }

    /// Names and timestamps, in insertion order.
    pub fn list_users(&self) -> Result<Vec<RegisteredUser>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, timestamp FROM faces ORDER BY rowid")?;
        let users = stmt
            .query_map([], |row| {
                Ok(RegisteredUser {
                    name: row.get(0)?,
                    registered_at: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_embedding(name: &str, blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() % 8 != 0 {
        return Err(StoreError::CorruptEmbedding {
            name: name.to_string(),
            len: blob.len(),
        });
    }
    let values = blob
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect();
    Ok(Embedding::new(values))
}
