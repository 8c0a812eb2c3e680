use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::EmbeddingFailure;
use crate::semantic::{
    EmbeddingProvider, decode_embedding_blob, embedding_text_hash, encode_embedding_blob,
    normalize_whitespace,
};
use crate::util::{ensure_directory, now_utc_string};

const EMBEDDING_STORE_SCHEMA_VERSION: &str = "1";

/// Persists provider output in SQLite so repeated runs skip provider calls.
///
/// Rows are keyed by (model id, sha256 of the whitespace-normalised text);
/// vectors are little-endian f32 blobs.
pub struct SqliteEmbeddingStore<P> {
    inner: P,
    connection: Mutex<Connection>,
}

impl<P: EmbeddingProvider> SqliteEmbeddingStore<P> {
    pub fn open(db_path: &Path, inner: P) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }

        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open embedding store: {}", db_path.display()))?;

        configure_connection(&connection)?;
        ensure_schema(&connection)?;

        let stored = count_rows(&connection, inner.model_id())?;
        info!(
            path = %db_path.display(),
            model_id = %inner.model_id(),
            stored,
            "opened embedding store"
        );

        Ok(Self {
            inner,
            connection: Mutex::new(connection),
        })
    }

    pub fn stored_count(&self) -> Result<i64> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding store lock poisoned"))?;
        count_rows(&connection, self.inner.model_id())
    }

    fn lookup(&self, text_hash: &str) -> Result<Option<Vec<f32>>, EmbeddingFailure> {
        let connection = self.lock()?;
        let row = connection
            .query_row(
                "
                SELECT embedding, embedding_dim
                FROM text_embeddings
                WHERE model_id = ?1 AND text_hash = ?2
                LIMIT 1
                ",
                params![self.inner.model_id(), text_hash],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(|error| self.failure(format!("lookup failed: {error}")))?;

        Ok(row.and_then(|(blob, dim)| {
            if dim as usize != self.inner.dimensions() {
                return None;
            }
            decode_embedding_blob(&blob, dim as usize)
        }))
    }

    fn persist(&self, text_hash: &str, vector: &[f32]) -> Result<(), EmbeddingFailure> {
        let connection = self.lock()?;
        connection
            .execute(
                "
                INSERT INTO text_embeddings(
                  model_id, text_hash, embedding, embedding_dim, generated_at
                )
                VALUES(?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(model_id, text_hash) DO UPDATE SET
                  embedding=excluded.embedding,
                  embedding_dim=excluded.embedding_dim,
                  generated_at=excluded.generated_at
                ",
                params![
                    self.inner.model_id(),
                    text_hash,
                    encode_embedding_blob(vector),
                    vector.len() as i64,
                    now_utc_string(),
                ],
            )
            .map_err(|error| self.failure(format!("insert failed: {error}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, EmbeddingFailure> {
        self.connection
            .lock()
            .map_err(|_| self.failure("embedding store lock poisoned"))
    }

    fn failure(&self, reason: impl Into<String>) -> EmbeddingFailure {
        EmbeddingFailure::new(format!("sqlite-store/{}", self.inner.model_id()), reason)
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for SqliteEmbeddingStore<P> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingFailure> {
        let text_hash = embedding_text_hash(&normalize_whitespace(text));
        if let Some(vector) = self.lookup(&text_hash)? {
            return Ok(vector);
        }

        debug!(text_hash = %text_hash, "embedding store miss");
        let vector = self.inner.embed(text)?;
        self.persist(&text_hash, &vector)?;
        Ok(vector)
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL for embedding store")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL for embedding store")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS text_embeddings (
              model_id TEXT NOT NULL,
              text_hash TEXT NOT NULL,
              embedding BLOB NOT NULL,
              embedding_dim INTEGER NOT NULL,
              generated_at TEXT NOT NULL,
              PRIMARY KEY(model_id, text_hash)
            );
            ",
        )
        .context("failed to create embedding store schema")?;

    connection
        .execute(
            "
            INSERT INTO metadata(key, value) VALUES('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value=excluded.value
            ",
            params![EMBEDDING_STORE_SCHEMA_VERSION],
        )
        .context("failed to record embedding store schema version")?;

    Ok(())
}

fn count_rows(connection: &Connection, model_id: &str) -> Result<i64> {
    let count = connection.query_row(
        "SELECT COUNT(*) FROM text_embeddings WHERE model_id = ?1",
        params![model_id],
        |row| row.get(0),
    )?;
    Ok(count)
}
