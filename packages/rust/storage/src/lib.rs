//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding source documents and
//! their retrievable chunks, partitioned by [`KnowledgeBase`]. Chunk retrieval
//! is ranked with FTS5 `bm25`, surfaced as a distance where lower is closer.
//!
//! **Access rules:**
//! - Server and CLI ingest: read-write via [`Storage::open`]
//! - Inspection tools: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use docmuse_shared::{ChunkHit, DocMuseError, DocumentRecord, KnowledgeBase, Result};
use libsql::{Connection, Database, Row, Rows, params};
use tokio::sync::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// Serializes writes so a transaction never interleaves with another write
    /// on the shared connection.
    write_lock: Mutex<()>,
}

/// Result of [`Storage::ingest_document`].
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub record: DocumentRecord,
    pub chunk_id: String,
    /// False when a document with this ID was already stored.
    pub created: bool,
}

fn storage_err(e: impl std::fmt::Display) -> DocMuseError {
    DocMuseError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocMuseError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DocMuseError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DocMuseError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Insert or replace a document.
    ///
    /// `id` defaults to a fresh UUID v7. Returns the stored record.
    pub async fn upsert_document(
        &self,
        id: Option<&str>,
        kb: KnowledgeBase,
        title: &str,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<DocumentRecord> {
        self.check_writable()?;
        let _write = self.write_lock.lock().await;
        write_document(&self.conn, id, kb, title, content, metadata).await
    }

    /// Store a document and index its whole content as a single chunk, both
    /// or neither.
    ///
    /// The chunk ID is derived from the document ID, so ingesting the same
    /// document again replaces its chunk instead of adding a second one.
    pub async fn ingest_document(
        &self,
        id: Option<&str>,
        kb: KnowledgeBase,
        title: &str,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<IngestedDocument> {
        self.check_writable()?;
        if content.trim().is_empty() {
            return Err(DocMuseError::validation("document content is empty"));
        }
        let _write = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        let written = async {
            let created = match id {
                Some(id) => !row_exists(&tx, "SELECT 1 FROM documents WHERE id = ?1", id).await?,
                None => true,
            };
            let record = write_document(&tx, id, kb, title, content, metadata).await?;
            let chunk_id = document_chunk_id(&record.id);
            tx.execute(
                "INSERT INTO chunks (id, document_id, kb, content, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                   kb = excluded.kb,
                   content = excluded.content,
                   metadata_json = excluded.metadata_json",
                params![
                    chunk_id.as_str(),
                    record.id.as_str(),
                    kb.as_str(),
                    content,
                    metadata.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
            Ok::<_, DocMuseError>(IngestedDocument {
                record,
                chunk_id,
                created,
            })
        }
        .await;

        match written {
            Ok(ingested) => {
                tx.commit().await.map_err(storage_err)?;
                tracing::debug!(
                    document_id = %ingested.record.id,
                    created = ingested.created,
                    kb = %kb,
                    "ingested document"
                );
                Ok(ingested)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Get a document by ID within a knowledge base.
    pub async fn get_document(&self, id: &str, kb: KnowledgeBase) -> Result<Option<DocumentRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kb, title, content, content_hash, metadata_json, created_at
                 FROM documents WHERE id = ?1 AND kb = ?2",
                params![id, kb.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Whether a document with this ID exists in any knowledge base.
    pub async fn document_exists(&self, id: &str) -> Result<bool> {
        row_exists(&self.conn, "SELECT 1 FROM documents WHERE id = ?1", id).await
    }

    /// List all documents in a knowledge base, newest first.
    pub async fn list_documents(&self, kb: KnowledgeBase) -> Result<Vec<DocumentRecord>> {
        let rows = self
            .conn
            .query(
                "SELECT id, kb, title, content, content_hash, metadata_json, created_at
                 FROM documents WHERE kb = ?1 ORDER BY created_at DESC",
                params![kb.as_str()],
            )
            .await
            .map_err(storage_err)?;

        collect_rows(rows, row_to_document).await
    }

    /// Delete a document and its chunks. Returns whether the document existed.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        self.check_writable()?;
        let _write = self.write_lock.lock().await;
        let tx = self.conn.transaction().await.map_err(storage_err)?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id])
            .await
            .map_err(storage_err)?;
        let removed = tx
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .await
            .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;
        Ok(removed > 0)
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Add a retrievable chunk owned by `document_id`. Returns the chunk ID.
    pub async fn insert_chunk(
        &self,
        text: &str,
        document_id: &str,
        kb: KnowledgeBase,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        self.check_writable()?;
        if text.trim().is_empty() {
            return Err(DocMuseError::validation("chunk text is empty"));
        }
        let _write = self.write_lock.lock().await;
        let id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO chunks (id, document_id, kb, content, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    document_id,
                    kb.as_str(),
                    text,
                    metadata.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        tracing::debug!(chunk_id = %id, document_id, kb = %kb, "indexed chunk");
        Ok(id)
    }

    /// Count chunks in a knowledge base.
    pub async fn count_chunks(&self, kb: KnowledgeBase) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM chunks WHERE kb = ?1", params![kb.as_str()])
            .await
            .map_err(storage_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_or(0, |n| n.max(0) as u64)),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // FTS retrieval
    // -----------------------------------------------------------------------

    /// Rank chunks in `kb` against `text`, best match first.
    ///
    /// Any shared term counts as a match. `scope` restricts results to a
    /// single owning document. A query with no searchable terms returns
    /// nothing rather than an error.
    pub async fn query_chunks(
        &self,
        text: &str,
        kb: KnowledgeBase,
        k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<ChunkHit>> {
        let Some(match_expr) = fts_match_expression(text) else {
            return Ok(Vec::new());
        };

        let rows = self
            .conn
            .query(
                "SELECT c.id, c.document_id, c.content, c.metadata_json, rank
                 FROM chunks_fts fts
                 JOIN chunks c ON c.rowid = fts.rowid
                 WHERE chunks_fts MATCH ?1 AND c.kb = ?2
                   AND (?3 IS NULL OR c.document_id = ?3)
                 ORDER BY rank
                 LIMIT ?4",
                params![match_expr, kb.as_str(), scope, k as i64],
            )
            .await
            .map_err(storage_err)?;

        collect_rows(rows, |row| {
            let metadata_json: String = row.get(3).map_err(storage_err)?;
            let rank: f64 = row.get(4).unwrap_or(0.0);
            Ok(ChunkHit {
                id: row.get(0).map_err(storage_err)?,
                document_id: row.get(1).map_err(storage_err)?,
                text: row.get(2).map_err(storage_err)?,
                metadata: parse_metadata(&metadata_json)?,
                distance: rank_to_distance(rank),
            })
        })
        .await
    }
}

/// Insert or replace a document row on `conn`.
async fn write_document(
    conn: &Connection,
    id: Option<&str>,
    kb: KnowledgeBase,
    title: &str,
    content: &str,
    metadata: &serde_json::Value,
) -> Result<DocumentRecord> {
    let id = id.map_or_else(|| Uuid::now_v7().to_string(), str::to_owned);
    let record = DocumentRecord {
        id,
        knowledge_base: kb,
        title: title.to_owned(),
        content: content.to_owned(),
        content_hash: content_hash(content),
        metadata: metadata.clone(),
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO documents (id, kb, title, content, content_hash, metadata_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
           kb = excluded.kb,
           title = excluded.title,
           content = excluded.content,
           content_hash = excluded.content_hash,
           metadata_json = excluded.metadata_json",
        params![
            record.id.as_str(),
            kb.as_str(),
            record.title.as_str(),
            record.content.as_str(),
            record.content_hash.as_str(),
            record.metadata.to_string(),
            record.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(storage_err)?;
    Ok(record)
}

/// Chunk ID for the single chunk of an ingested document.
fn document_chunk_id(document_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{document_id}#0").as_bytes()).to_string()
}

async fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool> {
    let mut rows = conn.query(sql, params![id]).await.map_err(storage_err)?;
    Ok(rows.next().await.map_err(storage_err)?.is_some())
}

/// Map every row, failing on the first read error instead of stopping short.
async fn collect_rows<T>(mut rows: Rows, map: impl Fn(&Row) -> Result<T>) -> Result<Vec<T>> {
    let mut results = Vec::new();
    while let Some(row) = rows.next().await.map_err(storage_err)? {
        results.push(map(&row)?);
    }
    Ok(results)
}


/// SHA-256 hex digest of document content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build an FTS5 MATCH expression that ORs every word of `text`.
///
/// Terms are quoted so user punctuation never reaches the FTS5 query parser.
fn fts_match_expression(text: &str) -> Option<String> {
    static TERM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"));

    let terms: Vec<String> = TERM_RE
        .find_iter(text)
        .map(|m| format!("\"{}\"", m.as_str().to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Map an FTS5 bm25 rank (more negative is better) onto `(0, 1]`, lower is closer.
fn rank_to_distance(rank: f64) -> f64 {
    1.0 / (1.0 + (-rank).max(0.0))
}

fn parse_metadata(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| DocMuseError::Storage(format!("invalid metadata: {e}")))
}

/// Convert a database row to a [`DocumentRecord`].
fn row_to_document(row: &libsql::Row) -> Result<DocumentRecord> {
    let kb: String = row.get(1).map_err(storage_err)?;
    let metadata_json: String = row.get(5).map_err(storage_err)?;
    Ok(DocumentRecord {
        id: row.get(0).map_err(storage_err)?,
        knowledge_base: kb.parse()?,
        title: row.get(2).map_err(storage_err)?,
        content: row.get(3).map_err(storage_err)?,
        content_hash: row.get(4).map_err(storage_err)?,
        metadata: parse_metadata(&metadata_json)?,
        created_at: {
            let s: String = row.get(6).map_err(storage_err)?;
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DocMuseError::Storage(format!("invalid date: {e}")))?
        },
    })
}
