//! Persisted embedding index with once-only lazy construction.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use refit_llm::EmbedFn;
use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::{Mutex, OnceCell};

use crate::chunker::CodeChunk;
use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// Location and collection name of the persisted index.
#[derive(Debug, Clone)]
pub struct IndexStoreConfig {
    /// `SQLite` file path, or `:memory:`.
    pub path: String,
    pub collection: String,
}

impl Default for IndexStoreConfig {
    fn default() -> Self {
        Self {
            path: ".refit/index.db".into(),
            collection: "python_code".into(),
        }
    }
}

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: CodeChunk,
    pub score: f32,
}

struct Record {
    id: String,
    chunk: CodeChunk,
    vector: Vec<f32>,
}

pub struct EmbeddingIndex {
    pool: SqlitePool,
    collection: String,
    embed: EmbedFn,
    dims: usize,
    records: RwLock<Vec<Record>>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("collection", &self.collection)
            .field("dims", &self.dims)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl EmbeddingIndex {
    /// Open (or create) the store, probe the embedding function, and load existing records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened, migrations fail, the embedding
    /// probe fails, or persisted vectors disagree with the probe's dimensionality.
    pub async fn open(config: &IndexStoreConfig, embed: EmbedFn) -> Result<Self> {
        let in_memory = config.path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = std::path::Path::new(&config.path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| IndexError::Other(format!("cannot create index directory: {e}")))?;
            }
            format!("sqlite:{}?mode=rwc", config.path)
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // Every in-memory connection is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(opts)
            .await?;

        sqlx::migrate!().run(&pool).await?;

        let dims = embed("probe").await?.len();
        if dims == 0 {
            return Err(IndexError::Unavailable(
                "embedding function returned an empty vector".into(),
            ));
        }

        let records = load_records(&pool, &config.collection).await?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dims) {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                actual: bad.vector.len(),
            });
        }

        tracing::info!(
            collection = %config.collection,
            records = records.len(),
            dims,
            "embedding index opened"
        );

        Ok(Self {
            pool,
            collection: config.collection.clone(),
            embed,
            dims,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embed and persist `chunks`. Records with an existing identity are replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the database write fails; nothing is persisted then.
    pub async fn insert(&self, chunks: Vec<CodeChunk>) -> Result<usize> {
        let records = self.embed_all(chunks).await?;
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await?;
        for record in &records {
            insert_record(&mut tx, &self.collection, record).await?;
        }
        tx.commit().await?;

        let count = records.len();
        let mut current = self.write_records();
        for record in records {
            if let Some(slot) = current.iter_mut().find(|r| r.id == record.id) {
                *slot = record;
            } else {
                current.push(record);
            }
        }
        Ok(count)
    }

    /// Replace the records of the given files of `repository` with `chunks` in one transaction.
    ///
    /// Records of files not listed in `file_paths` are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the database write fails; the previous records survive then.
    pub async fn replace_files(
        &self,
        repository: &str,
        file_paths: &[&str],
        chunks: Vec<CodeChunk>,
    ) -> Result<usize> {
        let records = self.embed_all(chunks).await?;
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await?;
        for path in file_paths {
            sqlx::query(
                "DELETE FROM code_chunks WHERE collection = ? AND repository = ? AND file_path = ?",
            )
            .bind(&self.collection)
            .bind(repository)
            .bind(*path)
            .execute(&mut *tx)
            .await?;
        }
        for record in &records {
            insert_record(&mut tx, &self.collection, record).await?;
        }
        tx.commit().await?;

        let count = records.len();
        let mut current = self.write_records();
        current.retain(|r| {
            r.chunk.repository != repository || !file_paths.contains(&r.chunk.file_path.as_str())
        });
        current.extend(records);
        Ok(count)
    }

    /// Top-`k` chunks most similar to `text`, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding the query fails.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = (self.embed)(text).await?;
        if query_vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query_vector.len(),
            });
        }

        let records = self.read_records();
        let mut scored: Vec<(usize, f32)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, cosine_similarity(&query_vector, &r.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                chunk: records[i].chunk.clone(),
                score,
            })
            .collect())
    }

    async fn embed_all(&self, chunks: Vec<CodeChunk>) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = (self.embed)(&chunk.code).await?;
            if vector.len() != self.dims {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dims,
                    actual: vector.len(),
                });
            }
            records.push(Record {
                id: chunk.record_id(),
                chunk,
                vector,
            });
        }
        Ok(records)
    }

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, Vec<Record>> {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Record>> {
        self.records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

async fn insert_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    collection: &str,
    record: &Record,
) -> Result<()> {
    let chunk = &record.chunk;
    sqlx::query(
        "INSERT OR REPLACE INTO code_chunks \
         (id, collection, repository, file_path, chunk_index, language, node_type, code, \
          byte_start, byte_end, overlap, line_start, line_end, content_hash, dims, vector) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(collection)
    .bind(&chunk.repository)
    .bind(&chunk.file_path)
    .bind(i64::try_from(chunk.index)?)
    .bind(chunk.language.map(Lang::id))
    .bind(&chunk.node_type)
    .bind(&chunk.code)
    .bind(i64::try_from(chunk.byte_range.0)?)
    .bind(i64::try_from(chunk.byte_range.1)?)
    .bind(i64::try_from(chunk.overlap)?)
    .bind(i64::try_from(chunk.line_range.0)?)
    .bind(i64::try_from(chunk.line_range.1)?)
    .bind(&chunk.content_hash)
    .bind(i64::try_from(record.vector.len())?)
    .bind(encode_vector(&record.vector))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn load_records(pool: &SqlitePool, collection: &str) -> Result<Vec<Record>> {
    let rows = sqlx::query(
        "SELECT id, repository, file_path, chunk_index, language, node_type, code, \
                byte_start, byte_end, overlap, line_start, line_end, content_hash, vector \
         FROM code_chunks WHERE collection = ? ORDER BY rowid",
    )
    .bind(collection)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let as_usize = |name: &str| -> Result<usize> {
            let value: i64 = row.try_get(name)?;
            Ok(usize::try_from(value)?)
        };
        let language: Option<String> = row.try_get("language")?;
        let blob: Vec<u8> = row.try_get("vector")?;
        records.push(Record {
            id: row.try_get("id")?,
            chunk: CodeChunk {
                code: row.try_get("code")?,
                repository: row.try_get("repository")?,
                file_path: row.try_get("file_path")?,
                index: as_usize("chunk_index")?,
                language: language.as_deref().and_then(Lang::from_id),
                node_type: row.try_get("node_type")?,
                byte_range: (as_usize("byte_start")?, as_usize("byte_end")?),
                overlap: as_usize("overlap")?,
                line_range: (as_usize("line_start")?, as_usize("line_end")?),
                content_hash: row.try_get("content_hash")?,
            },
            vector: decode_vector(&blob),
        });
    }
    Ok(records)
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

type InitFuture = Pin<Box<dyn Future<Output = Result<EmbeddingIndex>> + Send>>;
type InitFn = Box<dyn Fn() -> InitFuture + Send + Sync>;

/// Process-wide handle to the embedding index.
///
/// Nothing is opened until the first [`LazyIndex::get`]; concurrent first
/// callers wait on a single construction. A failed construction is reported as
/// [`IndexError::Unavailable`] and retried by the next caller.
pub struct LazyIndex {
    cell: OnceCell<EmbeddingIndex>,
    init: InitFn,
    constructions: AtomicUsize,
}

impl std::fmt::Debug for LazyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyIndex")
            .field("initialized", &self.cell.initialized())
            .field("constructions", &self.constructions())
            .finish_non_exhaustive()
    }
}

impl LazyIndex {
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<EmbeddingIndex>> + Send + 'static,
    {
        Self {
            cell: OnceCell::new(),
            init: Box::new(move || Box::pin(init())),
            constructions: AtomicUsize::new(0),
        }
    }

    /// Lazily open the `SQLite` store at `config` with `embed` on first use.
    #[must_use]
    pub fn for_store(config: IndexStoreConfig, embed: EmbedFn) -> Self {
        Self::new(move || {
            let config = config.clone();
            let embed = embed.clone();
            async move { EmbeddingIndex::open(&config, embed).await }
        })
    }

    /// Return the index, constructing it on first call.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Unavailable`] if construction fails.
    pub async fn get(&self) -> Result<&EmbeddingIndex> {
        self.cell
            .get_or_try_init(|| async {
                self.constructions.fetch_add(1, Ordering::SeqCst);
                (self.init)().await.map_err(|e| match e {
                    IndexError::Unavailable(_) => e,
                    other => IndexError::Unavailable(other.to_string()),
                })
            })
            .await
    }

    /// The index if it has already been constructed.
    #[must_use]
    pub fn get_if_initialized(&self) -> Option<&EmbeddingIndex> {
        self.cell.get()
    }

    /// Number of construction attempts made so far.
    #[must_use]
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}
