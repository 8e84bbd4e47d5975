// Vector index module
// Embedding records held in memory with exact cosine search, MMR re-ranking
// and Lance-backed snapshots


pub mod distance;
pub mod mmr;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::ingest::Chunk;
use crate::providers::EmbeddingProvider;
use distance::cosine_similarity;

const DEFAULT_EMBED_TIMEOUT_SECONDS: u64 = 120;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("No index snapshot at {0}")]
    Missing(PathBuf),
    #[error("Index snapshot at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("Embedding model mismatch: index was built with {expected}, provider is {actual}")]
    ModelMismatch { expected: String, actual: String },
    #[error("Embedding dimension mismatch: index has {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Index storage error: {0}")]
    Storage(String),
    #[error("Embedding failed: {0}")]
    Embedding(String),
}

impl IndexError {
    /// Model or dimension drift between the index and the configured embedder
    #[inline]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ModelMismatch { .. } | Self::DimensionMismatch { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Plain nearest neighbours by cosine similarity
    #[default]
    Similarity,
    /// Maximal marginal relevance over an enlarged candidate pool
    Mmr,
}

impl SearchType {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Mmr => "mmr",
        }
    }
}

impl fmt::Display for SearchType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "similarity" => Ok(Self::Similarity),
            "mmr" => Ok(Self::Mmr),
            other => Err(format!(
                "unknown search type '{}' (expected 'similarity' or 'mmr')",
                other
            )),
        }
    }
}

/// Identity of the embedding space every record lives in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub model_id: String,
    pub dimension: usize,
}

/// A chunk plus its embedding; never mutated once stored
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddOutcome {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrSettings {
    pub lambda: f32,
    pub fetch_multiplier: usize,
}

impl Default for MmrSettings {
    #[inline]
    fn default() -> Self {
        Self {
            lambda: 0.5,
            fetch_multiplier: 3,
        }
    }
}

#[derive(Debug, Default)]
struct IndexState {
    metadata: Option<IndexMetadata>,
    records: Vec<EmbeddingRecord>,
}

/// Append-only store of embedding records.
///
/// Adding the same chunk twice stores it twice. Records leave only through
/// [`VectorIndex::reset`] or a [`VectorIndex::restore`] that replaces them.
/// Writers (`add`, `persist`, `restore`, `reset`) take the write lock and
/// `search` the read lock; embedding calls happen with no lock held.
pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    state: RwLock<IndexState>,
    mmr: MmrSettings,
    embed_timeout: Duration,
}

impl fmt::Debug for VectorIndex {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("embedder", &self.embedder.model_id())
            .field("mmr", &self.mmr)
            .field("embed_timeout", &self.embed_timeout)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    #[inline]
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            state: RwLock::new(IndexState::default()),
            mmr: MmrSettings::default(),
            embed_timeout: Duration::from_secs(DEFAULT_EMBED_TIMEOUT_SECONDS),
        }
    }

    #[inline]
    pub fn with_mmr(mut self, mmr: MmrSettings) -> Self {
        self.mmr = mmr;
        self
    }

    /// Outer bound on a single embedding call, on top of the HTTP timeout
    #[inline]
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    #[inline]
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    #[inline]
    pub async fn metadata(&self) -> Option<IndexMetadata> {
        self.state.read().await.metadata.clone()
    }

    /// Number of distinct sources with at least one record
    #[inline]
    pub async fn source_count(&self) -> usize {
        let state = self.state.read().await;
        let mut sources: Vec<&str> = state
            .records
            .iter()
            .map(|r| r.chunk.source.as_str())
            .collect();
        sources.sort_unstable();
        sources.dedup();
        sources.len()
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, IndexError> {
        let embedder = Arc::clone(&self.embedder);
        let task = tokio::task::spawn_blocking(move || embedder.embed(&texts));

        match tokio::time::timeout(self.embed_timeout, task).await {
            Ok(Ok(Ok(vectors))) => Ok(vectors),
            Ok(Ok(Err(e))) => Err(IndexError::Embedding(format!("{:#}", e))),
            Ok(Err(e)) => Err(IndexError::Embedding(format!("Embedding task failed: {}", e))),
            Err(_) => Err(IndexError::Embedding(format!(
                "Timed out after {:?}",
                self.embed_timeout
            ))),
        }
    }

    /// Embed chunks as one batch, falling back to one call per chunk when the
    /// batch fails so a single bad chunk only costs itself
    async fn embed_isolating_failures(&self, chunks: &[Chunk]) -> Vec<Option<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        match self.embed(texts).await {
            Ok(vectors) if vectors.len() == chunks.len() => {
                return vectors.into_iter().map(Some).collect();
            }
            Ok(vectors) => warn!(
                "Embedder returned {} vectors for {} chunks, retrying one by one",
                vectors.len(),
                chunks.len()
            ),
            Err(e) if chunks.len() > 1 => {
                warn!("Batch embedding failed ({}), retrying one by one", e);
            }
            Err(e) => {
                warn!("Skipping chunk {} of {}: {}", chunks[0].chunk_index, chunks[0].source, e);
                return vec![None];
            }
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match self.embed(vec![chunk.text.clone()]).await {
                Ok(mut single) if single.len() == 1 => vectors.push(single.pop()),
                Ok(_) => {
                    warn!(
                        "Skipping chunk {} of {}: embedder returned no vector",
                        chunk.chunk_index, chunk.source
                    );
                    vectors.push(None);
                }
                Err(e) => {
                    warn!(
                        "Skipping chunk {} of {}: {}",
                        chunk.chunk_index, chunk.source, e
                    );
                    vectors.push(None);
                }
            }
        }
        vectors
    }

    fn check_model(&self, metadata: Option<&IndexMetadata>) -> Result<(), IndexError> {
        match metadata {
            Some(meta) if meta.model_id != self.embedder.model_id() => {
                Err(IndexError::ModelMismatch {
                    expected: meta.model_id.clone(),
                    actual: self.embedder.model_id().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Embed and append chunks. Chunks whose embedding fails are skipped with
    /// a warning; a model or dimension mismatch rejects the whole batch.
    #[inline]
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<AddOutcome, IndexError> {
        if chunks.is_empty() {
            return Ok(AddOutcome::default());
        }

        let current = self.metadata().await;
        self.check_model(current.as_ref())?;

        let vectors = self.embed_isolating_failures(&chunks).await;

        let mut dimension = current.as_ref().map(|m| m.dimension);
        let mut records = Vec::with_capacity(chunks.len());
        let mut skipped = 0;
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            let Some(vector) = vector.filter(|v| !v.is_empty()) else {
                skipped += 1;
                continue;
            };
            match dimension {
                Some(expected) if expected != vector.len() => {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
                None => dimension = Some(vector.len()),
            }
            records.push(EmbeddingRecord { chunk, vector });
        }

        let Some(dimension) = dimension else {
            return Ok(AddOutcome { added: 0, skipped });
        };
        if records.is_empty() {
            return Ok(AddOutcome { added: 0, skipped });
        }

        let mut state = self.state.write().await;
        // Another writer may have fixed the embedding space while we embedded
        self.check_model(state.metadata.as_ref())?;
        if let Some(meta) = &state.metadata {
            if meta.dimension != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: meta.dimension,
                    actual: dimension,
                });
            }
        } else {
            state.metadata = Some(IndexMetadata {
                model_id: self.embedder.model_id().to_string(),
                dimension,
            });
        }

        let added = records.len();
        state.records.extend(records);
        info!(
            "Added {} records ({} skipped), index now holds {}",
            added,
            skipped,
            state.records.len()
        );

        Ok(AddOutcome { added, skipped })
    }

    /// Return at most `k` hits ordered by decreasing similarity; fewer when
    /// the index holds fewer records. `Mmr` picks its `k` from an enlarged
    /// candidate pool for diversity, then orders them by similarity.
    #[inline]
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        search_type: SearchType,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let Some(metadata) = self.metadata().await else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        self.check_model(Some(&metadata))?;

        let query_vector = self
            .embed(vec![query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| IndexError::Embedding("Embedder returned no vector".to_string()))?;
        if query_vector.len() != metadata.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: metadata.dimension,
                actual: query_vector.len(),
            });
        }

        let state = self.state.read().await;
        let mut scored: Vec<(usize, f32)> = state
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| (i, cosine_similarity(&query_vector, &record.vector)))
            .collect();
        scored.sort_by(|a, b| compare_hits(&state.records, *a, *b));

        let selected: Vec<(usize, f32)> = match search_type {
            SearchType::Similarity => scored.into_iter().take(k).collect(),
            SearchType::Mmr => {
                let pool = k.saturating_mul(self.mmr.fetch_multiplier.max(1));
                scored.truncate(pool);
                let candidates: Vec<mmr::Candidate<'_>> = scored
                    .iter()
                    .enumerate()
                    .map(|(position, &(index, score))| mmr::Candidate {
                        position,
                        score,
                        vector: &state.records[index].vector,
                    })
                    .collect();
                let mut picked: Vec<(usize, f32)> = mmr::rerank(&candidates, k, self.mmr.lambda)
                    .into_iter()
                    .map(|position| scored[position])
                    .collect();
                picked.sort_by(|a, b| compare_hits(&state.records, *a, *b));
                picked
            }
        };

        debug!(
            "{} search for k={} returned {} of {} records",
            search_type,
            k,
            selected.len(),
            state.records.len()
        );

        Ok(selected
            .into_iter()
            .map(|(index, score)| SearchHit {
                chunk: state.records[index].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Drop every record and forget the embedding space
    #[inline]
    pub async fn reset(&self) -> usize {
        let mut state = self.state.write().await;
        let removed = state.records.len();
        *state = IndexState::default();
        info!("Index reset, {} records removed", removed);
        removed
    }

    /// Write a snapshot of the current records to `location`
    #[inline]
    pub async fn persist(&self, location: &Path) -> Result<(), IndexError> {
        let state = self.state.write().await;
        snapshot::write(location, state.metadata.as_ref(), &state.records).await
    }

    /// Replace the contents with the snapshot at `location`.
    ///
    /// On error the current contents are left untouched.
    #[inline]
    pub async fn restore(&self, location: &Path) -> Result<usize, IndexError> {
        let (metadata, records) = snapshot::read(location).await?;
        if let Some(meta) = &metadata {
            if meta.model_id != self.embedder.model_id() {
                warn!(
                    "Snapshot was built with {}, configured embedder is {}; searches will fail until the index is reset",
                    meta.model_id,
                    self.embedder.model_id()
                );
            }
        }

        let mut state = self.state.write().await;
        let restored = records.len();
        *state = IndexState { metadata, records };
        info!("Restored {} records from {}", restored, location.display());
        Ok(restored)
    }
}

/// Descending score, then source, then chunk index
fn compare_hits(records: &[EmbeddingRecord], a: (usize, f32), b: (usize, f32)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| records[a.0].chunk.source.cmp(&records[b.0].chunk.source))
        .then_with(|| {
            records[a.0]
                .chunk
                .chunk_index
                .cmp(&records[b.0].chunk.chunk_index)
        })
}
