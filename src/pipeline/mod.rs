// Query pipeline module
// Loader -> splitter -> index on the ingest path, index -> synthesizer on the
// query path


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::index::{IndexError, IndexMetadata, MmrSettings, SearchType, VectorIndex, snapshot};
use crate::ingest::{Chunk, Document, DocumentLoader, SplitterConfig, split_document};
use crate::providers::{EmbeddingProvider, LlmProvider};
use crate::synth::{AnswerSynthesizer, SynthesisError};
use crate::{AkasError, Result};

pub const MIN_K: usize = 1;
pub const MAX_K: usize = 20;
const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    Unloaded,
    Loading,
    Splitting,
    Embedding,
    Ready,
}

impl fmt::Display for IngestStage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "UNLOADED",
            Self::Loading => "LOADING",
            Self::Splitting => "SPLITTING",
            Self::Embedding => "EMBEDDING",
            Self::Ready => "READY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputStatus {
    /// Received and stored, not yet processed
    Saved,
    Processed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputReport {
    pub input: String,
    pub status: InputStatus,
    pub documents: usize,
    pub chunks_created: usize,
    pub chunks_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds spent loading, splitting and embedding this input
    pub processing_time: f64,
}

impl InputReport {
    fn failed(input: &str, error: impl fmt::Display) -> Self {
        Self {
            input: input.to_string(),
            status: InputStatus::Error,
            documents: 0,
            chunks_created: 0,
            chunks_skipped: 0,
            error: Some(error.to_string()),
            processing_time: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub inputs: Vec<InputReport>,
    pub total_chunks: usize,
    pub stage: IngestStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceExcerpt {
    pub source: String,
    pub excerpt: String,
    pub chunk_index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub query_id: Uuid,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceExcerpt>,
    /// Seconds spent retrieving and generating
    pub processing_time: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub stage: IngestStage,
    pub ready: bool,
    pub records: usize,
    pub documents: usize,
    pub index: Option<IndexMetadata>,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub llm_provider: String,
    pub llm_model: String,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub splitter: SplitterConfig,
    pub default_k: usize,
    pub query_timeout: Duration,
    /// Snapshot directory restored at startup; `None` keeps the index in memory only
    pub snapshot_location: Option<PathBuf>,
    /// Persist to `snapshot_location` after every ingest that added records
    pub autosave: bool,
}

impl Default for PipelineSettings {
    #[inline]
    fn default() -> Self {
        Self {
            splitter: SplitterConfig::default(),
            default_k: 5,
            query_timeout: Duration::from_secs(120),
            snapshot_location: None,
            autosave: false,
        }
    }
}

/// Owner of the vector index and the two verbs, `ingest` and `ask`.
///
/// Ingests are serialized. Queries need only a non-empty index, so they keep
/// working while a later ingest is in flight.
#[derive(Debug)]
pub struct Pipeline {
    loader: DocumentLoader,
    index: VectorIndex,
    synthesizer: AnswerSynthesizer,
    settings: PipelineSettings,
    stage: RwLock<IngestStage>,
    ingest_guard: Mutex<()>,
}

impl Pipeline {
    #[inline]
    pub fn new(
        loader: DocumentLoader,
        index: VectorIndex,
        synthesizer: AnswerSynthesizer,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            loader,
            index,
            synthesizer,
            settings,
            stage: RwLock::new(IngestStage::Unloaded),
            ingest_guard: Mutex::new(()),
        }
    }

    /// Wire a pipeline from configuration and already-built providers
    #[inline]
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        let provider_timeout = Duration::from_secs(config.providers.timeout_secs);
        // Retries happen inside the provider call, so the outer bound covers all of them
        let outer_timeout = provider_timeout * (config.providers.retry_attempts.max(1) + 1);

        let index = VectorIndex::new(embedder)
            .with_mmr(MmrSettings {
                lambda: config.retrieval.mmr_lambda,
                fetch_multiplier: config.retrieval.mmr_fetch_multiplier,
            })
            .with_embed_timeout(outer_timeout);

        let synthesizer = AnswerSynthesizer::new(
            llm,
            config.retrieval.max_context_chars,
            config.retrieval.temperature,
        )
        .with_timeout(outer_timeout);

        let settings = PipelineSettings {
            splitter: config.chunking,
            default_k: config.retrieval.default_k,
            query_timeout: Duration::from_secs(config.server.query_timeout_secs),
            snapshot_location: Some(config.index_path()),
            autosave: config.storage.autosave,
        };

        Self::new(
            DocumentLoader::new(provider_timeout),
            index,
            synthesizer,
            settings,
        )
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[inline]
    pub async fn stage(&self) -> IngestStage {
        *self.stage.read().await
    }

    async fn set_stage(&self, stage: IngestStage) {
        let mut current = self.stage.write().await;
        if *current != stage {
            debug!("Ingest stage {} -> {}", *current, stage);
            *current = stage;
        }
    }

    /// Whether queries can be served
    #[inline]
    pub async fn is_ready(&self) -> bool {
        !self.index.is_empty().await
    }

    #[inline]
    pub async fn status(&self) -> PipelineStatus {
        PipelineStatus {
            stage: self.stage().await,
            ready: self.is_ready().await,
            records: self.index.len().await,
            documents: self.index.source_count().await,
            index: self.index.metadata().await,
            embedding_provider: self.index.embedder().name().to_string(),
            embedding_model: self.index.embedder().model_id().to_string(),
            llm_provider: self.synthesizer.llm().name().to_string(),
            llm_model: self.synthesizer.llm().model_id().to_string(),
        }
    }

    /// Load the snapshot at the configured location, if any.
    ///
    /// A missing snapshot leaves the pipeline `UNLOADED`; a corrupt one is an
    /// error rather than a silently empty index.
    #[inline]
    pub async fn restore_or_empty(&self) -> Result<usize> {
        let Some(location) = &self.settings.snapshot_location else {
            return Ok(0);
        };

        match self.index.restore(location).await {
            Ok(restored) => {
                let stage = if restored > 0 {
                    IngestStage::Ready
                } else {
                    IngestStage::Unloaded
                };
                self.set_stage(stage).await;
                Ok(restored)
            }
            Err(IndexError::Missing(path)) => {
                info!("No index snapshot at {}, starting empty", path.display());
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ingest every input, isolating failures per input.
    ///
    /// Ends `READY` when the index holds any records, `UNLOADED` otherwise.
    /// A model or dimension mismatch aborts the batch as a configuration
    /// error.
    #[inline]
    pub async fn ingest(&self, inputs: &[String]) -> Result<IngestReport> {
        let _guard = self.ingest_guard.lock().await;
        info!("Ingesting {} inputs", inputs.len());

        let mut reports = Vec::with_capacity(inputs.len());
        let mut total_chunks = 0;
        let mut outcome = Ok(());

        for input in inputs {
            let started = Instant::now();
            match self.ingest_one(input).await {
                Ok(mut report) => {
                    report.processing_time = started.elapsed().as_secs_f64();
                    total_chunks += report.chunks_created;
                    reports.push(report);
                }
                Err(IngestFailure::Input(mut report)) => {
                    report.processing_time = started.elapsed().as_secs_f64();
                    reports.push(report);
                }
                Err(IngestFailure::Fatal(e)) => {
                    error!("Aborting ingest: {}", e);
                    outcome = Err(e);
                    break;
                }
            }
        }

        let ready = self.is_ready().await;
        self.set_stage(if ready {
            IngestStage::Ready
        } else {
            IngestStage::Unloaded
        })
        .await;
        outcome?;

        let mut persist_error = None;
        if total_chunks > 0 && self.settings.autosave {
            if let Err(e) = self.persist().await {
                error!("Failed to persist index: {}", e);
                persist_error = Some(e.to_string());
            }
        }

        let stage = self.stage().await;
        info!(
            "Ingest finished: {} chunks added, stage {}",
            total_chunks, stage
        );

        Ok(IngestReport {
            inputs: reports,
            total_chunks,
            stage,
            persist_error,
        })
    }

    async fn ingest_one(&self, input: &str) -> std::result::Result<InputReport, IngestFailure> {
        self.set_stage(IngestStage::Loading).await;
        let documents = self.load(input).await.map_err(|e| {
            warn!("Skipping {}: {}", input, e);
            IngestFailure::Input(InputReport::failed(input, e))
        })?;

        self.set_stage(IngestStage::Splitting).await;
        let mut chunks: Vec<Chunk> = Vec::new();
        for document in &documents {
            let document_chunks = split_document(document, &self.settings.splitter)
                .map_err(|e| IngestFailure::Fatal(AkasError::Configuration(e.to_string())))?;
            chunks.extend(document_chunks);
        }
        debug!(
            "{}: {} documents split into {} chunks",
            input,
            documents.len(),
            chunks.len()
        );

        self.set_stage(IngestStage::Embedding).await;
        let added = self.index.add(chunks).await.map_err(|e| {
            if e.is_configuration() {
                IngestFailure::Fatal(AkasError::Configuration(e.to_string()))
            } else {
                IngestFailure::Input(InputReport::failed(input, e))
            }
        })?;

        if added.added == 0 {
            warn!("No chunks from {} could be embedded", input);
            let mut report = InputReport::failed(input, "no chunks could be embedded");
            report.documents = documents.len();
            report.chunks_skipped = added.skipped;
            return Err(IngestFailure::Input(report));
        }

        Ok(InputReport {
            input: input.to_string(),
            status: InputStatus::Processed,
            documents: documents.len(),
            chunks_created: added.added,
            chunks_skipped: added.skipped,
            error: None,
            processing_time: 0.0,
        })
    }

    async fn load(&self, input: &str) -> std::result::Result<Vec<Document>, String> {
        let loader = self.loader.clone();
        let owned = input.to_string();
        let documents = tokio::task::spawn_blocking(move || loader.load(&owned))
            .await
            .map_err(|e| format!("Loader task failed: {}", e))?
            .map_err(|e| e.to_string())?;

        if documents.is_empty() {
            return Err("no loadable documents".to_string());
        }
        Ok(documents)
    }

    /// Answer `question` from the top `k` chunks (default from settings).
    ///
    /// Fails fast with `NotReady` on an empty index. Any retrieval or
    /// generation failure fails the whole query.
    #[inline]
    pub async fn ask(
        &self,
        question: &str,
        k: Option<usize>,
        search_type: SearchType,
    ) -> Result<QueryAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AkasError::Input("question must not be empty".to_string()));
        }
        let k = k.unwrap_or(self.settings.default_k);
        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(AkasError::Input(format!(
                "max_results must be between {} and {}, got {}",
                MIN_K, MAX_K, k
            )));
        }
        if !self.is_ready().await {
            return Err(AkasError::NotReady(
                "no documents have been ingested yet".to_string(),
            ));
        }

        let started = Instant::now();
        let answer = tokio::time::timeout(
            self.settings.query_timeout,
            self.retrieve_and_answer(question, k, search_type),
        )
        .await
        .map_err(|_| {
            AkasError::Upstream(format!(
                "query timed out after {:?}",
                self.settings.query_timeout
            ))
        })??;

        let processing_time = started.elapsed().as_secs_f64();
        info!(
            "Answered query with {} sources in {:.3}s",
            answer.sources.len(),
            processing_time
        );

        Ok(QueryAnswer {
            processing_time,
            ..answer
        })
    }

    async fn retrieve_and_answer(
        &self,
        question: &str,
        k: usize,
        search_type: SearchType,
    ) -> Result<QueryAnswer> {
        let hits = self
            .index
            .search(question, k, search_type)
            .await
            .map_err(|e| match e {
                IndexError::Embedding(message) => AkasError::Upstream(message),
                e if e.is_configuration() => AkasError::Configuration(e.to_string()),
                e => AkasError::Index(e),
            })?;

        let synthesized = self
            .synthesizer
            .answer(question, &hits)
            .await
            .map_err(|SynthesisError::GenerationFailure { provider, message }| {
                AkasError::Upstream(format!("{}: {}", provider, message))
            })?;

        let sources = synthesized
            .used_chunks
            .iter()
            .map(|hit| SourceExcerpt {
                source: hit.chunk.source.clone(),
                excerpt: excerpt(&hit.chunk.text),
                chunk_index: hit.chunk.chunk_index,
                score: hit.score,
            })
            .collect();

        Ok(QueryAnswer {
            query_id: Uuid::new_v4(),
            question: question.to_string(),
            answer: synthesized.answer,
            sources,
            processing_time: 0.0,
            timestamp: Utc::now(),
        })
    }

    /// Write the index to the snapshot location, if one is configured
    #[inline]
    pub async fn persist(&self) -> Result<()> {
        if let Some(location) = &self.settings.snapshot_location {
            self.index.persist(location).await?;
        }
        Ok(())
    }

    /// Drop every record, delete the snapshot and return to `UNLOADED`
    #[inline]
    pub async fn reset_index(&self) -> Result<usize> {
        let _guard = self.ingest_guard.lock().await;
        let removed = self.index.reset().await;
        if let Some(location) = &self.settings.snapshot_location {
            snapshot::remove(location)?;
        }
        self.set_stage(IngestStage::Unloaded).await;
        Ok(removed)
    }
}

enum IngestFailure {
    /// This input failed; the batch continues
    Input(InputReport),
    /// The batch cannot continue
    Fatal(AkasError),
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    short.push_str("...");
    short
}
