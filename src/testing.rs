// Deterministic in-process providers for unit tests, so the pipeline runs
// without any network service

use anyhow::Result;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::providers::{CompletionRequest, EmbeddingProvider, LlmProvider};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn fnv1a(word: &str) -> u64 {
    word.bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
}

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// `dimension` buckets and the counts are L2-normalized. Texts sharing words
/// score high under cosine similarity.
#[derive(Debug)]
pub struct HashEmbedder {
    model_id: String,
    dimension: usize,
    fail_marker: Option<String>,
    calls: AtomicUsize,
}

impl HashEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: format!("hash/bow-{}", dimension),
            dimension,
            fail_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn with_model_id(mut self, model_id: &str) -> Self {
        self.model_id = model_id.to_string();
        self
    }

    /// Fail any call whose input contains `marker`
    #[inline]
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    /// Number of `embed` calls made so far
    #[inline]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let bucket = (fnv1a(&word.to_lowercase()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|text| text.contains(marker.as_str())) {
                return Err(anyhow::anyhow!("embedding refused input containing {marker:?}"));
            }
        }
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

/// Answers with the first context passage of the prompt, cited as `[1]`.
/// Every request is recorded for inspection.
#[derive(Debug, Default)]
pub struct EchoLlm {
    requests: Mutex<Vec<CompletionRequest>>,
}

impl EchoLlm {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl LlmProvider for EchoLlm {
    fn name(&self) -> &str {
        "echo"
    }

    fn model_id(&self) -> &str {
        "echo/first-passage"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let mut lines = request.prompt.lines();
        let found = lines.by_ref().any(|line| line.starts_with("[1]"));
        if !found {
            return Ok("I don't know based on the provided documents.".to_string());
        }

        let passage: Vec<&str> = lines.take_while(|line| !line.trim().is_empty()).collect();
        Ok(format!("{} [1]", passage.join(" ").trim()))
    }
}

/// Always fails, as an unreachable or overloaded LLM would
#[derive(Debug, Default)]
pub struct FailingLlm;

impl LlmProvider for FailingLlm {
    fn name(&self) -> &str {
        "failing"
    }

    fn model_id(&self) -> &str {
        "failing/none"
    }

    fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Err(anyhow::anyhow!("LLM endpoint unavailable"))
    }
}
