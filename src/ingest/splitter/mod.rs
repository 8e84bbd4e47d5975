
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{Chunk, Document};

const MAX_CHUNK_SIZE: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("Invalid chunk size: {0} (must be between 1 and {MAX_CHUNK_SIZE})")]
    InvalidChunkSize(usize),
    #[error("Overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { overlap: usize, chunk_size: usize },
}

/// Window parameters, measured in characters (Unicode scalar values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for SplitterConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

impl SplitterConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(SplitError::InvalidChunkSize(self.chunk_size));
        }
        if self.overlap >= self.chunk_size {
            return Err(SplitError::OverlapTooLarge {
                overlap: self.overlap,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }
}

/// Split `text` into windows of `chunk_size` characters where every window
/// after the first repeats the last `overlap` characters of its predecessor.
///
/// Split points ignore word boundaries. The final window may be shorter than
/// `chunk_size`; empty input yields no windows.
#[inline]
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, SplitError> {
    SplitterConfig {
        chunk_size,
        overlap,
    }
    .validate()?;

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut windows = Vec::new();
    if total == 0 {
        return Ok(windows);
    }

    let step = chunk_size - overlap;
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(total);
        windows.push(chars[start..end].iter().collect());
        if end == total {
            break;
        }
        start += step;
    }

    Ok(windows)
}

/// Split a document into chunks carrying its provenance
#[inline]
pub fn split_document(
    document: &Document,
    config: &SplitterConfig,
) -> Result<Vec<Chunk>, SplitError> {
    let processed_at = Utc::now();
    let chunks: Vec<Chunk> = split(&document.text, config.chunk_size, config.overlap)?
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| Chunk {
            text,
            source: document.source.clone(),
            file_type: document.file_type,
            processed_at,
            chunk_index,
        })
        .collect();

    debug!(
        "Split '{}' ({} chars) into {} chunks",
        document.source,
        document.text.chars().count(),
        chunks.len()
    );

    Ok(chunks)
}
