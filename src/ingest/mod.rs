// Ingestion module
// Turns files and URLs into documents, and documents into overlapping chunks

pub mod loader;
pub mod splitter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use loader::{DocumentLoader, LoadError};
pub use splitter::{SplitError, SplitterConfig, split, split_document};

/// Format tag recorded on every document for provenance display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Text,
    Markdown,
    Html,
    Docx,
    Spreadsheet,
    Csv,
    Web,
}

impl FileType {
    /// Map a file extension (without the dot, any case) to a format
    #[inline]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "text" | "log" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "docx" => Some(Self::Docx),
            "xlsx" | "xls" | "ods" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    /// Inverse of [`FileType::as_str`]
    #[inline]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "pdf" => Some(Self::Pdf),
            "text" => Some(Self::Text),
            "markdown" => Some(Self::Markdown),
            "html" => Some(Self::Html),
            "docx" => Some(Self::Docx),
            "spreadsheet" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "web" => Some(Self::Web),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Docx => "docx",
            Self::Spreadsheet => "spreadsheet",
            Self::Csv => "csv",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for FileType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of ingested content, immutable once loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    /// File path or URL the text came from
    pub source: String,
    pub ingested_at: DateTime<Utc>,
    pub file_type: FileType,
}

impl Document {
    #[inline]
    pub fn new(text: String, source: impl Into<String>, file_type: FileType) -> Self {
        Self {
            text,
            source: source.into(),
            ingested_at: Utc::now(),
            file_type,
        }
    }
}

/// Atomic retrieval unit: a window of a document's text plus its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub file_type: FileType,
    pub processed_at: DateTime<Utc>,
    /// Position of this chunk within its document
    pub chunk_index: usize,
}
