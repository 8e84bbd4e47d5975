#[cfg(test)]
mod tests;

use fancy_regex::Regex;
use itertools::Itertools;
use pulldown_cmark::{Event, Parser, TagEnd};
use scraper::{Html, Selector};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{Document, FileType};

const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 30;

static DOCX_TEXT_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>").expect("docx run pattern is valid")
});

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unsupported input: {0}")]
    Unsupported(String),
    #[error("Failed to read {source_name}: {message}")]
    Unreadable {
        source_name: String,
        message: String,
    },
    #[error("No text could be extracted from {0}")]
    Empty(String),
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
}

/// Format-dispatching loader for local files, directories and web pages
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    agent: ureq::Agent,
}

impl Default for DocumentLoader {
    #[inline]
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS))
    }
}

impl DocumentLoader {
    #[inline]
    pub fn new(fetch_timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(fetch_timeout))
            .build()
            .into();
        Self { agent }
    }

    /// Load a path or an `http(s)` URL.
    ///
    /// Directories are expanded one level deep; files inside them that fail to
    /// load are skipped with a warning so one bad file cannot sink the rest.
    #[inline]
    pub fn load(&self, input: &str) -> Result<Vec<Document>, LoadError> {
        if let Ok(url) = Url::parse(input) {
            match url.scheme() {
                "http" | "https" => return self.load_url(&url).map(|doc| vec![doc]),
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|()| LoadError::Unsupported(input.to_string()))?;
                    return self.load_path(&path);
                }
                // Windows drive letters parse as a one-letter scheme
                scheme if scheme.len() > 1 => {
                    return Err(LoadError::Unsupported(format!(
                        "{} (scheme '{}')",
                        input, scheme
                    )));
                }
                _ => {}
            }
        }

        self.load_path(Path::new(input))
    }

    #[inline]
    pub fn load_path(&self, path: &Path) -> Result<Vec<Document>, LoadError> {
        if path.is_dir() {
            return Ok(self.load_directory(path));
        }
        load_file(path).map(|doc| vec![doc])
    }

    fn load_directory(&self, dir: &Path) -> Vec<Document> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .sorted()
            .collect();

        let mut documents = Vec::with_capacity(files.len());
        for file in files {
            match load_file(&file) {
                Ok(doc) => documents.push(doc),
                Err(e) => warn!("Skipping {}: {}", file.display(), e),
            }
        }

        info!(
            "Loaded {} documents from directory {}",
            documents.len(),
            dir.display()
        );
        documents
    }

    /// Fetch a web page and extract its readable text
    #[inline]
    pub fn load_url(&self, url: &Url) -> Result<Document, LoadError> {
        debug!("Fetching {}", url);

        let fetch_error = |message: String| LoadError::Fetch {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|e| fetch_error(e.to_string()))?;

        let is_plain_text = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/plain"));

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| fetch_error(e.to_string()))?;

        let text = if is_plain_text {
            body
        } else {
            html_to_text(&body)
        };

        non_empty(Document::new(text, url.as_str(), FileType::Web))
    }
}

/// Load one file, dispatching on its extension
#[inline]
pub fn load_file(path: &Path) -> Result<Document, LoadError> {
    let source = path.display().to_string();
    let file_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(FileType::from_extension)
        .ok_or_else(|| LoadError::Unsupported(source.clone()))?;

    let unreadable = |message: String| LoadError::Unreadable {
        source_name: source.clone(),
        message,
    };

    let text = match file_type {
        FileType::Text | FileType::Csv => {
            fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?
        }
        FileType::Markdown => {
            let markdown = fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
            markdown_to_text(&markdown)
        }
        FileType::Html => {
            let html = fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
            html_to_text(&html)
        }
        FileType::Pdf => pdf_extract::extract_text(path).map_err(|e| unreadable(e.to_string()))?,
        FileType::Docx => docx_to_text(path).map_err(unreadable)?,
        FileType::Spreadsheet => spreadsheet_to_text(path).map_err(unreadable)?,
        FileType::Web => return Err(LoadError::Unsupported(source)),
    };

    debug!(
        "Loaded {} ({}, {} chars)",
        source,
        file_type,
        text.chars().count()
    );

    non_empty(Document::new(text, source, file_type))
}

fn non_empty(document: Document) -> Result<Document, LoadError> {
    if document.text.trim().is_empty() {
        Err(LoadError::Empty(document.source))
    } else {
        Ok(document)
    }
}

/// Render markdown to plain text, one line per block
fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            Event::End(
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::CodeBlock,
            ) => text.push('\n'),
            _ => {}
        }
    }
    text.trim().to_string()
}

/// Visible text of an HTML page, skipping script, style and head content
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();

    if let Ok(selector) = Selector::parse("title") {
        if let Some(title) = document.select(&selector).next() {
            let title = title.text().collect::<String>();
            if !title.trim().is_empty() {
                lines.push(title.split_whitespace().join(" "));
            }
        }
    }

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor.value().as_element().is_some_and(|element| {
                matches!(
                    element.name(),
                    "script" | "style" | "noscript" | "head" | "template"
                )
            })
        });
        if hidden {
            continue;
        }
        let line = text.split_whitespace().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }

    lines.join("\n")
}

fn docx_to_text(path: &Path) -> Result<String, String> {
    let file = fs::File::open(path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    let mut paragraphs = Vec::new();
    for paragraph in xml.split("</w:p>") {
        let mut line = String::new();
        for captures in DOCX_TEXT_RUN.captures_iter(paragraph) {
            let captures = captures.map_err(|e| e.to_string())?;
            match captures.get(1) {
                Some(run) => line.push_str(&unescape_xml(run.as_str())),
                None => line.push('\t'),
            }
        }
        if !line.trim().is_empty() {
            paragraphs.push(line);
        }
    }

    Ok(paragraphs.join("\n"))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// One line per row, cells tab-separated, each sheet introduced by its name
fn spreadsheet_to_text(path: &Path) -> Result<String, String> {
    use calamine::Reader;

    let mut workbook = calamine::open_workbook_auto(path).map_err(|e| e.to_string())?;
    let mut text = String::new();

    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| e.to_string())?;
        text.push_str(&name);
        text.push('\n');
        for row in range.rows() {
            let line = row.iter().map(ToString::to_string).join("\t");
            if !line.trim().is_empty() {
                text.push_str(&line);
                text.push('\n');
            }
        }
    }

    Ok(text)
}
