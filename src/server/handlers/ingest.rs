use axum::Json;
use axum::extract::{Multipart, State};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::{IngestStage, InputReport, InputStatus};
use crate::server::errors::{ApiError, ApiJson};
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UrlIngestRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FileResult {
    pub filename: String,
    pub status: InputStatus,
    pub chunks_created: usize,
    /// Bytes received; 0 for fetched pages
    pub size: usize,
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub files: Vec<FileResult>,
    pub total_chunks: usize,
    pub stage: IngestStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_error: Option<String>,
}

/// Keep only the final path component and characters safe in a file name
fn sanitize_filename(raw: &str) -> String {
    let name = Path::new(raw)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload");
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn file_result(filename: String, size: usize, report: Option<&InputReport>) -> FileResult {
    match report {
        Some(report) => FileResult {
            filename,
            status: report.status,
            chunks_created: report.chunks_created,
            size,
            processing_time: report.processing_time,
            error: report.error.clone(),
        },
        None => FileResult {
            filename,
            status: InputStatus::Saved,
            chunks_created: 0,
            size,
            processing_time: 0.0,
            error: None,
        },
    }
}

struct StoredUpload {
    original: String,
    path: PathBuf,
    size: usize,
}

/// `POST /api/ingest/upload`: multipart files, saved then processed.
///
/// Processed files stay in the uploads directory; files that failed to
/// ingest are deleted again.
#[inline]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    tokio::fs::create_dir_all(&state.uploads_dir)
        .await
        .map_err(ApiError::internal)?;

    let mut stored: Vec<StoredUpload> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let Some(original) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", original, e)))?;

        let stored_name = format!("{}_{}", Uuid::new_v4(), sanitize_filename(&original));
        let path = state.uploads_dir.join(stored_name);
        tokio::fs::write(&path, &data)
            .await
            .map_err(ApiError::internal)?;
        info!("Saved upload {} ({} bytes) to {}", original, data.len(), path.display());
        stored.push(StoredUpload {
            original,
            path,
            size: data.len(),
        });
    }

    if stored.is_empty() {
        return Err(ApiError::BadRequest("No files were uploaded".to_string()));
    }

    let inputs: Vec<String> = stored
        .iter()
        .map(|upload| upload.path.display().to_string())
        .collect();
    let report = match state.pipeline.ingest(&inputs).await {
        Ok(report) => report,
        Err(e) => {
            for upload in &stored {
                discard(&upload.path).await;
            }
            return Err(e.into());
        }
    };

    let mut files = Vec::with_capacity(stored.len());
    for (upload, input) in stored.into_iter().zip(&inputs) {
        let input_report = report.inputs.iter().find(|r| &r.input == input);
        match input_report {
            Some(r) if r.status == InputStatus::Processed => {}
            Some(_) => discard(&upload.path).await,
            None => warn!("No ingest result for {}", upload.original),
        }
        files.push(file_result(upload.original, upload.size, input_report));
    }

    Ok(Json(IngestResponse {
        files,
        total_chunks: report.total_chunks,
        stage: report.stage,
        persist_error: report.persist_error,
    }))
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove upload {}: {}", path.display(), e);
    }
}

/// `POST /api/ingest/urls`: fetch and process web pages
#[inline]
pub async fn urls(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<UrlIngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let urls: Vec<String> = request
        .urls
        .iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();
    if urls.is_empty() {
        return Err(ApiError::BadRequest("No URLs were given".to_string()));
    }
    if let Some(bad) = urls
        .iter()
        .find(|url| !(url.starts_with("http://") || url.starts_with("https://")))
    {
        return Err(ApiError::BadRequest(format!("Not an http(s) URL: {}", bad)));
    }

    let report = state.pipeline.ingest(&urls).await?;
    let files = report
        .inputs
        .iter()
        .map(|r| file_result(r.input.clone(), 0, Some(r)))
        .collect();

    Ok(Json(IngestResponse {
        files,
        total_chunks: report.total_chunks,
        stage: report.stage,
        persist_error: report.persist_error,
    }))
}
