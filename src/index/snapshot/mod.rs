
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{EmbeddingRecord, IndexError, IndexMetadata};
use crate::ingest::{Chunk, FileType};

const MANIFEST_FILE: &str = "manifest.json";
const TABLE_NAME: &str = "records";
const FORMAT_VERSION: u32 = 1;

/// Commit marker of a snapshot, written after the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub model_id: Option<String>,
    pub dimension: usize,
    pub record_count: usize,
    pub written_at: DateTime<Utc>,
}

/// Read just the manifest, e.g. for status reporting
#[inline]
pub fn read_manifest(location: &Path) -> Result<Manifest, IndexError> {
    let path = location.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(IndexError::Missing(location.to_path_buf()));
    }

    let corrupt = |message: String| IndexError::Corrupt {
        path: location.to_path_buf(),
        message,
    };

    let raw = std::fs::read_to_string(&path).map_err(|e| corrupt(e.to_string()))?;
    let manifest: Manifest =
        serde_json::from_str(&raw).map_err(|e| corrupt(format!("Invalid manifest: {}", e)))?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "Unsupported snapshot format version {}",
            manifest.format_version
        )));
    }
    Ok(manifest)
}

/// Write `records` to a Lance table under `location`, then the manifest.
///
/// The previous manifest is removed first, so an interrupted write leaves a
/// location that restores as missing rather than half-written.
#[inline]
pub async fn write(
    location: &Path,
    metadata: Option<&IndexMetadata>,
    records: &[EmbeddingRecord],
) -> Result<(), IndexError> {
    std::fs::create_dir_all(location).map_err(|e| {
        IndexError::Storage(format!(
            "Failed to create snapshot directory {}: {}",
            location.display(),
            e
        ))
    })?;

    let manifest_path = location.join(MANIFEST_FILE);
    if manifest_path.exists() {
        std::fs::remove_file(&manifest_path)
            .map_err(|e| IndexError::Storage(format!("Failed to remove old manifest: {}", e)))?;
    }

    let connection = connect(location).await?;
    drop_table_if_exists(&connection).await?;

    let dimension = metadata.map_or(0, |m| m.dimension);
    if let Some(first) = records.first() {
        let schema = create_schema(dimension);
        let batch = create_record_batch(&schema, dimension, records)?;
        debug!(
            "Writing {} records ({} dims, first from {})",
            records.len(),
            dimension,
            first.chunk.source
        );

        let table = connection
            .create_empty_table(TABLE_NAME, Arc::clone(&schema))
            .execute()
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to create table: {}", e)))?;

        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to write records: {}", e)))?;
    }

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        model_id: metadata.map(|m| m.model_id.clone()),
        dimension,
        record_count: records.len(),
        written_at: Utc::now(),
    };
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| IndexError::Storage(format!("Failed to encode manifest: {}", e)))?;
    std::fs::write(&manifest_path, json)
        .map_err(|e| IndexError::Storage(format!("Failed to write manifest: {}", e)))?;

    info!(
        "Persisted {} records to {}",
        records.len(),
        location.display()
    );
    Ok(())
}

/// Read a snapshot back. A location without a manifest is `Missing`; any
/// inconsistency between manifest and table is `Corrupt`.
#[inline]
pub async fn read(
    location: &Path,
) -> Result<(Option<IndexMetadata>, Vec<EmbeddingRecord>), IndexError> {
    let manifest = read_manifest(location)?;
    let corrupt = |message: String| IndexError::Corrupt {
        path: location.to_path_buf(),
        message,
    };

    let metadata = match (&manifest.model_id, manifest.record_count) {
        (_, 0) => None,
        (Some(model_id), _) if manifest.dimension > 0 => Some(IndexMetadata {
            model_id: model_id.clone(),
            dimension: manifest.dimension,
        }),
        _ => {
            return Err(corrupt(
                "Manifest lists records but no model or dimension".to_string(),
            ));
        }
    };

    let Some(metadata) = metadata else {
        return Ok((None, Vec::new()));
    };

    let connection = connect(location).await.map_err(|e| corrupt(e.to_string()))?;
    let table = connection
        .open_table(TABLE_NAME)
        .execute()
        .await
        .map_err(|e| corrupt(format!("Failed to open table: {}", e)))?;

    let stored = table
        .count_rows(None)
        .await
        .map_err(|e| corrupt(format!("Failed to count rows: {}", e)))?;
    if stored != manifest.record_count {
        return Err(corrupt(format!(
            "Manifest lists {} records but table holds {}",
            manifest.record_count, stored
        )));
    }

    let mut stream = table
        .query()
        .execute()
        .await
        .map_err(|e| corrupt(format!("Failed to scan table: {}", e)))?;

    let mut rows = Vec::with_capacity(manifest.record_count);
    while let Some(batch) = stream
        .try_next()
        .await
        .map_err(|e| corrupt(format!("Failed to read table: {}", e)))?
    {
        rows.extend(parse_batch(&batch, metadata.dimension).map_err(corrupt)?);
    }

    if rows.len() != manifest.record_count {
        return Err(corrupt(format!(
            "Manifest lists {} records but scan returned {}",
            manifest.record_count,
            rows.len()
        )));
    }

    // Positions must be exactly 0..n
    rows.sort_by_key(|(position, _)| *position);
    if let Some((expected, (position, _))) = rows
        .iter()
        .enumerate()
        .find(|(expected, (position, _))| u64::try_from(*expected).ok() != Some(*position))
    {
        return Err(corrupt(format!(
            "Expected record position {} but found {}",
            expected, position
        )));
    }

    let records = rows.into_iter().map(|(_, record)| record).collect();

    debug!("Restored {} records from {}", manifest.record_count, location.display());
    Ok((Some(metadata), records))
}

/// Delete a snapshot directory if present
#[inline]
pub fn remove(location: &Path) -> Result<(), IndexError> {
    if location.exists() {
        std::fs::remove_dir_all(location).map_err(|e| {
            IndexError::Storage(format!(
                "Failed to remove snapshot {}: {}",
                location.display(),
                e
            ))
        })?;
        info!("Removed snapshot at {}", location.display());
    }
    Ok(())
}

async fn connect(location: &Path) -> Result<Connection, IndexError> {
    let uri = format!("file://{}", location.display());
    lancedb::connect(&uri)
        .execute()
        .await
        .map_err(|e| IndexError::Storage(format!("Failed to open LanceDB: {}", e)))
}

async fn drop_table_if_exists(connection: &Connection) -> Result<(), IndexError> {
    let table_names = connection
        .table_names()
        .execute()
        .await
        .map_err(|e| IndexError::Storage(format!("Failed to list tables: {}", e)))?;

    if table_names.iter().any(|name| name == TABLE_NAME) {
        connection
            .drop_table(TABLE_NAME)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to drop table: {}", e)))?;
    }
    Ok(())
}

fn create_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("position", DataType::UInt64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("text", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("file_type", DataType::Utf8, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("processed_at", DataType::Utf8, false),
    ]))
}

fn create_record_batch(
    schema: &Arc<Schema>,
    dimension: usize,
    records: &[EmbeddingRecord],
) -> Result<RecordBatch, IndexError> {
    let len = records.len();
    let mut positions = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * dimension);
    let mut texts = Vec::with_capacity(len);
    let mut sources = Vec::with_capacity(len);
    let mut file_types = Vec::with_capacity(len);
    let mut chunk_indices = Vec::with_capacity(len);
    let mut processed_ats = Vec::with_capacity(len);

    for (position, record) in records.iter().enumerate() {
        positions.push(position as u64);
        flat_values.extend_from_slice(&record.vector);
        texts.push(record.chunk.text.as_str());
        sources.push(record.chunk.source.as_str());
        file_types.push(record.chunk.file_type.as_str());
        chunk_indices.push(u32::try_from(record.chunk.chunk_index).unwrap_or(u32::MAX));
        processed_ats.push(record.chunk.processed_at.to_rfc3339());
    }

    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        dimension as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| IndexError::Storage(format!("Failed to create vector array: {}", e)))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(UInt64Array::from(positions)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(texts)),
        Arc::new(StringArray::from(sources)),
        Arc::new(StringArray::from(file_types)),
        Arc::new(UInt32Array::from(chunk_indices)),
        Arc::new(StringArray::from(processed_ats)),
    ];

    RecordBatch::try_new(Arc::clone(schema), arrays)
        .map_err(|e| IndexError::Storage(format!("Failed to create record batch: {}", e)))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, String> {
    batch
        .column_by_name(name)
        .ok_or_else(|| format!("Missing {} column", name))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("Invalid {} column type", name))
}

fn parse_batch(
    batch: &RecordBatch,
    dimension: usize,
) -> Result<Vec<(u64, EmbeddingRecord)>, String> {
    let positions = column::<UInt64Array>(batch, "position")?;
    let vectors = column::<FixedSizeListArray>(batch, "vector")?;
    let texts = column::<StringArray>(batch, "text")?;
    let sources = column::<StringArray>(batch, "source")?;
    let file_types = column::<StringArray>(batch, "file_type")?;
    let chunk_indices = column::<UInt32Array>(batch, "chunk_index")?;
    let processed_ats = column::<StringArray>(batch, "processed_at")?;

    if usize::try_from(vectors.value_length()).ok() != Some(dimension) {
        return Err(format!(
            "Vector column has {} dimensions, manifest says {}",
            vectors.value_length(),
            dimension
        ));
    }

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let values = vectors.value(row);
        let vector = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| "Invalid vector item type".to_string())?
            .values()
            .to_vec();

        let file_type = FileType::parse(file_types.value(row))
            .ok_or_else(|| format!("Unknown file type '{}'", file_types.value(row)))?;
        let processed_at = DateTime::parse_from_rfc3339(processed_ats.value(row))
            .map_err(|e| format!("Invalid timestamp: {}", e))?
            .with_timezone(&Utc);

        rows.push((
            positions.value(row),
            EmbeddingRecord {
                chunk: Chunk {
                    text: texts.value(row).to_string(),
                    source: sources.value(row).to_string(),
                    file_type,
                    processed_at,
                    chunk_index: chunk_indices.value(row) as usize,
                },
                vector,
            },
        ));
    }

    Ok(rows)
}
