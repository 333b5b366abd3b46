use crate::domain::model::{RawBatch, RawRecord};
use crate::utils::error::{EtlError, Result};
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reads a delimited sales file into a [`RawBatch`]. Values stay as text;
/// typing and validation belong to the transformer.
#[derive(Debug, Clone)]
pub struct Extractor {
    delimiter: u8,
    timeout: Duration,
}

impl Extractor {
    pub fn new(delimiter: u8, timeout: Duration) -> Self {
        Self { delimiter, timeout }
    }

    pub async fn extract(&self, path: &Path) -> Result<RawBatch> {
        tracing::debug!("Reading source file: {}", path.display());

        let bytes = self.read_source(path, tokio::fs::read(path)).await?;
        let batch = parse_delimited(&bytes, self.delimiter)?;
        tracing::info!(rows = batch.len(), "Extracted {} rows from {}", batch.len(), path.display());
        Ok(batch)
    }

    async fn read_source<F>(&self, path: &Path, read: F) -> Result<Vec<u8>>
    where
        F: Future<Output = std::io::Result<Vec<u8>>>,
    {
        match tokio::time::timeout(self.timeout, read).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(EtlError::SourceUnavailable {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(EtlError::SourceUnavailable {
                path: path.display().to_string(),
                reason: format!("read timed out after {:?}", self.timeout),
            }),
        }
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(b',', Duration::from_secs(30))
    }
}

/// Parses header + rows. A zero-length (or whitespace-only) input is an
/// empty batch, not an error.
pub fn parse_delimited(bytes: &[u8], delimiter: u8) -> Result<RawBatch> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(RawBatch::default());
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(malformed)?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    let mut seen = HashSet::new();
    for column in &columns {
        if column.is_empty() {
            return Err(EtlError::SourceMalformed {
                line: Some(1),
                reason: "header contains an empty column name".to_string(),
            });
        }
        if !seen.insert(column.as_str()) {
            return Err(EtlError::SourceMalformed {
                line: Some(1),
                reason: format!("header repeats column '{}'", column),
            });
        }
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(malformed)?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        records.push(RawRecord {
            line,
            fields: row.iter().map(str::to_string).collect(),
        });
    }

    Ok(RawBatch { columns, records })
}

fn malformed(err: csv::Error) -> EtlError {
    let line = err.position().map(|p| p.line());
    let reason = match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {} fields, found {}", expected_len, len),
        csv::ErrorKind::Utf8 { .. } => "content is not valid UTF-8".to_string(),
        _ => err.to_string(),
    };
    EtlError::SourceMalformed { line, reason }
}
