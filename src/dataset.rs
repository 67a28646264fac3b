// 📦 Canonical Dataset File - category;cohort;country;region
//
// The file the dashboard reads. Written with a fixed column order and
// the same semicolon delimiter it is read back with.

use crate::diagnostics::{Diagnostic, DiagnosticReport};
use crate::error::PipelineError;
use crate::ingest::read_text;
use crate::records::{CanonicalRecord, Cohort, Region};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const CANONICAL_DELIMITER: u8 = b';';
pub const CANONICAL_HEADER: [&str; 4] = ["category", "cohort", "country", "region"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalDataset {
    pub source: String,
    pub records: Vec<CanonicalRecord>,
    pub diagnostics: DiagnosticReport,
}

// ============================================================================
// WRITING
// ============================================================================

/// Serialize records in canonical file format
pub fn to_canonical_bytes(records: &[CanonicalRecord]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(CANONICAL_DELIMITER)
        .from_writer(Vec::new());

    writer.write_record(CANONICAL_HEADER)?;
    for record in records {
        writer.write_record([
            record.category.as_str(),
            record.cohort.as_str(),
            record.country.as_str(),
            record.region.as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush canonical writer: {}", e))
}

/// Write the canonical file and return the SHA-256 of its bytes
pub fn write_canonical(path: &Path, records: &[CanonicalRecord]) -> Result<String> {
    let bytes = to_canonical_bytes(records).context("Failed to serialize canonical dataset")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| PipelineError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, &bytes).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let checksum = sha256_hex(&bytes);
    info!(path = %path.display(), records = records.len(), checksum = %checksum, "Canonical dataset written");
    Ok(checksum)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// READING
// ============================================================================

pub fn load_canonical(path: &Path) -> Result<CanonicalDataset> {
    let content = read_text(path)?;
    parse_canonical(&content, path)
}

/// Parse canonical file text. Bad rows (wrong width, unknown region label)
/// are reported and skipped.
pub fn parse_canonical(content: &str, source: &Path) -> Result<CanonicalDataset> {
    let source_name = source.display().to_string();

    if content.trim().is_empty() {
        return Err(PipelineError::EmptyFile {
            path: source.to_path_buf(),
        }
        .into());
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(CANONICAL_DELIMITER)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", source_name))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let mut indices = [0usize; 4];
    for (slot, column) in CANONICAL_HEADER.into_iter().enumerate() {
        indices[slot] = headers.iter().position(|h| h == column).ok_or_else(|| {
            PipelineError::MissingColumn {
                path: source.to_path_buf(),
                column,
            }
        })?;
    }

    let mut records = Vec::new();
    let mut diagnostics = DiagnosticReport::new();

    for (row_num, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                diagnostics.push(Diagnostic::MalformedInput {
                    source: source_name.clone(),
                    line: row_num + 2,
                    reason: e.to_string(),
                    raw: String::new(),
                });
                continue;
            }
        };
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(row_num + 2);
        let raw = record.iter().collect::<Vec<_>>().join(";");

        if record.len() != headers.len() {
            diagnostics.push(Diagnostic::MalformedInput {
                source: source_name.clone(),
                line,
                reason: format!("expected {} fields, found {}", headers.len(), record.len()),
                raw,
            });
            continue;
        }

        let field = |slot: usize| record.get(indices[slot]).unwrap_or("");
        let region = match field(3).parse::<Region>() {
            Ok(region) => region,
            Err(reason) => {
                diagnostics.push(Diagnostic::MalformedInput {
                    source: source_name.clone(),
                    line,
                    reason,
                    raw,
                });
                continue;
            }
        };

        records.push(CanonicalRecord {
            category: field(0).to_string(),
            cohort: Cohort::new(field(1)),
            country: field(2).to_string(),
            region,
        });
    }

    if !diagnostics.is_empty() {
        warn!(source = %source_name, malformed = diagnostics.len(), "Malformed canonical rows skipped");
    }

    Ok(CanonicalDataset {
        source: source_name,
        records,
        diagnostics,
    })
}

// ============================================================================
// TESTS
// ============================================================================
