// 📥 Raw Export Ingestion - Read a yearly export into RawRecords
//
// Yearly exports are not consistent: the 2025 file ships a semicolon
// header over comma-separated rows. The delimiter is detected separately
// for the header and the body, and the header is rewritten to match the
// body before the CSV reader ever sees it.

use crate::diagnostics::{Diagnostic, DiagnosticReport};
use crate::error::PipelineError;
use crate::records::RawRecord;
use anyhow::Result;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Delimiters we are willing to detect, in tie-break order
pub const CANDIDATE_DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Data rows sampled when guessing the body delimiter
const DELIMITER_SAMPLE_ROWS: usize = 5;

// ============================================================================
// RAW EXPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExport {
    pub source: String,
    pub records: Vec<RawRecord>,

    /// Delimiter used by the data rows
    pub delimiter: char,

    /// True when the header delimiter differed and was rewritten
    pub header_repaired: bool,

    /// Data rows seen, including malformed ones
    pub total_rows: usize,

    pub diagnostics: DiagnosticReport,
}

impl RawExport {
    pub fn malformed_count(&self) -> usize {
        self.diagnostics.of_kind("MalformedInput").len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} rows read, {} parsed, {} malformed (delimiter '{}'{})",
            self.source,
            self.total_rows,
            self.records.len(),
            self.malformed_count(),
            self.delimiter.escape_default(),
            if self.header_repaired {
                ", header repaired"
            } else {
                ""
            }
        )
    }
}

// ============================================================================
// FILE READING
// ============================================================================

/// Read a whole file as UTF-8, stripping a leading BOM.
/// A file that is not UTF-8 is a hard failure.
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let text = String::from_utf8(bytes).map_err(|e| PipelineError::Encoding {
        path: path.to_path_buf(),
        offset: e.utf8_error().valid_up_to(),
    })?;

    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

/// Pick the candidate delimiter that occurs most often outside quotes
pub fn detect_delimiter(line: &str) -> Option<u8> {
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;

    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(idx) = CANDIDATE_DELIMITERS.iter().position(|d| *d == byte) {
            counts[idx] += 1;
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (idx, count) in counts.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        match best {
            Some((_, best_count)) if best_count >= *count => {}
            _ => best = Some((idx, *count)),
        }
    }

    best.map(|(idx, _)| CANDIDATE_DELIMITERS[idx])
}

/// Most common delimiter across the sampled rows; ties go to the one seen first
fn majority_delimiter<'a>(rows: impl Iterator<Item = &'a str>) -> Option<u8> {
    let mut votes: Vec<(u8, usize)> = Vec::new();
    for delim in rows.filter_map(detect_delimiter) {
        match votes.iter_mut().find(|(d, _)| *d == delim) {
            Some((_, count)) => *count += 1,
            None => votes.push((delim, 1)),
        }
    }

    let mut best: Option<(u8, usize)> = None;
    for (delim, count) in votes {
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((delim, count)),
        }
    }
    best.map(|(delim, _)| delim)
}

/// Rewrite the header line to use the body's delimiter.
/// Returns (content, body delimiter, whether the header changed).
pub fn repair_header(content: &str) -> (String, u8, bool) {
    let (header, body) = match content.find('\n') {
        Some(pos) => (&content[..pos], &content[pos..]),
        None => (content, ""),
    };

    let header_delim = detect_delimiter(header.trim_end_matches('\r'));
    let body_delim = majority_delimiter(
        body.lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .take(DELIMITER_SAMPLE_ROWS),
    );

    match (header_delim, body_delim) {
        (Some(h), Some(b)) if h != b => {
            let fixed = header.replace(h as char, &(b as char).to_string());
            (format!("{}{}", fixed, body), b, true)
        }
        (_, Some(b)) => (content.to_string(), b, false),
        (Some(h), None) => (content.to_string(), h, false),
        (None, None) => (content.to_string(), b';', false),
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Load and parse a raw export file
pub fn load_raw_export(path: &Path) -> Result<RawExport> {
    let content = read_text(path)?;
    parse_raw_export(&content, path)
}

/// Parse raw export text. Rows with the wrong column count are reported
/// as MalformedInput and skipped; they never abort the run.
pub fn parse_raw_export(content: &str, source: &Path) -> Result<RawExport> {
    let source_name = source.display().to_string();

    if content.trim().is_empty() {
        return Err(PipelineError::EmptyFile {
            path: source.to_path_buf(),
        }
        .into());
    }

    let (repaired, delimiter, header_repaired) = repair_header(content);
    if header_repaired {
        info!(source = %source_name, delimiter = %(delimiter as char), "Header delimiter repaired");
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(repaired.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| anyhow::anyhow!("Failed to read header of {}: {}", source_name, e))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let index_of = |column: &'static str| -> std::result::Result<usize, PipelineError> {
        headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| PipelineError::MissingColumn {
                path: source.to_path_buf(),
                column,
            })
    };
    let category_idx = index_of("category")?;
    let cohort_idx = index_of("cohort")?;
    let country_idx = index_of("country")?;

    let mut records = Vec::new();
    let mut diagnostics = DiagnosticReport::new();
    let mut total_rows = 0;

    for (row_num, result) in reader.records().enumerate() {
        total_rows += 1;
        // +2 because: 1-indexed + header row
        let fallback_line = row_num + 2;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                diagnostics.push(Diagnostic::MalformedInput {
                    source: source_name.clone(),
                    line,
                    reason: e.to_string(),
                    raw: String::new(),
                });
                continue;
            }
        };

        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(fallback_line);

        if record.len() != headers.len() {
            let raw = record
                .iter()
                .collect::<Vec<_>>()
                .join(&(delimiter as char).to_string());
            debug!(line, fields = record.len(), "Malformed raw row");
            diagnostics.push(Diagnostic::MalformedInput {
                source: source_name.clone(),
                line,
                reason: format!(
                    "expected {} fields, found {}",
                    headers.len(),
                    record.len()
                ),
                raw,
            });
            continue;
        }

        let field = |idx: usize| record.get(idx).unwrap_or("");
        records.push(
            RawRecord::new(field(category_idx), field(cohort_idx), field(country_idx))
                .at_line(line),
        );
    }

    let export = RawExport {
        source: source_name,
        records,
        delimiter: delimiter as char,
        header_repaired,
        total_rows,
        diagnostics,
    };

    if export.malformed_count() > 0 {
        warn!(malformed = export.malformed_count(), source = %export.source, "Malformed rows skipped");
    }
    info!("{}", export.summary());

    Ok(export)
}

// ============================================================================
// TESTS
// ============================================================================
