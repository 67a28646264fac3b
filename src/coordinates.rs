// 📍 Coordinate Reference Table - country;latitud;longitud
//
// One entry per country; the country name is the join key. A file with
// two rows for the same country is rejected outright: picking one of
// them silently would put a marker somewhere nobody chose.

use crate::diagnostics::{Diagnostic, DiagnosticReport};
use crate::error::PipelineError;
use crate::ingest::read_text;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const COORDINATE_DELIMITER: u8 = b';';
pub const COORDINATE_HEADER: [&str; 3] = ["country", "latitud", "longitud"];

// ============================================================================
// COORDINATE ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateEntry {
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl CoordinateEntry {
    pub fn new(country: &str, latitude: f64, longitude: f64) -> Self {
        CoordinateEntry {
            country: country.trim().to_string(),
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_position(self.latitude, self.longitude)
    }
}

/// Decimal degrees within the usual bounds
pub fn is_valid_position(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

// ============================================================================
// COORDINATE TABLE
// ============================================================================

/// Country → coordinates, unique by country, iterated in name order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinateTable {
    entries: BTreeMap<String, CoordinateEntry>,
}

impl CoordinateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, failing on the first duplicate country
    pub fn from_entries(entries: Vec<CoordinateEntry>) -> std::result::Result<Self, PipelineError> {
        let mut table = CoordinateTable::new();
        let mut seen_at: BTreeMap<String, usize> = BTreeMap::new();

        for (idx, entry) in entries.into_iter().enumerate() {
            if let Some(first) = seen_at.get(&entry.country) {
                return Err(PipelineError::DuplicateCoordinateKey {
                    country: entry.country,
                    first_line: *first,
                    second_line: idx + 1,
                });
            }
            seen_at.insert(entry.country.clone(), idx + 1);
            table.entries.insert(entry.country.clone(), entry);
        }

        Ok(table)
    }

    pub fn get(&self, country: &str) -> Option<&CoordinateEntry> {
        self.entries.get(country)
    }

    pub fn contains(&self, country: &str) -> bool {
        self.entries.contains_key(country)
    }

    /// Add an entry for a country not yet present. Existing entries are
    /// never replaced; returns false when the country is already there.
    pub fn insert_new(&mut self, entry: CoordinateEntry) -> bool {
        if self.entries.contains_key(&entry.country) {
            return false;
        }
        self.entries.insert(entry.country.clone(), entry);
        true
    }

    pub fn countries(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|c| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoordinateEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// FILE I/O
// ============================================================================

#[derive(Debug, Clone)]
pub struct LoadedCoordinates {
    pub table: CoordinateTable,

    /// Countries named by rows that could not be parsed. They have a row
    /// in the file, so they are not free to be filled in.
    pub malformed_countries: BTreeSet<String>,

    pub diagnostics: DiagnosticReport,
}

impl LoadedCoordinates {
    /// Saving this table would drop the unparseable rows from the file
    pub fn has_malformed_rows(&self) -> bool {
        !self.diagnostics.of_kind("MalformedInput").is_empty()
    }
}

pub fn load_coordinates(path: &Path) -> Result<LoadedCoordinates> {
    let content = read_text(path)?;
    parse_coordinates(&content, path)
}

/// Parse a coordinate file. Unparseable rows are reported and skipped;
/// a duplicated country aborts with DuplicateCoordinateKey.
pub fn parse_coordinates(content: &str, source: &Path) -> Result<LoadedCoordinates> {
    let source_name = source.display().to_string();

    if content.trim().is_empty() {
        return Err(PipelineError::EmptyFile {
            path: source.to_path_buf(),
        }
        .into());
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(COORDINATE_DELIMITER)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", source_name))?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    let mut indices = [0usize; 3];
    for (slot, column) in COORDINATE_HEADER.into_iter().enumerate() {
        indices[slot] = headers.iter().position(|h| h == column).ok_or_else(|| {
            PipelineError::MissingColumn {
                path: source.to_path_buf(),
                column,
            }
        })?;
    }

    let mut table = CoordinateTable::new();
    let mut first_seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut malformed_countries = BTreeSet::new();
    let mut diagnostics = DiagnosticReport::new();

    for (row_num, result) in reader.records().enumerate() {
        let record = result
            .with_context(|| format!("Failed to read line {} of {}", row_num + 2, source_name))?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(row_num + 2);
        let raw = record.iter().collect::<Vec<_>>().join(";");

        let malformed = |reason: String| Diagnostic::MalformedInput {
            source: source_name.clone(),
            line,
            reason,
            raw: raw.clone(),
        };

        let field = |slot: usize| record.get(indices[slot]).unwrap_or("");
        let country = field(0);

        if record.len() != headers.len() {
            if !country.is_empty() {
                malformed_countries.insert(country.to_string());
            }
            diagnostics.push(malformed(format!(
                "expected {} fields, found {}",
                headers.len(),
                record.len()
            )));
            continue;
        }

        if country.is_empty() {
            diagnostics.push(malformed("country is empty".to_string()));
            continue;
        }

        let position = field(1)
            .parse::<f64>()
            .ok()
            .zip(field(2).parse::<f64>().ok())
            .filter(|(lat, lon)| is_valid_position(*lat, *lon));
        let (latitude, longitude) = match position {
            Some(position) => position,
            None => {
                malformed_countries.insert(country.to_string());
                diagnostics.push(malformed(format!(
                    "invalid coordinates '{}', '{}'",
                    field(1),
                    field(2)
                )));
                continue;
            }
        };

        if let Some(first_line) = first_seen.get(country) {
            return Err(PipelineError::DuplicateCoordinateKey {
                country: country.to_string(),
                first_line: *first_line,
                second_line: line,
            }
            .into());
        }
        first_seen.insert(country.to_string(), line);
        table.insert_new(CoordinateEntry::new(country, latitude, longitude));
    }

    if !diagnostics.is_empty() {
        warn!(source = %source_name, malformed = diagnostics.len(), "Malformed coordinate rows skipped");
    }
    info!(source = %source_name, countries = table.len(), "Coordinate table loaded");

    Ok(LoadedCoordinates {
        table,
        malformed_countries,
        diagnostics,
    })
}

/// Serialize the table sorted by country
pub fn to_coordinate_bytes(table: &CoordinateTable) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(COORDINATE_DELIMITER)
        .from_writer(Vec::new());

    writer.write_record(COORDINATE_HEADER)?;
    for entry in table.iter() {
        writer.write_record([
            entry.country.clone(),
            entry.latitude.to_string(),
            entry.longitude.to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush coordinate writer: {}", e))
}

pub fn save_coordinates(path: &Path, table: &CoordinateTable) -> Result<()> {
    let bytes = to_coordinate_bytes(table).context("Failed to serialize coordinate table")?;
    fs::write(path, bytes).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), countries = table.len(), "Coordinate table saved");
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
