// 🔄 Pipeline - Raw export to publishable dataset, end to end
//
//   1. ingest + normalize the yearly export
//   2. write the canonical dataset (checksummed)
//   3. reconcile member counts against coordinates, augmenting from the
//      manual coordinate file until nothing more can be resolved
//   4. verify the dataset and apply the publish gate
//
// Each stage is callable on its own so the CLI can run one step at a time.

use crate::augment::{load_manual_coordinates, resolve_coordinates, CoordinateAugmenter};
use crate::config::PipelineConfig;
use crate::coordinates::{load_coordinates, save_coordinates, CoordinateEntry};
use crate::dataset::{load_canonical, write_canonical, CanonicalDataset};
use crate::diagnostics::DiagnosticReport;
use crate::ingest::load_raw_export;
use crate::mappings::MappingTables;
use crate::normalizer::Normalizer;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::records::CanonicalRecord;
use crate::verifier::{GateDecision, VerificationReport, Verifier};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// STAGE REPORTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct NormalizeStage {
    pub source: String,
    pub delimiter: char,
    pub header_repaired: bool,
    pub rows_read: usize,
    pub malformed_rows: usize,
    pub input_records: usize,
    pub output_records: usize,
    pub dropped_invalid: BTreeMap<String, usize>,
    pub unknown_regions: BTreeMap<String, usize>,
    pub unmapped_countries: BTreeMap<String, usize>,
    pub unmapped_categories: BTreeMap<String, usize>,
    pub canonical_path: PathBuf,
    pub canonical_sha256: String,
    pub diagnostics: DiagnosticReport,

    #[serde(skip)]
    pub records: Vec<CanonicalRecord>,
}

impl NormalizeStage {
    pub fn summary(&self) -> String {
        format!(
            "{} rows read ({} malformed) → {} canonical records, {} dropped as invalid, {} unknown-region countries",
            self.rows_read,
            self.malformed_rows,
            self.output_records,
            self.dropped_invalid.values().sum::<usize>(),
            self.unknown_regions.len()
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinateStage {
    pub coordinates_path: PathBuf,
    pub loaded_countries: usize,

    /// Final reconciliation (after augmentation, if any)
    pub reconciliation: ReconciliationReport,

    pub augmented: bool,
    pub added: Vec<CoordinateEntry>,
    pub needs_manual_resolution: Vec<String>,
    pub rounds: usize,

    /// Where the augmented table was written, if it changed
    pub saved_to: Option<PathBuf>,

    /// Additions were not saved because the coordinate file has rows that
    /// could not be parsed (saving would drop them)
    pub save_refused: bool,

    pub diagnostics: DiagnosticReport,
}

impl CoordinateStage {
    pub fn summary(&self) -> String {
        format!(
            "{} coordinate entries loaded, {} added in {} round(s), {} still missing, {} need manual resolution",
            self.loaded_countries,
            self.added.len(),
            self.rounds,
            self.reconciliation.missing_coordinates.len(),
            self.needs_manual_resolution.len()
        )
    }
}

// ============================================================================
// PIPELINE REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tool_version: String,
    pub mapping_version: String,
    pub mapping_fingerprint: String,
    pub normalize: NormalizeStage,
    pub coordinates: CoordinateStage,
    pub verification: VerificationReport,
    pub gate: GateDecision,
}

impl PipelineReport {
    pub fn passed(&self) -> bool {
        self.gate.passed
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize pipeline report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write pipeline report: {:?}", path))?;
        info!(path = %path.display(), run_id = %self.run_id, "Pipeline report written");
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "run {} | mappings {} | {} | {} | gate {}",
            self.run_id,
            self.mapping_version,
            self.normalize.summary(),
            self.coordinates.summary(),
            if self.gate.passed { "passed" } else { "FAILED" }
        )
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    tables: MappingTables,
}

impl<'a> Pipeline<'a> {
    /// Load the mapping tables named by the config (or the built-in ones)
    pub fn new(config: &'a PipelineConfig) -> Result<Self> {
        let tables = config.load_mappings()?;
        info!(version = %tables.version, "{}", tables.summary());
        Ok(Pipeline { config, tables })
    }

    pub fn with_tables(config: &'a PipelineConfig, tables: MappingTables) -> Self {
        Pipeline { config, tables }
    }

    pub fn tables(&self) -> &MappingTables {
        &self.tables
    }

    /// Raw export → canonical dataset file
    pub fn normalize(&self) -> Result<NormalizeStage> {
        let raw_path = self.config.raw_path()?;
        let canonical_path = self.config.canonical_path()?;

        let export = load_raw_export(raw_path)?;
        info!("{}", export.summary());

        let outcome = Normalizer::new(&self.tables).normalize(&export.records);
        let checksum = write_canonical(canonical_path, &outcome.records)?;

        let mut diagnostics = export.diagnostics.clone();
        diagnostics.extend(outcome.diagnostics);

        Ok(NormalizeStage {
            source: export.source.clone(),
            delimiter: export.delimiter,
            header_repaired: export.header_repaired,
            rows_read: export.total_rows,
            malformed_rows: export.malformed_count(),
            input_records: outcome.input_count,
            output_records: outcome.records.len(),
            dropped_invalid: outcome.dropped_invalid,
            unknown_regions: outcome.unknown_regions,
            unmapped_countries: outcome.unmapped_countries,
            unmapped_categories: outcome.unmapped_categories,
            canonical_path: canonical_path.to_path_buf(),
            canonical_sha256: checksum,
            diagnostics,
            records: outcome.records,
        })
    }

    /// Read back the canonical dataset named by the config
    pub fn load_canonical(&self) -> Result<CanonicalDataset> {
        let path = self.config.canonical_path()?;
        let dataset = load_canonical(path)?;
        info!(path = %path.display(), records = dataset.records.len(), "Canonical dataset loaded");
        Ok(dataset)
    }

    /// Reconcile records against the configured coordinate table, no changes
    pub fn reconcile(&self, records: &[CanonicalRecord]) -> Result<CoordinateStage> {
        let coordinates_path = self.config.coordinates_path()?;
        let loaded = load_coordinates(coordinates_path)?;
        let reconciliation = ReconciliationEngine::new().reconcile_records(records, &loaded.table);

        let mut diagnostics = loaded.diagnostics;
        diagnostics.extend(reconciliation.diagnostics.clone());

        Ok(CoordinateStage {
            coordinates_path: coordinates_path.to_path_buf(),
            loaded_countries: loaded.table.len(),
            reconciliation,
            augmented: false,
            added: Vec::new(),
            needs_manual_resolution: Vec::new(),
            rounds: 1,
            saved_to: None,
            save_refused: false,
            diagnostics,
        })
    }

    /// Reconcile, fill gaps from the manual coordinate file, and save the
    /// table when something was added
    pub fn augment(&self, records: &[CanonicalRecord]) -> Result<CoordinateStage> {
        let manual_path = self
            .config
            .manual_coordinates_path
            .as_deref()
            .ok_or(crate::error::PipelineError::MissingPath("manual_coordinates_path"))?;
        let coordinates_path = self.config.coordinates_path()?;

        let loaded = load_coordinates(coordinates_path)?;
        let supplied = load_manual_coordinates(manual_path)?;

        let engine = ReconciliationEngine::new();
        let augmenter = CoordinateAugmenter::with_mappings(&self.tables)
            .with_locked(loaded.malformed_countries.clone());
        let resolution = resolve_coordinates(&engine, &augmenter, records, &loaded.table, &supplied);

        let save_refused = resolution.changed() && loaded.has_malformed_rows();
        let saved_to = if save_refused {
            warn!(
                path = %coordinates_path.display(),
                malformed = loaded.diagnostics.of_kind("MalformedInput").len(),
                "Coordinate file has unparseable rows; additions not saved"
            );
            None
        } else if resolution.changed() {
            let output = self.config.coordinates_output_path()?;
            save_coordinates(output, &resolution.table)?;
            Some(output.to_path_buf())
        } else {
            None
        };

        if !resolution.needs_manual_resolution.is_empty() {
            warn!(
                countries = ?resolution.needs_manual_resolution,
                "Coordinates need manual resolution"
            );
        }

        let mut diagnostics = loaded.diagnostics;
        diagnostics.extend(resolution.diagnostics);
        diagnostics.extend(resolution.report.diagnostics.clone());

        Ok(CoordinateStage {
            coordinates_path: coordinates_path.to_path_buf(),
            loaded_countries: loaded.table.len(),
            reconciliation: resolution.report,
            augmented: true,
            added: resolution.added,
            needs_manual_resolution: resolution.needs_manual_resolution,
            rounds: resolution.rounds,
            saved_to,
            save_refused,
            diagnostics,
        })
    }

    pub fn verify(&self, records: &[CanonicalRecord]) -> VerificationReport {
        let report = Verifier::with_mappings(&self.tables).verify(records);
        info!("{}", report.summary());
        report
    }

    /// Full run. Augments only when a manual coordinate file is configured.
    pub fn run(&self) -> Result<PipelineReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, "Pipeline run started");

        let normalize = self.normalize()?;
        let coordinates = if self.config.manual_coordinates_path.is_some() {
            self.augment(&normalize.records)?
        } else {
            self.reconcile(&normalize.records)?
        };
        let verification = self.verify(&normalize.records);
        let gate = self
            .config
            .publish
            .evaluate(&verification, Some(&coordinates.reconciliation));

        if !gate.passed {
            warn!(failures = ?gate.failures, "Publish gate failed");
        }

        let report = PipelineReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            tool_version: crate::VERSION.to_string(),
            mapping_version: self.tables.version.clone(),
            mapping_fingerprint: self.tables.fingerprint(),
            normalize,
            coordinates,
            verification,
            gate,
        };

        if let Some(path) = &self.config.report_path {
            report.write_json(path)?;
        }

        info!("{}", report.summary());
        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================
