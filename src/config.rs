// ⚙️ Pipeline Configuration - where the files live and how strict to be
//
// Loaded from a JSON file. Every path is optional at this level; a stage
// that needs a path nobody configured fails with MissingPath.

use crate::error::PipelineError;
use crate::mappings::MappingTables;
use crate::verifier::PublishPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Yearly raw membership export
    #[serde(default)]
    pub raw_path: Option<PathBuf>,

    /// Canonical dataset the dashboard reads
    #[serde(default)]
    pub canonical_path: Option<PathBuf>,

    #[serde(default)]
    pub coordinates_path: Option<PathBuf>,

    /// Where the augmented coordinate table is saved (defaults to coordinates_path)
    #[serde(default)]
    pub coordinates_output_path: Option<PathBuf>,

    /// Mapping table override (defaults to the built-in tables)
    #[serde(default)]
    pub mappings_path: Option<PathBuf>,

    /// JSON object of hand-collected coordinates: { "Country": [lat, lon] }
    #[serde(default)]
    pub manual_coordinates_path: Option<PathBuf>,

    /// Pipeline report output (pretty JSON)
    #[serde(default)]
    pub report_path: Option<PathBuf>,

    #[serde(default)]
    pub publish: PublishPolicy,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    pub fn raw_path(&self) -> std::result::Result<&Path, PipelineError> {
        required(&self.raw_path, "raw_path")
    }

    pub fn canonical_path(&self) -> std::result::Result<&Path, PipelineError> {
        required(&self.canonical_path, "canonical_path")
    }

    pub fn coordinates_path(&self) -> std::result::Result<&Path, PipelineError> {
        required(&self.coordinates_path, "coordinates_path")
    }

    pub fn coordinates_output_path(&self) -> std::result::Result<&Path, PipelineError> {
        match &self.coordinates_output_path {
            Some(path) => Ok(path.as_path()),
            None => self.coordinates_path(),
        }
    }

    /// Mapping tables from the override file, or the built-in asset
    pub fn load_mappings(&self) -> Result<MappingTables> {
        match &self.mappings_path {
            Some(path) => MappingTables::from_file(path),
            None => MappingTables::builtin(),
        }
    }
}

fn required<'a>(
    value: &'a Option<PathBuf>,
    name: &'static str,
) -> std::result::Result<&'a Path, PipelineError> {
    value.as_deref().ok_or(PipelineError::MissingPath(name))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "raw_path": "raw/2025.csv",
                "canonical_path": "out/canonical.csv",
                "coordinates_path": "data/countries.csv",
                "publish": { "max_unknown_region_records": 0, "require_full_coordinates": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.raw_path().unwrap(), Path::new("raw/2025.csv"));
        assert_eq!(
            config.coordinates_output_path().unwrap(),
            Path::new("data/countries.csv")
        );
        assert_eq!(config.publish.max_unknown_region_records, Some(0));
        assert_eq!(config.publish.max_missing_values, None);
        assert!(config.publish.require_full_coordinates);
    }

    #[test]
    fn test_missing_path_is_reported_by_name() {
        let config = PipelineConfig::new();

        assert!(matches!(
            config.canonical_path(),
            Err(PipelineError::MissingPath("canonical_path"))
        ));
        assert!(matches!(
            config.coordinates_output_path(),
            Err(PipelineError::MissingPath("coordinates_path"))
        ));
    }

    #[test]
    fn test_default_mappings_are_builtin() {
        let tables = PipelineConfig::new().load_mappings().unwrap();
        assert_eq!(tables, MappingTables::builtin().unwrap());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, r#"{ "raw_path": "in.csv" }"#).unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.raw_path.as_deref(), Some(Path::new("in.csv")));
        assert_eq!(config.publish, PublishPolicy::default());

        assert!(PipelineConfig::from_file(dir.path().join("absent.json")).is_err());
    }
}
