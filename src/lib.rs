// Community Builder Dataset - Core Library
// Exposes all modules for use in the CLI and tests

pub mod records;
pub mod error;
pub mod diagnostics;
pub mod mappings;       // Alias and region tables (data/mappings.json)
pub mod ingest;         // Raw yearly export reader
pub mod normalizer;
pub mod dataset;        // Canonical file: category;cohort;country;region
pub mod coordinates;    // Coordinate file: country;latitud;longitud
pub mod reconciliation;
pub mod augment;
pub mod verifier;
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use records::{CanonicalRecord, Cohort, RawRecord, Region};
pub use error::PipelineError;
pub use diagnostics::{Diagnostic, DiagnosticReport, Severity};
pub use mappings::{alias_conflicts, AliasConflict, MappingTables};
pub use ingest::{load_raw_export, parse_raw_export, RawExport};
pub use normalizer::{NormalizationOutcome, Normalizer};
pub use dataset::{load_canonical, write_canonical, CanonicalDataset};
pub use coordinates::{
    load_coordinates, save_coordinates, CoordinateEntry, CoordinateTable, LoadedCoordinates,
};
pub use reconciliation::{
    aggregate_counts, AggregateCount, MapPoint, ReconciliationEngine, ReconciliationReport,
    ReconciliationResult,
};
pub use augment::{
    load_manual_coordinates, parse_manual_coordinates, resolve_coordinates, AugmentOutcome,
    CoordinateAugmenter, ManualCoordinates, Resolution,
};
pub use verifier::{
    CountryProfile, GateDecision, PublishPolicy, VerificationReport, Verifier,
};
pub use config::PipelineConfig;
pub use pipeline::{CoordinateStage, NormalizeStage, Pipeline, PipelineReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
