// 🧹 Normalizer - Raw export rows → canonical dataset
//
// Steps per record:
//   1. country  → alias lookup, passthrough if unmapped
//   2. category → alias lookup, passthrough if unmapped
//   3. drop rows whose category is an invalid marker (the ONLY drop)
//   4. region   → regionOf(country), UNKNOWN if unmapped
//
// Unmapped values are not errors. They pass through and are listed in
// the outcome so the next mapping release can pick them up.

use crate::diagnostics::{Diagnostic, DiagnosticReport};
use crate::mappings::MappingTables;
use crate::records::{CanonicalRecord, Cohort, RawRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

// ============================================================================
// NORMALIZATION OUTCOME
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationOutcome {
    /// Sorted by (category, cohort, country)
    pub records: Vec<CanonicalRecord>,

    pub input_count: usize,

    /// Rows dropped per invalid marker
    pub dropped_invalid: BTreeMap<String, usize>,

    /// Canonical countries that resolved to the UNKNOWN region, with row counts
    pub unknown_regions: BTreeMap<String, usize>,

    /// Raw country values with no alias that are not canonical either
    pub unmapped_countries: BTreeMap<String, usize>,

    /// Raw category values with no alias that are not canonical either
    pub unmapped_categories: BTreeMap<String, usize>,

    pub diagnostics: DiagnosticReport,
}

impl NormalizationOutcome {
    pub fn dropped_count(&self) -> usize {
        self.dropped_invalid.values().sum()
    }

    pub fn unknown_region_countries(&self) -> Vec<&str> {
        self.unknown_regions.keys().map(|c| c.as_str()).collect()
    }

    pub fn unknown_region_records(&self) -> usize {
        self.unknown_regions.values().sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} raw → {} canonical ({} dropped as invalid), {} unknown-region countries, {} unmapped countries, {} unmapped categories",
            self.input_count,
            self.records.len(),
            self.dropped_count(),
            self.unknown_regions.len(),
            self.unmapped_countries.len(),
            self.unmapped_categories.len()
        )
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct Normalizer<'a> {
    tables: &'a MappingTables,
}

impl<'a> Normalizer<'a> {
    pub fn new(tables: &'a MappingTables) -> Self {
        Normalizer { tables }
    }

    /// Clean a single record. None means the row carries an invalid marker.
    pub fn normalize_record(&self, raw: &RawRecord) -> Option<CanonicalRecord> {
        let country = self.tables.clean_country(&raw.country);
        let category = self.tables.clean_category(&raw.category);

        if self.tables.is_invalid_category(&raw.category)
            || self.tables.is_invalid_category(&category)
        {
            return None;
        }

        let region = self.tables.region_of(&country);

        Some(CanonicalRecord {
            category,
            cohort: Cohort::new(raw.cohort.as_str()),
            country,
            region,
        })
    }

    /// Normalize a whole export. Output length = input length - dropped.
    pub fn normalize(&self, raw_records: &[RawRecord]) -> NormalizationOutcome {
        let mut records = Vec::with_capacity(raw_records.len());
        let mut dropped_invalid: BTreeMap<String, usize> = BTreeMap::new();
        let mut unknown_regions: BTreeMap<String, usize> = BTreeMap::new();
        let mut unmapped_countries: BTreeMap<String, usize> = BTreeMap::new();
        let mut unmapped_categories: BTreeMap<String, usize> = BTreeMap::new();

        for raw in raw_records {
            let record = match self.normalize_record(raw) {
                Some(record) => record,
                None => {
                    *dropped_invalid
                        .entry(raw.category.trim().to_string())
                        .or_insert(0) += 1;
                    continue;
                }
            };

            let raw_country = raw.country.trim();
            if !raw_country.is_empty()
                && !self.tables.country_aliases.contains_key(raw_country)
                && !self.tables.is_known_country(&record.country)
            {
                *unmapped_countries
                    .entry(raw_country.to_string())
                    .or_insert(0) += 1;
            }

            let raw_category = raw.category.trim();
            if !raw_category.is_empty()
                && !self.tables.category_aliases.contains_key(raw_category)
                && !self.tables.is_known_category(&record.category)
            {
                *unmapped_categories
                    .entry(raw_category.to_string())
                    .or_insert(0) += 1;
            }

            if record.region.is_unknown() {
                *unknown_regions.entry(record.country.clone()).or_insert(0) += 1;
            }

            records.push(record);
        }

        records.sort();

        let mut diagnostics = DiagnosticReport::new();
        for (marker, count) in &dropped_invalid {
            diagnostics.push(Diagnostic::DroppedInvalidRows {
                marker: marker.clone(),
                count: *count,
            });
        }
        for (value, occurrences) in &unmapped_countries {
            diagnostics.push(Diagnostic::UnmappedValue {
                field: "country".to_string(),
                value: value.clone(),
                occurrences: *occurrences,
            });
        }
        for (value, occurrences) in &unmapped_categories {
            diagnostics.push(Diagnostic::UnmappedValue {
                field: "category".to_string(),
                value: value.clone(),
                occurrences: *occurrences,
            });
        }
        for (country, occurrences) in &unknown_regions {
            diagnostics.push(Diagnostic::UnresolvedRegion {
                country: country.clone(),
                occurrences: *occurrences,
            });
        }

        let outcome = NormalizationOutcome {
            records,
            input_count: raw_records.len(),
            dropped_invalid,
            unknown_regions,
            unmapped_countries,
            unmapped_categories,
            diagnostics,
        };

        if outcome.dropped_count() > 0 {
            info!(dropped = outcome.dropped_count(), "Invalid-category rows dropped");
        }
        if !outcome.unknown_regions.is_empty() {
            warn!(
                rows = outcome.unknown_region_records(),
                countries = ?outcome.unknown_region_countries(),
                "Countries with unknown region"
            );
        }
        info!("{}", outcome.summary());

        outcome
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Region;

    fn tables() -> MappingTables {
        MappingTables::builtin().unwrap()
    }

    fn raw(category: &str, cohort: &str, country: &str) -> RawRecord {
        RawRecord::new(category, cohort, country)
    }

    #[test]
    fn test_germany_scenario() {
        let tables = tables();
        let normalizer = Normalizer::new(&tables);

        let record = normalizer
            .normalize_record(&raw("Data", "2025", "Germany (DE)"))
            .unwrap();

        assert_eq!(record.country, "Germany");
        assert_eq!(record.region, Region::Emea);
    }

    #[test]
    fn test_invalid_sentinel_row_dropped() {
        let tables = tables();
        let normalizer = Normalizer::new(&tables);

        let input = vec![
            raw("Data", "2025", "Spain (ES)"),
            raw("A", "2025", "Spain (ES)"),
            raw("Serverless", "2024", "India (IN)"),
        ];
        let outcome = normalizer.normalize(&input);

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.dropped_count(), 1);
        assert_eq!(outcome.dropped_invalid.get("A"), Some(&1));
        assert_eq!(
            outcome.records.len(),
            outcome.input_count - outcome.dropped_count()
        );
        assert_eq!(outcome.diagnostics.of_kind("DroppedInvalidRows").len(), 1);

        println!("✅ {}", outcome.summary());
    }

    #[test]
    fn test_region_is_function_of_country() {
        let tables = tables();
        let normalizer = Normalizer::new(&tables);

        let input = vec![
            raw("Data", "2025", "Japan (JP)"),
            raw("Data", "2025", "Atlantis"),
            raw("Containers", "2024", "Canada (CA)"),
            raw("Containers", "2024", "Taiwan (TW)"),
            raw("Containers", "2024", ""),
        ];
        let outcome = normalizer.normalize(&input);

        for record in &outcome.records {
            assert_eq!(record.region, tables.region_of(&record.country));
        }
        assert_eq!(outcome.records.len(), 5);
    }

    #[test]
    fn test_unknown_region_reported_not_dropped() {
        let tables = tables();
        let normalizer = Normalizer::new(&tables);

        let input = vec![
            raw("Data", "2025", "Atlantis"),
            raw("Serverless", "2025", "Atlantis"),
            raw("Data", "2025", "Peru (PE)"),
        ];
        let outcome = normalizer.normalize(&input);

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.unknown_region_countries(), vec!["Atlantis"]);
        assert_eq!(outcome.unknown_region_records(), 2);
        assert_eq!(outcome.unmapped_countries.get("Atlantis"), Some(&2));

        let unresolved = outcome.diagnostics.of_kind("UnresolvedRegion");
        assert_eq!(unresolved.len(), 1);
    }

    #[test]
    fn test_unmapped_category_passes_through() {
        let tables = tables();
        let normalizer = Normalizer::new(&tables);

        let outcome = normalizer.normalize(&[
            raw("Quantum", "2025", "USA"),
            raw("AI Engineering", "2025", "USA"),
        ]);

        let categories: Vec<&str> = outcome.records.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, vec!["Machine Learning & GenAI", "Quantum"]);
        assert_eq!(outcome.unmapped_categories.get("Quantum"), Some(&1));
        assert!(outcome.unmapped_categories.get("AI Engineering").is_none());
    }

    #[test]
    fn test_canonical_values_not_reported_as_unmapped() {
        let tables = tables();
        let normalizer = Normalizer::new(&tables);

        let outcome = normalizer.normalize(&[raw("Data", "2024", "Germany")]);

        assert!(outcome.unmapped_countries.is_empty());
        assert!(outcome.unmapped_categories.is_empty());
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_output_is_deterministic() {
        let tables = tables();
        let normalizer = Normalizer::new(&tables);

        let input = vec![
            raw("Serverless", "2024", "Chile (CL)"),
            raw("Data", "2025", "Nepal (NP)"),
            raw("Data", "2019", "Kenya (KE)"),
            raw("Containers", "2025", "Ghana (GH)"),
        ];
        let mut reversed = input.clone();
        reversed.reverse();

        let a = normalizer.normalize(&input);
        let b = normalizer.normalize(&reversed);

        assert_eq!(a.records, b.records);
        assert_eq!(a.records[0].category, "Containers");
        assert_eq!(a.records[1].cohort.as_str(), "2019");
    }
}
