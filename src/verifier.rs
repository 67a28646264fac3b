// ✅ Verifier - Read-only audit of a canonical dataset before publishing
//
// Computes totals, missing values, distinct values per dimension and the
// cohort distribution. Nothing here mutates the dataset. The publish gate
// turns the audit into a pass/fail decision using caller-chosen limits.

use crate::mappings::MappingTables;
use crate::reconciliation::ReconciliationReport;
use crate::records::{CanonicalRecord, Cohort, Region};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// VERIFICATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSummary {
    pub distinct: usize,
    pub values: Vec<String>,
}

impl DimensionSummary {
    fn from_values(values: Vec<String>) -> Self {
        DimensionSummary {
            distinct: values.len(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub total_records: usize,

    /// Empty field count per column (category, cohort, country, region)
    pub missing_values: BTreeMap<String, usize>,

    pub categories: DimensionSummary,
    /// Cohorts in display order
    pub cohorts: DimensionSummary,
    pub countries: DimensionSummary,
    pub regions: DimensionSummary,

    /// Records per cohort, in cohort order
    pub cohort_distribution: Vec<(String, usize)>,

    pub region_distribution: BTreeMap<String, usize>,

    pub unknown_region_records: usize,

    /// Categories outside the canonical vocabulary (needs mapping tables)
    pub non_canonical_categories: Vec<String>,
}

impl VerificationReport {
    pub fn total_missing_values(&self) -> usize {
        self.missing_values.values().sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records | {} categories, {} cohorts, {} countries, {} regions | {} missing values, {} unknown-region records",
            self.total_records,
            self.categories.distinct,
            self.cohorts.distinct,
            self.countries.distinct,
            self.regions.distinct,
            self.total_missing_values(),
            self.unknown_region_records
        )
    }
}

/// Spot-check view of one country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryProfile {
    pub country: String,
    pub records: usize,
    pub region: Option<Region>,
    pub cohorts: Vec<String>,
    pub categories: Vec<String>,
}

// ============================================================================
// VERIFIER
// ============================================================================

pub struct Verifier<'a> {
    tables: Option<&'a MappingTables>,
}

impl<'a> Verifier<'a> {
    pub fn new() -> Self {
        Verifier { tables: None }
    }

    /// Also check categories against the canonical vocabulary
    pub fn with_mappings(tables: &'a MappingTables) -> Self {
        Verifier {
            tables: Some(tables),
        }
    }

    pub fn verify(&self, records: &[CanonicalRecord]) -> VerificationReport {
        let mut missing_values: BTreeMap<String, usize> = ["category", "cohort", "country", "region"]
            .iter()
            .map(|c| (c.to_string(), 0))
            .collect();

        let mut categories: BTreeSet<&str> = BTreeSet::new();
        let mut cohorts: BTreeMap<&Cohort, usize> = BTreeMap::new();
        let mut countries: BTreeSet<&str> = BTreeSet::new();
        let mut regions: BTreeMap<String, usize> = BTreeMap::new();
        let mut unknown_region_records = 0;

        for record in records {
            for field in record.missing_fields() {
                if let Some(count) = missing_values.get_mut(field) {
                    *count += 1;
                }
            }

            if !record.category.trim().is_empty() {
                categories.insert(record.category.as_str());
            }
            if !record.cohort.is_empty() {
                *cohorts.entry(&record.cohort).or_insert(0) += 1;
            }
            if !record.country.trim().is_empty() {
                countries.insert(record.country.as_str());
            }
            *regions.entry(record.region.to_string()).or_insert(0) += 1;
            if record.region.is_unknown() {
                unknown_region_records += 1;
            }
        }

        let non_canonical_categories = match self.tables {
            Some(tables) => categories
                .iter()
                .filter(|c| !tables.canonical_categories.iter().any(|k| k.as_str() == **c))
                .map(|c| c.to_string())
                .collect(),
            None => Vec::new(),
        };

        let cohort_distribution: Vec<(String, usize)> = cohorts
            .iter()
            .map(|(cohort, count)| (cohort.to_string(), *count))
            .collect();

        VerificationReport {
            total_records: records.len(),
            missing_values,
            categories: DimensionSummary::from_values(
                categories.iter().map(|c| c.to_string()).collect(),
            ),
            cohorts: DimensionSummary::from_values(
                cohort_distribution.iter().map(|(c, _)| c.clone()).collect(),
            ),
            countries: DimensionSummary::from_values(
                countries.iter().map(|c| c.to_string()).collect(),
            ),
            regions: DimensionSummary::from_values(regions.keys().cloned().collect()),
            cohort_distribution,
            region_distribution: regions,
            unknown_region_records,
            non_canonical_categories,
        }
    }

    /// Cohorts and categories seen for a single country
    pub fn country_profile(&self, records: &[CanonicalRecord], country: &str) -> CountryProfile {
        let matching: Vec<&CanonicalRecord> =
            records.iter().filter(|r| r.country == country).collect();

        let cohorts: BTreeSet<&Cohort> = matching.iter().map(|r| &r.cohort).collect();
        let categories: BTreeSet<&str> = matching.iter().map(|r| r.category.as_str()).collect();

        CountryProfile {
            country: country.to_string(),
            records: matching.len(),
            region: matching.first().map(|r| r.region),
            cohorts: cohorts.iter().map(|c| c.to_string()).collect(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl<'a> Default for Verifier<'a> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PUBLISH GATE
// ============================================================================

/// Limits that turn data-quality findings into a publish failure.
/// Every limit is off by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishPolicy {
    #[serde(default)]
    pub max_unknown_region_records: Option<usize>,

    #[serde(default)]
    pub max_missing_values: Option<usize>,

    /// Fail when any counted country lacks coordinates
    #[serde(default)]
    pub require_full_coordinates: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub passed: bool,
    pub failures: Vec<String>,
}

impl PublishPolicy {
    pub fn evaluate(
        &self,
        verification: &VerificationReport,
        reconciliation: Option<&ReconciliationReport>,
    ) -> GateDecision {
        let mut failures = Vec::new();

        if let Some(max) = self.max_unknown_region_records {
            if verification.unknown_region_records > max {
                failures.push(format!(
                    "{} records have an unknown region (limit {})",
                    verification.unknown_region_records, max
                ));
            }
        }

        if let Some(max) = self.max_missing_values {
            let missing = verification.total_missing_values();
            if missing > max {
                failures.push(format!("{} missing values (limit {})", missing, max));
            }
        }

        if self.require_full_coordinates {
            match reconciliation {
                Some(report) if !report.is_complete() => failures.push(format!(
                    "{} countries have no coordinates: {}",
                    report.missing_coordinates.len(),
                    report
                        .missing_countries()
                        .into_iter()
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
                Some(_) => {}
                None => failures.push("coordinate check required but not run".to_string()),
            }
        }

        GateDecision {
            passed: failures.is_empty(),
            failures,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::{CoordinateEntry, CoordinateTable};
    use crate::normalizer::Normalizer;
    use crate::reconciliation::ReconciliationEngine;
    use crate::records::RawRecord;

    fn create_test_records() -> Vec<CanonicalRecord> {
        vec![
            CanonicalRecord::new("Data", "2024", "Spain", Region::Emea),
            CanonicalRecord::new("Serverless", "2019", "Spain", Region::Emea),
            CanonicalRecord::new("Data", "2024", "USA", Region::Namer),
            CanonicalRecord::new("Containers", "2025", "Atlantis", Region::Unknown),
            CanonicalRecord::new("", "2025", "", Region::Unknown),
        ]
    }

    #[test]
    fn test_verify_counts() {
        let verifier = Verifier::new();
        let report = verifier.verify(&create_test_records());

        assert_eq!(report.total_records, 5);
        assert_eq!(report.categories.values, vec!["Containers", "Data", "Serverless"]);
        assert_eq!(report.cohorts.values, vec!["2019", "2024", "2025"]);
        assert_eq!(report.countries.distinct, 3);
        assert_eq!(report.regions.values, vec!["EMEA", "NAMER", "UNKNOWN"]);
        assert_eq!(
            report.cohort_distribution,
            vec![
                ("2019".to_string(), 1),
                ("2024".to_string(), 2),
                ("2025".to_string(), 2)
            ]
        );
        assert_eq!(report.unknown_region_records, 2);

        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_cohort_distribution_in_display_order() {
        let records = vec![
            CanonicalRecord::new("Data", "2024", "Spain", Region::Emea),
            CanonicalRecord::new("Data", "2020", "Spain", Region::Emea),
            CanonicalRecord::new("Data", "2020 beta", "Peru", Region::Latam),
            CanonicalRecord::new("Data", "2021", "Peru", Region::Latam),
        ];

        let report = Verifier::new().verify(&records);

        assert_eq!(report.cohorts.values, vec!["2020 beta", "2020", "2021", "2024"]);
        assert_eq!(report.cohort_distribution[0], ("2020 beta".to_string(), 1));
    }

    #[test]
    fn test_missing_values_counted() {
        let report = Verifier::new().verify(&create_test_records());

        assert_eq!(report.missing_values["category"], 1);
        assert_eq!(report.missing_values["country"], 1);
        assert_eq!(report.missing_values["cohort"], 0);
        assert_eq!(report.missing_values["region"], 0);
        assert_eq!(report.total_missing_values(), 2);
    }

    #[test]
    fn test_verify_is_deterministic() {
        let mut records = create_test_records();
        let a = Verifier::new().verify(&records);
        records.reverse();
        let b = Verifier::new().verify(&records);

        assert_eq!(a, b);
    }

    #[test]
    fn test_non_canonical_categories() {
        let tables = MappingTables::builtin().unwrap();
        let mut records = create_test_records();
        records.push(CanonicalRecord::new("Quantum", "2025", "USA", Region::Namer));

        let report = Verifier::with_mappings(&tables).verify(&records);

        assert_eq!(report.non_canonical_categories, vec!["Quantum".to_string()]);
    }

    #[test]
    fn test_invalid_row_lowers_total_by_one() {
        let tables = MappingTables::builtin().unwrap();
        let raw = vec![
            RawRecord::new("Data", "2025", "Spain (ES)"),
            RawRecord::new("A", "2025", "Spain (ES)"),
            RawRecord::new("Serverless", "2025", "Chile (CL)"),
        ];

        let outcome = Normalizer::new(&tables).normalize(&raw);
        let report = Verifier::with_mappings(&tables).verify(&outcome.records);

        assert_eq!(report.total_records, raw.len() - 1);
    }

    #[test]
    fn test_country_profile() {
        let verifier = Verifier::new();
        let profile = verifier.country_profile(&create_test_records(), "Spain");

        assert_eq!(profile.records, 2);
        assert_eq!(profile.region, Some(Region::Emea));
        assert_eq!(profile.cohorts, vec!["2019", "2024"]);
        assert_eq!(profile.categories, vec!["Data", "Serverless"]);

        let absent = verifier.country_profile(&create_test_records(), "Narnia");
        assert_eq!(absent.records, 0);
        assert_eq!(absent.region, None);
    }

    #[test]
    fn test_default_policy_passes_everything() {
        let report = Verifier::new().verify(&create_test_records());
        let decision = PublishPolicy::default().evaluate(&report, None);

        assert!(decision.passed);
        assert!(decision.failures.is_empty());
    }

    #[test]
    fn test_policy_thresholds() {
        let report = Verifier::new().verify(&create_test_records());
        let policy = PublishPolicy {
            max_unknown_region_records: Some(1),
            max_missing_values: Some(2),
            require_full_coordinates: false,
        };

        let decision = policy.evaluate(&report, None);

        assert!(!decision.passed);
        assert_eq!(decision.failures.len(), 1);
        assert!(decision.failures[0].contains("unknown region"));
    }

    #[test]
    fn test_policy_requires_coordinates() {
        let records = create_test_records();
        let table = CoordinateTable::from_entries(vec![
            CoordinateEntry::new("Spain", 40.46, -3.75),
            CoordinateEntry::new("USA", 37.09, -95.71),
        ])
        .unwrap();
        let reconciliation = ReconciliationEngine::new().reconcile_records(&records, &table);
        let report = Verifier::new().verify(&records);
        let policy = PublishPolicy {
            require_full_coordinates: true,
            ..PublishPolicy::default()
        };

        let decision = policy.evaluate(&report, Some(&reconciliation));
        assert!(!decision.passed);
        assert!(decision.failures[0].contains("Atlantis"));

        let not_run = policy.evaluate(&report, None);
        assert!(!not_run.passed);
    }
}
