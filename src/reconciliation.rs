// ⚖️ Reconciliation Engine - Member counts vs. coordinate table
//
// Joins per-country member counts against the coordinate reference table:
//
//   map_ready           = countries in both (count + coordinates)
//   missing_coordinates = countries with members but no coordinates
//   unused_coordinates  = countries with coordinates but no members
//
// map_ready ∪ missing_coordinates is always the full set of counted
// countries, and the two never overlap. Missing coordinates are a data
// quality problem: they are always returned, never folded away.

use crate::coordinates::CoordinateTable;
use crate::diagnostics::{Diagnostic, DiagnosticReport};
use crate::records::CanonicalRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

// ============================================================================
// AGGREGATE COUNT
// ============================================================================

/// Members per country. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCount {
    pub country: String,
    pub count: usize,
}

/// Group records by country (sorted by name). Records with an empty
/// country have no group.
pub fn aggregate_counts(records: &[CanonicalRecord]) -> Vec<AggregateCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        let country = record.country.trim();
        if country.is_empty() {
            continue;
        }
        *counts.entry(country).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(country, count)| AggregateCount {
            country: country.to_string(),
            count,
        })
        .collect()
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub country: String,
    pub count: usize,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    /// Every counted country can be placed on the map
    Complete { countries: usize },

    /// Some counted countries have no coordinates
    MissingCoordinates {
        missing: usize,
        missing_members: usize,
    },
}

impl ReconciliationResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, ReconciliationResult::Complete { .. })
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub result: ReconciliationResult,

    /// Inner join, sorted by country
    pub map_ready: Vec<MapPoint>,

    /// Counted countries absent from the coordinate table, sorted by country
    pub missing_coordinates: Vec<AggregateCount>,

    /// Coordinate entries with no members (informational)
    pub unused_coordinates: Vec<String>,

    pub counted_countries: usize,
    pub coordinate_countries: usize,
    pub total_members: usize,
    pub diagnostics: DiagnosticReport,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_complete(&self) -> bool {
        self.result.is_complete()
    }

    pub fn missing_countries(&self) -> BTreeSet<String> {
        self.missing_coordinates
            .iter()
            .map(|c| c.country.clone())
            .collect()
    }

    pub fn map_ready_countries(&self) -> BTreeSet<String> {
        self.map_ready.iter().map(|p| p.country.clone()).collect()
    }

    /// Map-ready countries by member count (descending, then by name)
    pub fn top_countries(&self, n: usize) -> Vec<&MapPoint> {
        let mut points: Vec<&MapPoint> = self.map_ready.iter().collect();
        points.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.country.cmp(&b.country)));
        points.truncate(n);
        points
    }

    pub fn summary(&self) -> String {
        format!(
            "{} members, {} countries with members, {} with coordinates, {} ready for map display, {} missing coordinates, {} unused coordinates",
            self.total_members,
            self.counted_countries,
            self.coordinate_countries,
            self.map_ready.len(),
            self.missing_coordinates.len(),
            self.unused_coordinates.len()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine
    }

    /// Reconcile canonical records against the coordinate table
    pub fn reconcile_records(
        &self,
        records: &[CanonicalRecord],
        table: &CoordinateTable,
    ) -> ReconciliationReport {
        self.reconcile(&aggregate_counts(records), table)
    }

    /// Reconcile per-country counts against the coordinate table
    pub fn reconcile(&self, counts: &[AggregateCount], table: &CoordinateTable) -> ReconciliationReport {
        let mut map_ready = Vec::new();
        let mut missing_coordinates = Vec::new();
        let mut diagnostics = DiagnosticReport::new();

        for aggregate in counts {
            match table.get(&aggregate.country) {
                Some(entry) => map_ready.push(MapPoint {
                    country: aggregate.country.clone(),
                    count: aggregate.count,
                    latitude: entry.latitude,
                    longitude: entry.longitude,
                }),
                None => {
                    diagnostics.push(Diagnostic::MissingCoordinates {
                        country: aggregate.country.clone(),
                        count: aggregate.count,
                    });
                    missing_coordinates.push(aggregate.clone());
                }
            }
        }

        map_ready.sort_by(|a, b| a.country.cmp(&b.country));
        missing_coordinates.sort_by(|a, b| a.country.cmp(&b.country));

        let counted: BTreeSet<&str> = counts.iter().map(|c| c.country.as_str()).collect();
        let unused_coordinates: Vec<String> = table
            .countries()
            .filter(|c| !counted.contains(c))
            .map(|c| c.to_string())
            .collect();

        let result = if missing_coordinates.is_empty() {
            ReconciliationResult::Complete {
                countries: map_ready.len(),
            }
        } else {
            ReconciliationResult::MissingCoordinates {
                missing: missing_coordinates.len(),
                missing_members: missing_coordinates.iter().map(|c| c.count).sum(),
            }
        };

        let report = ReconciliationReport {
            result,
            map_ready,
            missing_coordinates,
            unused_coordinates,
            counted_countries: counted.len(),
            coordinate_countries: table.len(),
            total_members: counts.iter().map(|c| c.count).sum(),
            diagnostics,
            reconciled_at: Utc::now(),
        };

        if !report.is_complete() {
            warn!(
                missing = ?report.missing_countries(),
                "Countries with members but no coordinates"
            );
        }
        info!("{}", report.summary());

        report
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::CoordinateEntry;
    use crate::records::Region;

    fn create_test_record(country: &str) -> CanonicalRecord {
        CanonicalRecord::new("Data", "2025", country, Region::Unknown)
    }

    fn create_test_table() -> CoordinateTable {
        CoordinateTable::from_entries(vec![
            CoordinateEntry::new("Spain", 40.4637, -3.7492),
            CoordinateEntry::new("India", 20.5937, 78.9629),
            CoordinateEntry::new("Iceland", 64.9631, -19.0208),
        ])
        .unwrap()
    }

    #[test]
    fn test_aggregate_counts() {
        let records = vec![
            create_test_record("Spain"),
            create_test_record("India"),
            create_test_record("Spain"),
            create_test_record(""),
        ];

        let counts = aggregate_counts(&records);

        assert_eq!(
            counts,
            vec![
                AggregateCount { country: "India".to_string(), count: 1 },
                AggregateCount { country: "Spain".to_string(), count: 2 },
            ]
        );
    }

    #[test]
    fn test_reconciliation_complete() {
        let engine = ReconciliationEngine::new();
        let records = vec![create_test_record("Spain"), create_test_record("India")];

        let report = engine.reconcile_records(&records, &create_test_table());

        assert!(report.is_complete());
        assert_eq!(report.map_ready.len(), 2);
        assert!(report.missing_coordinates.is_empty());
        assert_eq!(report.unused_coordinates, vec!["Iceland".to_string()]);
        assert!(report.diagnostics.is_empty());

        println!("✅ Test passed: {}", report.summary());
    }

    #[test]
    fn test_atlantis_reported_missing() {
        let engine = ReconciliationEngine::new();
        let records = vec![
            create_test_record("Spain"),
            create_test_record("Atlantis"),
            create_test_record("Atlantis"),
        ];

        let report = engine.reconcile_records(&records, &create_test_table());

        assert!(!report.is_complete());
        assert_eq!(
            report.missing_coordinates,
            vec![AggregateCount { country: "Atlantis".to_string(), count: 2 }]
        );
        assert!(!report.map_ready_countries().contains("Atlantis"));
        assert_eq!(
            report.result,
            ReconciliationResult::MissingCoordinates { missing: 1, missing_members: 2 }
        );
        assert_eq!(report.diagnostics.of_kind("MissingCoordinates").len(), 1);
    }

    #[test]
    fn test_join_is_lossless_for_diagnostics() {
        let engine = ReconciliationEngine::new();
        let counts = vec![
            AggregateCount { country: "Spain".to_string(), count: 5 },
            AggregateCount { country: "Atlantis".to_string(), count: 1 },
            AggregateCount { country: "Lemuria".to_string(), count: 3 },
            AggregateCount { country: "India".to_string(), count: 7 },
        ];

        let report = engine.reconcile(&counts, &create_test_table());

        let missing = report.missing_countries();
        let joined = report.map_ready_countries();
        let all: BTreeSet<String> = counts.iter().map(|c| c.country.clone()).collect();

        assert!(missing.is_disjoint(&joined));
        assert_eq!(missing.union(&joined).cloned().collect::<BTreeSet<_>>(), all);
        assert_eq!(report.total_members, 16);
    }

    #[test]
    fn test_top_countries() {
        let engine = ReconciliationEngine::new();
        let counts = vec![
            AggregateCount { country: "Spain".to_string(), count: 5 },
            AggregateCount { country: "India".to_string(), count: 9 },
            AggregateCount { country: "Iceland".to_string(), count: 5 },
        ];

        let report = engine.reconcile(&counts, &create_test_table());
        let top = report.top_countries(2);

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].country, "India");
        assert_eq!(top[1].country, "Iceland");
    }

    #[test]
    fn test_empty_inputs() {
        let engine = ReconciliationEngine::new();
        let report = engine.reconcile(&[], &CoordinateTable::new());

        assert!(report.is_complete());
        assert_eq!(report.total_members, 0);
        assert!(report.unused_coordinates.is_empty());
    }
}
