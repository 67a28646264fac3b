// ➕ Coordinate Augmenter - Fill in coordinates the reconciler found missing
//
// Adds one entry per missing country that has a human-supplied position.
// Never guesses, never defaults to (0, 0), never touches an existing entry.
// Anything that smells like two spellings of one country is flagged for a
// person to settle instead of being merged.

use crate::coordinates::{is_valid_position, CoordinateEntry, CoordinateTable};
use crate::diagnostics::{Diagnostic, DiagnosticReport};
use crate::mappings::MappingTables;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::records::CanonicalRecord;
use anyhow::{bail, Context as AnyhowContext, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Country → (latitude, longitude), as typed in by a human
pub type ManualCoordinates = BTreeMap<String, (f64, f64)>;

/// Object entries in file order, duplicates included
struct ManualEntries(Vec<(String, (f64, f64))>);

impl<'de> Deserialize<'de> for ManualEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ManualEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of country: [latitude, longitude]")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, (f64, f64)>()? {
                    entries.push(entry);
                }
                Ok(ManualEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Load `{ "Country": [lat, lon], ... }`. Two keys naming the same
/// country (after trimming) are rejected.
pub fn load_manual_coordinates<P: AsRef<Path>>(path: P) -> Result<ManualCoordinates> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read manual coordinates: {:?}", path.as_ref()))?;

    parse_manual_coordinates(&content)
        .with_context(|| format!("Failed to load manual coordinates: {:?}", path.as_ref()))
}

pub fn parse_manual_coordinates(content: &str) -> Result<ManualCoordinates> {
    let ManualEntries(entries) =
        serde_json::from_str(content).context("Failed to parse manual coordinates JSON")?;

    let mut coordinates = ManualCoordinates::new();
    for (country, position) in entries {
        let country = country.trim().to_string();
        if coordinates.contains_key(&country) {
            bail!("coordinates for '{}' are given more than once", country);
        }
        coordinates.insert(country, position);
    }

    Ok(coordinates)
}

// ============================================================================
// AUGMENT OUTCOME
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentOutcome {
    /// Input table plus the added entries
    pub table: CoordinateTable,

    pub added: Vec<CoordinateEntry>,

    /// Countries in the missing set that the table already had (no-op)
    pub already_present: Vec<String>,

    /// Countries still without coordinates after this pass
    pub still_missing: Vec<String>,

    /// Countries flagged for manual resolution (subset of still_missing)
    pub needs_manual_resolution: Vec<String>,

    /// Supplied coordinates not used by this pass
    pub unused_supplied: Vec<String>,

    pub diagnostics: DiagnosticReport,
}

impl AugmentOutcome {
    pub fn changed(&self) -> bool {
        !self.added.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} already present, {} still missing ({} need manual resolution), {} supplied unused",
            self.added.len(),
            self.already_present.len(),
            self.still_missing.len(),
            self.needs_manual_resolution.len(),
            self.unused_supplied.len()
        )
    }
}

// ============================================================================
// COORDINATE AUGMENTER
// ============================================================================

pub struct CoordinateAugmenter<'a> {
    /// Alias tables used to spot conflicting spellings
    tables: Option<&'a MappingTables>,

    /// Countries that already have a (malformed) row in the coordinate file
    locked: BTreeSet<String>,
}

impl<'a> CoordinateAugmenter<'a> {
    pub fn new() -> Self {
        CoordinateAugmenter {
            tables: None,
            locked: BTreeSet::new(),
        }
    }

    pub fn with_mappings(tables: &'a MappingTables) -> Self {
        CoordinateAugmenter {
            tables: Some(tables),
            locked: BTreeSet::new(),
        }
    }

    /// Never fill in these countries; their existing row must be fixed by hand
    pub fn with_locked(mut self, countries: BTreeSet<String>) -> Self {
        self.locked = countries;
        self
    }

    /// Extend `table` with supplied coordinates for `missing` countries.
    /// The output country set is a superset of the input's.
    pub fn augment(
        &self,
        table: &CoordinateTable,
        missing: &BTreeSet<String>,
        supplied: &ManualCoordinates,
    ) -> AugmentOutcome {
        let mut updated = table.clone();
        let mut added = Vec::new();
        let mut already_present = Vec::new();
        let mut still_missing = Vec::new();
        let mut needs_manual_resolution = Vec::new();
        let mut used: BTreeSet<&str> = BTreeSet::new();
        let mut diagnostics = DiagnosticReport::new();

        for country in missing {
            if updated.contains(country) {
                already_present.push(country.clone());
                continue;
            }

            if self.locked.contains(country) {
                debug!(country = %country, "Coordinate row exists but is malformed");
                diagnostics.push(Diagnostic::UnresolvedCoordinates {
                    country: country.clone(),
                });
                needs_manual_resolution.push(country.clone());
                still_missing.push(country.clone());
                continue;
            }

            if let Some(conflict) = self.spelling_conflict(country, &updated, supplied) {
                debug!(country = %country, "Coordinate alias conflict");
                diagnostics.push(conflict);
                needs_manual_resolution.push(country.clone());
                still_missing.push(country.clone());
                continue;
            }

            match supplied.get(country) {
                Some((latitude, longitude)) if is_valid_position(*latitude, *longitude) => {
                    let entry = CoordinateEntry::new(country, *latitude, *longitude);
                    updated.insert_new(entry.clone());
                    added.push(entry);
                    used.insert(country.as_str());
                }
                Some((latitude, longitude)) => {
                    diagnostics.push(Diagnostic::MalformedInput {
                        source: "manual coordinates".to_string(),
                        line: 0,
                        reason: format!(
                            "'{}' position ({}, {}) is out of range",
                            country, latitude, longitude
                        ),
                        raw: format!("{}: [{}, {}]", country, latitude, longitude),
                    });
                    used.insert(country.as_str());
                    still_missing.push(country.clone());
                }
                None => {
                    diagnostics.push(Diagnostic::UnresolvedCoordinates {
                        country: country.clone(),
                    });
                    still_missing.push(country.clone());
                }
            }
        }

        let unused_supplied: Vec<String> = supplied
            .keys()
            .filter(|c| !used.contains(c.as_str()))
            .cloned()
            .collect();

        let outcome = AugmentOutcome {
            table: updated,
            added,
            already_present,
            still_missing,
            needs_manual_resolution,
            unused_supplied,
            diagnostics,
        };

        if !outcome.still_missing.is_empty() {
            warn!(still_missing = ?outcome.still_missing, "Countries still without coordinates");
        }
        info!("{}", outcome.summary());

        outcome
    }

    /// Detect a country whose coordinates exist or were supplied under a
    /// different spelling of the same canonical name
    fn spelling_conflict(
        &self,
        country: &str,
        table: &CoordinateTable,
        supplied: &ManualCoordinates,
    ) -> Option<Diagnostic> {
        let tables = self.tables?;

        if let Some(canonical) = tables.canonical_country_for(country) {
            return Some(Diagnostic::AliasConflict {
                country: country.to_string(),
                canonical: canonical.to_string(),
                reason: format!(
                    "'{}' is an alias of '{}' in mappings {}",
                    country, canonical, tables.version
                ),
            });
        }

        for spelling in tables.spellings_of(country) {
            if spelling == country {
                continue;
            }
            if table.contains(spelling) {
                return Some(Diagnostic::AliasConflict {
                    country: spelling.to_string(),
                    canonical: country.to_string(),
                    reason: format!("coordinate table already has an entry under '{}'", spelling),
                });
            }
            if supplied.contains_key(spelling) {
                return Some(Diagnostic::AliasConflict {
                    country: spelling.to_string(),
                    canonical: country.to_string(),
                    reason: format!("coordinates were supplied under alias '{}'", spelling),
                });
            }
        }

        None
    }
}

impl<'a> Default for CoordinateAugmenter<'a> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RECONCILE → AUGMENT LOOP
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub table: CoordinateTable,

    /// Reconciliation against the final table
    pub report: ReconciliationReport,

    /// Every entry added across all rounds
    pub added: Vec<CoordinateEntry>,

    /// Countries flagged for manual resolution in the last round
    pub needs_manual_resolution: Vec<String>,

    pub rounds: usize,
    pub diagnostics: DiagnosticReport,
}

impl Resolution {
    pub fn changed(&self) -> bool {
        !self.added.is_empty()
    }
}

/// Reconcile, augment, reconcile again, until the missing set stops
/// shrinking (empty, or only accepted-unresolvable countries remain).
pub fn resolve_coordinates(
    engine: &ReconciliationEngine,
    augmenter: &CoordinateAugmenter<'_>,
    records: &[CanonicalRecord],
    table: &CoordinateTable,
    supplied: &ManualCoordinates,
) -> Resolution {
    let mut current = table.clone();
    let mut added = Vec::new();
    let mut needs_manual_resolution = Vec::new();
    let mut diagnostics = DiagnosticReport::new();
    let mut rounds = 0;

    loop {
        rounds += 1;
        let report = engine.reconcile_records(records, &current);

        if report.is_complete() {
            return Resolution {
                table: current,
                report,
                added,
                needs_manual_resolution,
                rounds,
                diagnostics,
            };
        }

        let outcome = augmenter.augment(&current, &report.missing_countries(), supplied);
        needs_manual_resolution = outcome.needs_manual_resolution.clone();

        if !outcome.changed() {
            diagnostics.extend(outcome.diagnostics);
            info!(rounds, remaining = report.missing_coordinates.len(), "Coordinate resolution reached a fixed point");
            return Resolution {
                table: current,
                report,
                added,
                needs_manual_resolution,
                rounds,
                diagnostics,
            };
        }

        added.extend(outcome.added);
        current = outcome.table;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Region;
    use std::io::Write;

    fn base_table() -> CoordinateTable {
        CoordinateTable::from_entries(vec![
            CoordinateEntry::new("Spain", 40.4637, -3.7492),
            CoordinateEntry::new("India", 20.5937, 78.9629),
        ])
        .unwrap()
    }

    fn missing(countries: &[&str]) -> BTreeSet<String> {
        countries.iter().map(|c| c.to_string()).collect()
    }

    fn supplied(entries: &[(&str, f64, f64)]) -> ManualCoordinates {
        entries
            .iter()
            .map(|(c, lat, lon)| (c.to_string(), (*lat, *lon)))
            .collect()
    }

    #[test]
    fn test_adds_supplied_coordinates() {
        let augmenter = CoordinateAugmenter::new();
        let outcome = augmenter.augment(
            &base_table(),
            &missing(&["Angola", "Uganda"]),
            &supplied(&[("Angola", -11.2027, 17.8739), ("Uganda", 1.3733, 32.2903)]),
        );

        assert_eq!(outcome.added.len(), 2);
        assert_eq!(outcome.table.len(), 4);
        assert!(outcome.still_missing.is_empty());
        assert_eq!(outcome.table.get("Angola").unwrap().latitude, -11.2027);

        println!("✅ {}", outcome.summary());
    }

    #[test]
    fn test_output_is_superset_and_existing_untouched() {
        let augmenter = CoordinateAugmenter::new();
        let table = base_table();
        let outcome = augmenter.augment(
            &table,
            &missing(&["Spain", "Chile"]),
            &supplied(&[("Spain", 0.0, 0.0), ("Chile", -35.6751, -71.543)]),
        );

        for entry in table.iter() {
            assert_eq!(outcome.table.get(&entry.country), Some(entry));
        }
        assert_eq!(outcome.table.get("Spain").unwrap().latitude, 40.4637);
        assert_eq!(outcome.already_present, vec!["Spain".to_string()]);
    }

    #[test]
    fn test_rerun_with_resolved_country_is_noop() {
        let augmenter = CoordinateAugmenter::new();
        let coords = supplied(&[("Angola", -11.2027, 17.8739)]);

        let first = augmenter.augment(&base_table(), &missing(&["Angola"]), &coords);
        let second = augmenter.augment(&first.table, &missing(&["Angola"]), &coords);

        assert!(!second.changed());
        assert_eq!(second.table, first.table);
        assert_eq!(second.already_present, vec!["Angola".to_string()]);
    }

    #[test]
    fn test_unsupplied_country_left_missing_not_guessed() {
        let augmenter = CoordinateAugmenter::new();
        let outcome = augmenter.augment(&base_table(), &missing(&["Atlantis"]), &supplied(&[]));

        assert!(!outcome.changed());
        assert!(!outcome.table.contains("Atlantis"));
        assert_eq!(outcome.still_missing, vec!["Atlantis".to_string()]);
        assert_eq!(outcome.diagnostics.of_kind("UnresolvedCoordinates").len(), 1);
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let augmenter = CoordinateAugmenter::new();
        let outcome = augmenter.augment(
            &base_table(),
            &missing(&["Nowhere"]),
            &supplied(&[("Nowhere", 123.0, 10.0)]),
        );

        assert!(!outcome.changed());
        assert_eq!(outcome.still_missing, vec!["Nowhere".to_string()]);
        assert_eq!(outcome.diagnostics.of_kind("MalformedInput").len(), 1);
    }

    #[test]
    fn test_locked_country_never_filled() {
        let augmenter = CoordinateAugmenter::new().with_locked(missing(&["Peru"]));
        let outcome = augmenter.augment(
            &base_table(),
            &missing(&["Peru", "Angola"]),
            &supplied(&[("Peru", 0.5, 0.5), ("Angola", -11.2027, 17.8739)]),
        );

        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.added[0].country, "Angola");
        assert!(!outcome.table.contains("Peru"));
        assert_eq!(outcome.needs_manual_resolution, vec!["Peru".to_string()]);
        assert_eq!(outcome.unused_supplied, vec!["Peru".to_string()]);
    }

    #[test]
    fn test_palestinian_territory_needs_manual_resolution() {
        let tables = MappingTables::builtin().unwrap();
        let augmenter = CoordinateAugmenter::with_mappings(&tables);

        // Dataset uses the canonical name, coordinates were typed under the alias
        let outcome = augmenter.augment(
            &base_table(),
            &missing(&["Palestine"]),
            &supplied(&[("Palestinian Territory", 31.9522, 35.2332)]),
        );

        assert!(!outcome.changed());
        assert!(!outcome.table.contains("Palestine"));
        assert!(!outcome.table.contains("Palestinian Territory"));
        assert_eq!(outcome.needs_manual_resolution, vec!["Palestine".to_string()]);
        assert_eq!(outcome.diagnostics.of_kind("AliasConflict").len(), 1);
    }

    #[test]
    fn test_alias_spelling_in_missing_set_flagged() {
        let tables = MappingTables::builtin().unwrap();
        let augmenter = CoordinateAugmenter::with_mappings(&tables);

        let outcome = augmenter.augment(
            &base_table(),
            &missing(&["Palestinian Territory"]),
            &supplied(&[("Palestinian Territory", 31.9522, 35.2332)]),
        );

        assert!(!outcome.changed());
        assert_eq!(
            outcome.needs_manual_resolution,
            vec!["Palestinian Territory".to_string()]
        );
        assert_eq!(outcome.unused_supplied, vec!["Palestinian Territory".to_string()]);
    }

    #[test]
    fn test_existing_entry_under_alias_flagged() {
        let tables = MappingTables::builtin().unwrap();
        let augmenter = CoordinateAugmenter::with_mappings(&tables);
        let mut table = base_table();
        table.insert_new(CoordinateEntry::new("Palestinian Territory", 31.9522, 35.2332));

        let outcome = augmenter.augment(
            &table,
            &missing(&["Palestine"]),
            &supplied(&[("Palestine", 31.95, 35.23)]),
        );

        assert!(!outcome.changed());
        assert_eq!(outcome.needs_manual_resolution, vec!["Palestine".to_string()]);
    }

    #[test]
    fn test_resolve_reaches_fixed_point() {
        let tables = MappingTables::builtin().unwrap();
        let engine = ReconciliationEngine::new();
        let augmenter = CoordinateAugmenter::with_mappings(&tables);

        let records = vec![
            CanonicalRecord::new("Data", "2025", "Spain", Region::Emea),
            CanonicalRecord::new("Data", "2025", "Angola", Region::Emea),
            CanonicalRecord::new("Data", "2025", "Atlantis", Region::Unknown),
        ];
        let coords = supplied(&[("Angola", -11.2027, 17.8739)]);

        let resolution = resolve_coordinates(&engine, &augmenter, &records, &base_table(), &coords);

        assert!(resolution.changed());
        assert_eq!(resolution.rounds, 2);
        assert!(resolution.table.contains("Angola"));
        assert_eq!(
            resolution.report.missing_countries(),
            missing(&["Atlantis"])
        );
    }

    #[test]
    fn test_resolve_stops_immediately_when_complete() {
        let engine = ReconciliationEngine::new();
        let augmenter = CoordinateAugmenter::new();
        let records = vec![CanonicalRecord::new("Data", "2025", "India", Region::Apj)];

        let resolution =
            resolve_coordinates(&engine, &augmenter, &records, &base_table(), &supplied(&[]));

        assert_eq!(resolution.rounds, 1);
        assert!(!resolution.changed());
        assert!(resolution.report.is_complete());
    }

    #[test]
    fn test_load_manual_coordinates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ " Angola ": [-11.2027, 17.8739], "Peru": [-9.19, -75.0152] }"#)
            .unwrap();

        let coords = load_manual_coordinates(file.path()).unwrap();

        assert_eq!(coords.get("Angola"), Some(&(-11.2027, 17.8739)));
        assert_eq!(coords.len(), 2);
    }

    #[test]
    fn test_manual_coordinates_duplicate_after_trim_rejected() {
        let result =
            parse_manual_coordinates(r#"{ "Angola": [-11.2, 17.8], " Angola ": [0.0, 0.0] }"#);
        assert!(result.is_err());

        let exact = parse_manual_coordinates(r#"{ "Peru": [-9.19, -75.0], "Peru": [1.0, 1.0] }"#);
        assert!(exact.is_err());

        let fine = parse_manual_coordinates(r#"{ "Peru": [-9.19, -75.0] }"#).unwrap();
        assert_eq!(fine.len(), 1);
    }

    #[test]
    fn test_shipped_manual_coordinates_parse() {
        let coords =
            parse_manual_coordinates(include_str!("../data/manual_coordinates.json")).unwrap();
        assert!(coords.contains_key("Uganda"));
        assert!(coords.values().all(|(lat, lon)| is_valid_position(*lat, *lon)));
    }
}
