// 🗺️ Mapping Tables - Aliases and regions as versioned data
//
// The tables live in a JSON asset (data/mappings.json) instead of code,
// so a new yearly export only needs a data edit. Lookups are exact on the
// trimmed value and fall back to passing the raw value through.

use crate::error::PipelineError;
use crate::records::Region;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Mapping asset compiled into the binary
const BUILTIN_MAPPINGS: &str = include_str!("../data/mappings.json");

// ============================================================================
// MAPPING TABLES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingTables {
    /// Release label of this table set (e.g. "2025.1")
    pub version: String,

    /// Category values that mark a row as invalid
    #[serde(default)]
    pub invalid_categories: Vec<String>,

    /// The fixed category vocabulary the dashboard knows about
    #[serde(default)]
    pub canonical_categories: Vec<String>,

    /// Raw country spelling → canonical country name
    #[serde(default)]
    pub country_aliases: BTreeMap<String, String>,

    /// Raw category label → canonical category
    #[serde(default)]
    pub category_aliases: BTreeMap<String, String>,

    /// Canonical country → region
    #[serde(default)]
    pub regions: BTreeMap<String, Region>,
}

impl MappingTables {
    /// Tables shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_MAPPINGS).context("Failed to parse built-in mapping tables")
    }

    /// Load tables from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read mappings file: {:?}", path.as_ref()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to load mappings file: {:?}", path.as_ref()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let tables: MappingTables =
            serde_json::from_str(content).context("Failed to parse mappings JSON")?;
        tables.validate()?;
        Ok(tables)
    }

    /// Reject empty keys and alias chains (a target that is itself an alias)
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        if self.version.trim().is_empty() {
            return Err(PipelineError::InvalidMappings(
                "version label is empty".to_string(),
            ));
        }

        for (name, table) in [
            ("country_aliases", &self.country_aliases),
            ("category_aliases", &self.category_aliases),
        ] {
            for (alias, target) in table {
                if alias.trim().is_empty() || target.trim().is_empty() {
                    return Err(PipelineError::InvalidMappings(format!(
                        "{} has an empty entry ('{}' -> '{}')",
                        name, alias, target
                    )));
                }
                if alias != target && table.contains_key(target) && table[target] != *target {
                    return Err(PipelineError::InvalidMappings(format!(
                        "{}: '{}' maps to '{}', which is itself an alias of '{}'",
                        name, alias, target, table[target]
                    )));
                }
            }
        }

        if let Some(country) = self.regions.keys().find(|c| c.trim().is_empty()) {
            return Err(PipelineError::InvalidMappings(format!(
                "regions has an empty country key ('{}')",
                country
            )));
        }

        Ok(())
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    /// Canonical country name, or the trimmed raw value if unmapped
    pub fn clean_country(&self, raw: &str) -> String {
        let value = raw.trim();
        self.country_aliases
            .get(value)
            .cloned()
            .unwrap_or_else(|| value.to_string())
    }

    /// Canonical category, or the trimmed raw value if unmapped
    pub fn clean_category(&self, raw: &str) -> String {
        let value = raw.trim();
        self.category_aliases
            .get(value)
            .cloned()
            .unwrap_or_else(|| value.to_string())
    }

    pub fn region_of(&self, country: &str) -> Region {
        self.regions
            .get(country.trim())
            .copied()
            .unwrap_or(Region::Unknown)
    }

    pub fn is_invalid_category(&self, category: &str) -> bool {
        let value = category.trim();
        self.invalid_categories.iter().any(|m| m == value)
    }

    /// Known canonical spelling: has a region or is an alias target
    pub fn is_known_country(&self, country: &str) -> bool {
        self.regions.contains_key(country) || self.country_aliases.values().any(|c| c == country)
    }

    pub fn is_known_category(&self, category: &str) -> bool {
        self.canonical_categories.iter().any(|c| c == category)
            || self.category_aliases.values().any(|c| c == category)
    }

    /// Canonical name when `name` is an alias for a different country
    pub fn canonical_country_for(&self, name: &str) -> Option<&str> {
        self.country_aliases
            .get(name.trim())
            .map(|s| s.as_str())
            .filter(|target| *target != name.trim())
    }

    /// Every spelling (canonical plus aliases) that resolves to `canonical`
    pub fn spellings_of<'a>(&'a self, canonical: &'a str) -> Vec<&'a str> {
        let mut spellings = vec![canonical];
        spellings.extend(
            self.country_aliases
                .iter()
                .filter(|(alias, target)| target.as_str() == canonical && alias.as_str() != canonical)
                .map(|(alias, _)| alias.as_str()),
        );
        spellings
    }

    /// SHA-256 of the serialized tables, recorded with each published dataset
    pub fn fingerprint(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn summary(&self) -> String {
        format!(
            "mappings {}: {} country aliases, {} category aliases, {} regions, {} invalid markers",
            self.version,
            self.country_aliases.len(),
            self.category_aliases.len(),
            self.regions.len(),
            self.invalid_categories.len()
        )
    }
}

// ============================================================================
// CROSS-VERSION CONFLICTS
// ============================================================================

/// Same key mapped to different values in two table versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasConflict {
    pub table: String,
    pub key: String,
    pub older: String,
    pub newer: String,
}

/// List keys whose mapping changed between two versions. These are
/// reported for a human to settle; neither value wins automatically.
pub fn alias_conflicts(older: &MappingTables, newer: &MappingTables) -> Vec<AliasConflict> {
    let mut conflicts = Vec::new();

    for (name, old_table, new_table) in [
        ("country_aliases", &older.country_aliases, &newer.country_aliases),
        ("category_aliases", &older.category_aliases, &newer.category_aliases),
    ] {
        for (key, old_value) in old_table {
            if let Some(new_value) = new_table.get(key) {
                if new_value != old_value {
                    conflicts.push(AliasConflict {
                        table: name.to_string(),
                        key: key.clone(),
                        older: old_value.clone(),
                        newer: new_value.clone(),
                    });
                }
            }
        }
    }

    for (country, old_region) in &older.regions {
        if let Some(new_region) = newer.regions.get(country) {
            if new_region != old_region {
                conflicts.push(AliasConflict {
                    table: "regions".to_string(),
                    key: country.clone(),
                    older: old_region.to_string(),
                    newer: new_region.to_string(),
                });
            }
        }
    }

    conflicts
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_tables() -> MappingTables {
        MappingTables::from_json(
            r#"{
                "version": "test.1",
                "invalid_categories": ["A"],
                "canonical_categories": ["Data", "Serverless"],
                "country_aliases": {
                    "Germany (DE)": "Germany",
                    "Palestinian Territory": "Palestine"
                },
                "category_aliases": { "AI Engineering": "Machine Learning & GenAI" },
                "regions": { "Germany": "EMEA", "Palestine": "EMEA", "USA": "NAMER" }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_tables_load() {
        let tables = MappingTables::builtin().unwrap();

        assert!(!tables.version.is_empty());
        assert!(tables.country_aliases.len() > 80);
        assert_eq!(tables.clean_country("Germany (DE)"), "Germany");
        assert_eq!(tables.clean_country("T√ºrkiye / Turkey (TR)"), "Turkey");
        assert_eq!(tables.region_of("Germany"), Region::Emea);
        assert_eq!(tables.region_of("Hong Kong"), Region::Gcr);
        assert!(tables.is_invalid_category("A"));

        println!("✅ {}", tables.summary());
    }

    #[test]
    fn test_passthrough_for_unmapped_values() {
        let tables = small_tables();

        assert_eq!(tables.clean_country("  Atlantis "), "Atlantis");
        assert_eq!(tables.clean_category("Quantum"), "Quantum");
        assert_eq!(
            tables.clean_category("AI Engineering"),
            "Machine Learning & GenAI"
        );
    }

    #[test]
    fn test_region_unknown_sentinel() {
        let tables = small_tables();
        assert_eq!(tables.region_of("Atlantis"), Region::Unknown);
        assert_eq!(tables.region_of("USA"), Region::Namer);
    }

    #[test]
    fn test_known_values() {
        let tables = small_tables();

        assert!(tables.is_known_country("Germany"));
        assert!(tables.is_known_country("Palestine"));
        assert!(!tables.is_known_country("Atlantis"));
        assert!(tables.is_known_category("Serverless"));
        assert!(tables.is_known_category("Machine Learning & GenAI"));
        assert!(!tables.is_known_category("Quantum"));
    }

    #[test]
    fn test_canonical_country_for_alias() {
        let tables = small_tables();

        assert_eq!(
            tables.canonical_country_for("Palestinian Territory"),
            Some("Palestine")
        );
        assert_eq!(tables.canonical_country_for("Palestine"), None);
        assert_eq!(
            tables.spellings_of("Palestine"),
            vec!["Palestine", "Palestinian Territory"]
        );
    }

    #[test]
    fn test_spellings_of_borrowed_name() {
        let tables = small_tables();
        let name = String::from("Germany");

        let spellings = tables.spellings_of(&name);
        assert_eq!(spellings, vec!["Germany", "Germany (DE)"]);
        assert_eq!(tables.spellings_of("Atlantis"), vec!["Atlantis"]);
    }

    #[test]
    fn test_alias_chain_rejected() {
        let result = MappingTables::from_json(
            r#"{
                "version": "bad",
                "country_aliases": { "Deutschland": "Germany (DE)", "Germany (DE)": "Germany" }
            }"#,
        );

        let err = result.unwrap_err();
        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(pipeline_err, PipelineError::InvalidMappings(_)));
    }

    #[test]
    fn test_identity_alias_allowed() {
        let tables = MappingTables::from_json(
            r#"{ "version": "ok", "category_aliases": { "Data": "Data", "Big Data": "Data" } }"#,
        )
        .unwrap();
        assert_eq!(tables.clean_category("Big Data"), "Data");
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = small_tables();
        let mut b = small_tables();

        assert_eq!(a.fingerprint(), b.fingerprint());

        b.country_aliases
            .insert("Spain (ES)".to_string(), "Spain".to_string());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_alias_conflicts_across_versions() {
        let older = small_tables();
        let mut newer = small_tables();
        newer.version = "test.2".to_string();
        newer.country_aliases.insert(
            "Palestinian Territory".to_string(),
            "Palestinian Territories".to_string(),
        );
        newer.regions.insert("USA".to_string(), Region::Latam);

        let conflicts = alias_conflicts(&older, &newer);

        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].table, "country_aliases");
        assert_eq!(conflicts[0].key, "Palestinian Territory");
        assert_eq!(conflicts[0].older, "Palestine");
        assert_eq!(conflicts[0].newer, "Palestinian Territories");
        assert_eq!(conflicts[1].table, "regions");
        assert_eq!(conflicts[1].newer, "LATAM");
    }
}
