// 🧾 Records - Raw export rows and canonical dataset rows
//
// RawRecord is what the yearly export gives us (free text everywhere).
// CanonicalRecord is what the dashboard consumes: the region is always
// derived from the country, never read from the export.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// REGION
// ============================================================================

/// Coarse geographic grouping derived from the canonical country name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "APJ")]
    Apj,
    #[serde(rename = "EMEA")]
    Emea,
    #[serde(rename = "GCR")]
    Gcr,
    #[serde(rename = "LATAM")]
    Latam,
    #[serde(rename = "NAMER")]
    Namer,
    /// Sentinel for countries with no region mapping
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Region {
    pub const ALL: [Region; 6] = [
        Region::Apj,
        Region::Emea,
        Region::Gcr,
        Region::Latam,
        Region::Namer,
        Region::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Apj => "APJ",
            Region::Emea => "EMEA",
            Region::Gcr => "GCR",
            Region::Latam => "LATAM",
            Region::Namer => "NAMER",
            Region::Unknown => "UNKNOWN",
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Region::Unknown
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown region label: {}", s))
    }
}

// ============================================================================
// COHORT
// ============================================================================

/// Batch/year label. Labels sort by their leading year ("2019" < "2024");
/// within one year, suffixed variants ("2020 beta") come before the plain
/// year. Labels with no leading year sort as text after all years.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cohort(String);

impl Cohort {
    pub fn new(label: impl Into<String>) -> Self {
        Cohort(label.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leading year and whether anything follows it
    fn year(&self) -> Option<(i64, bool)> {
        let digits = self.0.len() - self.0.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let year = self.0[..digits].parse::<i64>().ok()?;
        Some((year, digits < self.0.len()))
    }
}

impl Ord for Cohort {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.year(), other.year()) {
            // suffixed (true) before plain (false) within a year
            (Some((a, a_suffixed)), Some((b, b_suffixed))) => a
                .cmp(&b)
                .then_with(|| b_suffixed.cmp(&a_suffixed))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Cohort {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cohort {
    fn from(label: &str) -> Self {
        Cohort::new(label)
    }
}

// ============================================================================
// RAW RECORD
// ============================================================================

/// One membership entry as exported by the source system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub category: String,
    pub cohort: String,
    pub country: String,

    /// Line in the export file (1-indexed, header is line 1)
    pub line: usize,
}

impl RawRecord {
    pub fn new(category: &str, cohort: &str, country: &str) -> Self {
        RawRecord {
            category: category.trim().to_string(),
            cohort: cohort.trim().to_string(),
            country: country.trim().to_string(),
            line: 0,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }
}

// ============================================================================
// CANONICAL RECORD
// ============================================================================

/// Cleaned record. Field order doubles as the stable sort key
/// (category, cohort, country) used for reproducible output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub category: String,
    pub cohort: Cohort,
    pub country: String,
    pub region: Region,
}

impl CanonicalRecord {
    pub fn new(category: &str, cohort: &str, country: &str, region: Region) -> Self {
        CanonicalRecord {
            category: category.to_string(),
            cohort: Cohort::new(cohort),
            country: country.to_string(),
            region,
        }
    }

    /// Fields that are empty, by column name
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.category.trim().is_empty() {
            missing.push("category");
        }
        if self.cohort.is_empty() {
            missing.push("cohort");
        }
        if self.country.trim().is_empty() {
            missing.push("country");
        }
        missing
    }
}

// ============================================================================
// TESTS
// ============================================================================
