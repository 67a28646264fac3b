// 🩺 Diagnostics - Fail-soft findings collected by every stage
//
// No stage raises on expected data-quality conditions. Each one appends
// a Diagnostic to a DiagnosticReport and keeps going; the caller decides
// what to do with the report at the end of the run.

use serde::{Deserialize, Serialize};

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Row or entry excluded from output
    Warning,  // Kept, but needs a mapping/coordinate fix
    Info,     // Informational only
}

// ============================================================================
// DIAGNOSTIC
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Diagnostic {
    /// Row could not be parsed (wrong column count, bad number, bad label)
    MalformedInput {
        source: String,
        line: usize,
        reason: String,
        raw: String,
    },

    /// Value not found in its alias table and not already canonical
    UnmappedValue {
        field: String,
        value: String,
        occurrences: usize,
    },

    /// Canonical country with no region mapping
    UnresolvedRegion { country: String, occurrences: usize },

    /// Country has members but no map coordinates
    MissingCoordinates { country: String, count: usize },

    /// Supplied coordinate clashes with the alias table
    AliasConflict {
        country: String,
        canonical: String,
        reason: String,
    },

    /// Missing country for which no coordinate was supplied
    UnresolvedCoordinates { country: String },

    /// Rows dropped for carrying an invalid category marker
    DroppedInvalidRows { marker: String, count: usize },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::MalformedInput { .. } => Severity::Critical,
            Diagnostic::UnmappedValue { .. } => Severity::Warning,
            Diagnostic::UnresolvedRegion { .. } => Severity::Warning,
            Diagnostic::MissingCoordinates { .. } => Severity::Warning,
            Diagnostic::AliasConflict { .. } => Severity::Warning,
            Diagnostic::UnresolvedCoordinates { .. } => Severity::Warning,
            Diagnostic::DroppedInvalidRows { .. } => Severity::Info,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::MalformedInput { .. } => "MalformedInput",
            Diagnostic::UnmappedValue { .. } => "UnmappedValue",
            Diagnostic::UnresolvedRegion { .. } => "UnresolvedRegion",
            Diagnostic::MissingCoordinates { .. } => "MissingCoordinates",
            Diagnostic::AliasConflict { .. } => "AliasConflict",
            Diagnostic::UnresolvedCoordinates { .. } => "UnresolvedCoordinates",
            Diagnostic::DroppedInvalidRows { .. } => "DroppedInvalidRows",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Diagnostic::MalformedInput {
                source,
                line,
                reason,
                ..
            } => format!("{}:{}: {}", source, line, reason),
            Diagnostic::UnmappedValue {
                field,
                value,
                occurrences,
            } => format!(
                "{} '{}' has no alias mapping ({} rows, passed through)",
                field, value, occurrences
            ),
            Diagnostic::UnresolvedRegion {
                country,
                occurrences,
            } => format!(
                "country '{}' has no region mapping ({} rows, region UNKNOWN)",
                country, occurrences
            ),
            Diagnostic::MissingCoordinates { country, count } => format!(
                "country '{}' has {} members but no coordinates",
                country, count
            ),
            Diagnostic::AliasConflict {
                country,
                canonical,
                reason,
            } => format!(
                "'{}' conflicts with canonical '{}': {} (manual resolution needed)",
                country, canonical, reason
            ),
            Diagnostic::UnresolvedCoordinates { country } => {
                format!("no coordinates supplied for '{}'", country)
            }
            Diagnostic::DroppedInvalidRows { marker, count } => {
                format!("dropped {} rows with invalid category '{}'", count, marker)
            }
        }
    }
}

// ============================================================================
// DIAGNOSTIC REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: DiagnosticReport) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity() == severity)
            .count()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.kind() == kind).collect()
    }

    pub fn has_critical(&self) -> bool {
        self.count_by_severity(Severity::Critical) > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} diagnostics ({} critical, {} warning, {} info)",
            self.len(),
            self.count_by_severity(Severity::Critical),
            self.count_by_severity(Severity::Warning),
            self.count_by_severity(Severity::Info)
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> DiagnosticReport {
        let mut report = DiagnosticReport::new();
        report.push(Diagnostic::MalformedInput {
            source: "raw.csv".to_string(),
            line: 7,
            reason: "expected 3 fields, found 2".to_string(),
            raw: "Data,2024".to_string(),
        });
        report.push(Diagnostic::UnresolvedRegion {
            country: "Atlantis".to_string(),
            occurrences: 2,
        });
        report.push(Diagnostic::DroppedInvalidRows {
            marker: "A".to_string(),
            count: 1,
        });
        report
    }

    #[test]
    fn test_severity_counts() {
        let report = sample_report();

        assert_eq!(report.len(), 3);
        assert_eq!(report.count_by_severity(Severity::Critical), 1);
        assert_eq!(report.count_by_severity(Severity::Warning), 1);
        assert_eq!(report.count_by_severity(Severity::Info), 1);
        assert!(report.has_critical());

        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_of_kind_and_messages() {
        let report = sample_report();
        let unresolved = report.of_kind("UnresolvedRegion");

        assert_eq!(unresolved.len(), 1);
        assert!(unresolved[0].message().contains("Atlantis"));
        assert!(report.diagnostics[0].message().starts_with("raw.csv:7"));
    }

    #[test]
    fn test_diagnostics_serialize_with_kind_tag() {
        let diagnostic = Diagnostic::MissingCoordinates {
            country: "Atlantis".to_string(),
            count: 3,
        };
        let json = serde_json::to_value(&diagnostic).unwrap();

        assert_eq!(json["kind"], "MissingCoordinates");
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn test_extend_merges_stage_reports() {
        let mut report = DiagnosticReport::new();
        report.extend(sample_report());
        report.extend(sample_report());
        assert_eq!(report.len(), 6);
    }
}
