//! Structured Feedback Module
//!
//! Machine-readable check results: parse diagnostics, unreachable
//! statements and unassigned-variable reads, plus basic statistics.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::analysis::{unassigned_variables, unreachable_statements};
use crate::frontend::ast::Procedure;
use crate::utils::{Diagnostic, Severity, Span};

// ==================== Structured Reports ====================

/// One analyser finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingReport {
    /// `unreachable` or `unassigned`
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub location: Location,
    /// Suggested fix
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Location {
    fn new(file: &str, span: Span) -> Self {
        Self {
            file: file.to_string(),
            line: span.line,
            column: span.col,
            end_line: span.end_line,
            end_column: span.end_col,
        }
    }
}

/// Which analyses a check runs
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    pub unreachable: bool,
    pub unassigned: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self { unreachable: true, unassigned: true }
    }
}

// ==================== Check Report ====================

/// Complete check result for one procedure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    /// No error-severity diagnostics
    pub success: bool,

    pub source_file: String,

    /// Procedure name from the header, empty when absent
    pub procedure: String,

    /// Lexer, parser and symbol diagnostics
    pub diagnostics: Vec<Diagnostic>,

    /// Analyser findings; empty when the parse had errors
    pub findings: Vec<FindingReport>,

    pub stats: CheckStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckStats {
    /// Analysis time in milliseconds
    pub analysis_time_ms: u64,

    /// Top-level statements
    pub statement_count: usize,

    pub symbol_count: usize,

    pub label_count: usize,

    /// Lines of code
    pub loc: usize,
}

impl CheckReport {
    /// Run the selected analyses over a parsed procedure.
    ///
    /// Analysers assume a recovered tree; they are skipped when the parse
    /// reported errors.
    pub fn build(source_file: &str, procedure: &Procedure, options: CheckOptions) -> Self {
        let started = Instant::now();
        let success = !procedure.has_errors();

        let mut findings = Vec::new();
        if success && options.unreachable {
            findings.extend(unreachable_statements(procedure).into_iter().map(|stmt| FindingReport {
                code: "unreachable".to_string(),
                severity: Severity::Warning,
                message: format!("Unreachable {} statement", stmt.kind.name()),
                location: Location::new(source_file, stmt.span),
                suggestion: Some("Remove the statement or add a jump to a label before it".to_string()),
            }));
        }
        if success && options.unassigned {
            findings.extend(unassigned_variables(procedure).into_iter().map(|finding| FindingReport {
                code: "unassigned".to_string(),
                severity: Severity::Warning,
                message: format!("Variable {} may not have been assigned", finding.name),
                location: Location::new(source_file, finding.span),
                suggestion: Some(format!("Assign {} on every path before this statement", finding.name)),
            }));
        }
        findings.sort_by_key(|f| (f.location.line, f.location.column));

        let stats = CheckStats {
            analysis_time_ms: started.elapsed().as_millis() as u64,
            statement_count: procedure.statements.len(),
            symbol_count: procedure.symbols.len(),
            label_count: procedure.labels.len(),
            loc: procedure.source.lines().count(),
        };

        Self {
            success,
            source_file: source_file.to_string(),
            procedure: procedure.name.clone(),
            diagnostics: procedure.diagnostics.clone(),
            findings,
            stats,
        }
    }

    /// Number of diagnostics and findings at `severity`
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == severity).count()
            + self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Output as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_report_collects_findings() {
        let procedure = parse("subroutine demo\nif c then a = 1\nb = a\nreturn\nx = 1\n");
        let report = CheckReport::build("DEMO", &procedure, CheckOptions::default());
        assert!(report.success);
        assert_eq!(report.procedure, "demo");
        let codes: Vec<_> = report.findings.iter().map(|f| (f.code.as_str(), f.location.line)).collect();
        assert_eq!(codes, vec![("unassigned", 2), ("unassigned", 3), ("unreachable", 5)]);
        assert_eq!(report.count(Severity::Warning), 3);
        assert_eq!(report.stats.loc, 5);
    }

    #[test]
    fn test_options_disable_analyses() {
        let procedure = parse("return\nx = y\n");
        let options = CheckOptions { unreachable: false, unassigned: true };
        let report = CheckReport::build("T", &procedure, options);
        assert!(report.findings.iter().all(|f| f.code == "unassigned"));
    }

    #[test]
    fn test_errors_skip_analysis() {
        let procedure = parse("goto nowhere\nx = y\n");
        let report = CheckReport::build("T", &procedure, CheckOptions::default());
        assert!(!report.success);
        assert!(report.findings.is_empty());
        assert_eq!(report.count(Severity::Error), 1);
    }

    #[test]
    fn test_json_shape() {
        let procedure = parse("goto nowhere\n");
        let json: serde_json::Value = serde_json::from_str(&CheckReport::build("T", &procedure, CheckOptions::default()).to_json()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["diagnostics"][0]["lineNo"], 1);
        assert_eq!(json["diagnostics"][0]["message"], "Label nowhere not defined");
    }
}
