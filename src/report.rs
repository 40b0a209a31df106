//! Report sinks.
//!
//! The translator receives an error report and a debug report from the
//! driving compiler and carries both through to the output unit. The debug
//! report collects titled sections (the RAM dump lands in section
//! `"ram-program"`); the error report collects diagnostics for the driver's
//! user-facing output.

use serde::Serialize;
use std::fmt;

/// One titled section of the debug report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSection {
    pub id: String,
    pub title: String,
    pub body: String,
}

/// Accumulating debug report
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugReport {
    sections: Vec<ReportSection>,
}

impl DebugReport {
    pub fn new() -> Self {
        DebugReport::default()
    }

    pub fn add_section(
        &mut self,
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) {
        self.sections.push(ReportSection {
            id: id.into(),
            title: title.into(),
            body: body.into(),
        });
    }

    pub fn sections(&self) -> &[ReportSection] {
        &self.sections
    }

    pub fn section(&self, id: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.id == id)
    }
}

impl fmt::Display for DebugReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for section in &self.sections {
            writeln!(f, "== {} ==", section.title)?;
            writeln!(f, "{}", section.body)?;
        }
        Ok(())
    }
}

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

/// One diagnostic message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Accumulating error report
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorReport {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReport {
    pub fn new() -> Self {
        ErrorReport::default()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
        });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_report_sections() {
        let mut report = DebugReport::new();
        report.add_section("ram-program", "RAM Program (0.01s)", "PROGRAM ...");
        assert_eq!(report.sections().len(), 1);
        assert!(report.section("ram-program").is_some());
        assert!(report.to_string().contains("RAM Program"));
    }

    #[test]
    fn test_error_report() {
        let mut report = ErrorReport::new();
        report.warning("minor");
        assert!(!report.has_errors());
        report.error("major");
        assert!(report.has_errors());
        assert_eq!(report.diagnostics().len(), 2);
    }
}
