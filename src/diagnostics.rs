use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    SubjectsFound,
    Classified,
    Excluded,
    UnknownModality,
    NonUtf8Path,
    MissingSidecar,
    MissingCompanion,
    AmbiguousCompanion,
    MalformedEvent,
    UnknownIntendedFor,
    DestinationExists,
    Overwrite,
    Transfer,
    EventsMerged,
    SidecarPatched,
    Rename,
    DatasetName,
    DatasetMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub path: Option<String>,
}

impl Diagnostic {
    pub fn info(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Info, message)
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Warning, message)
    }

    pub fn debug(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Debug, message)
    }

    pub fn at(mut self, path: impl ToString) -> Self {
        self.path = Some(path.to_string());
        self
    }

    fn new(kind: DiagnosticKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            path: None,
        }
    }
}

pub trait DiagnosticSink {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Forwards every diagnostic to `tracing` and keeps a copy for the final report.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.severity == Severity::Warning)
            .collect()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.kind == kind)
            .count()
    }
}

impl DiagnosticSink for DiagnosticLog {
    fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Debug => tracing::debug!(kind = ?diagnostic.kind, "{}", diagnostic.message),
            Severity::Info => tracing::info!("{}", diagnostic.message),
            Severity::Warning => tracing::warn!("{}", diagnostic.message),
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_counts_by_kind_and_severity() {
        let log = DiagnosticLog::new();
        log.emit(Diagnostic::warning(DiagnosticKind::MissingSidecar, "no sidecar"));
        log.emit(Diagnostic::info(DiagnosticKind::Transfer, "copy a --> b").at("b"));
        log.emit(Diagnostic::warning(DiagnosticKind::MissingCompanion, "no bval"));

        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.warnings().len(), 2);
        assert_eq!(log.count(DiagnosticKind::Transfer), 1);
        assert_eq!(log.entries()[1].path.as_deref(), Some("b"));
    }
}
