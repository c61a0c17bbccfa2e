//! Backend diagnostics and their translation into template diagnostics.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Diagnostic severity levels as reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Hidden,
    Info,
    Warning,
    Error,
}

/// Zero-based start position of a diagnostic in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSpan {
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
}

/// A diagnostic in the shape the backend produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDiagnostic {
    pub severity: Severity,
    pub id: String,
    pub message: String,
    pub location: Option<LineSpan>,
}

impl BackendDiagnostic {
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        BackendDiagnostic {
            severity: Severity::Error,
            id: id.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, path: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        self.location = Some(LineSpan {
            path: path.into(),
            line,
            column,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Language-agnostic diagnostic attached to a failed compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateDiagnostic {
    pub message: String,
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
    pub code: String,
    pub is_warning: bool,
}

impl fmt::Display for TemplateDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_warning { "warning" } else { "error" };
        write!(f, "{}({}, {}): {}", self.path.display(), self.line, self.column, kind)?;
        if !self.code.is_empty() {
            write!(f, " {}", self.code)?;
        }
        write!(f, ": {}", self.message)
    }
}

pub fn translate(diag: &BackendDiagnostic) -> TemplateDiagnostic {
    let (path, line, column) = match &diag.location {
        Some(span) => (span.path.clone(), span.line, span.column),
        None => (PathBuf::new(), 0, 0),
    };
    TemplateDiagnostic {
        message: diag.message.clone(),
        path,
        line,
        column,
        code: diag.id.clone(),
        is_warning: diag.severity != Severity::Error,
    }
}

/// Translate every diagnostic, keeping the backend's order.
pub fn translate_all(diagnostics: &[BackendDiagnostic]) -> Vec<TemplateDiagnostic> {
    diagnostics.iter().map(translate).collect()
}

/// Formatter for printing diagnostics on a terminal
pub struct ErrorFormatter {
    pub show_source: bool,
    pub use_colors: bool,
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        ErrorFormatter {
            show_source: true,
            use_colors: false,
        }
    }
}

impl ErrorFormatter {
    /// Format a single diagnostic, quoting the offending line of `source` when known.
    pub fn format_diagnostic(&self, diag: &TemplateDiagnostic, source: Option<(&Path, &str)>) -> String {
        let level_str = match (diag.is_warning, self.use_colors) {
            (false, true) => "\x1b[31merror\x1b[0m",
            (true, true) => "\x1b[33mwarning\x1b[0m",
            (false, false) => "error",
            (true, false) => "warning",
        };

        let mut result = if diag.code.is_empty() {
            format!("{}: {}", level_str, diag.message)
        } else {
            format!("{}[{}]: {}", level_str, diag.code, diag.message)
        };

        if !diag.path.as_os_str().is_empty() {
            // positions are printed one-based like every other compiler
            result.push_str(&format!(
                "\n --> {}:{}:{}",
                diag.path.display(),
                diag.line + 1,
                diag.column + 1
            ));
        }

        if self.show_source
            && let Some((path, text)) = source
            && path == diag.path
            && let Some(line) = text.lines().nth(diag.line)
        {
            result.push_str(&format!("\n  |\n  | {}\n  |", line));
        }

        result
    }

    pub fn format_diagnostics(&self, diagnostics: &[TemplateDiagnostic], source: Option<(&Path, &str)>) -> String {
        diagnostics
            .iter()
            .map(|diag| self.format_diagnostic(diag, source))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Print all diagnostics to stderr
    pub fn print_diagnostics(&self, diagnostics: &[TemplateDiagnostic], source: Option<(&Path, &str)>) {
        for diag in diagnostics {
            eprintln!("{}", self.format_diagnostic(diag, source));
        }
    }
}
