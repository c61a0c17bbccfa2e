use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::diagnostic::TemplateDiagnostic;
use crate::driver::artifact::CompilationRecord;

/// Errors raised by the compilation service.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(
        "Inconsistent cache module '{}': '{symbol}' is not exported. Clean up the folder '{}' and restart the application",
        .module.display(),
        .module.parent().unwrap_or(Path::new("")).display()
    )]
    CacheInconsistency { module: PathBuf, symbol: String },

    #[error(transparent)]
    Compilation(Box<TemplateCompilationError>),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load module '{}': {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Emitted module '{}' does not export '{symbol}'", .path.display())]
    ModuleMismatch { path: PathBuf, symbol: String },
}

impl CompileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompileError::Io {
            path: path.into(),
            source,
        }
    }

    /// The aggregate compile failure, if this is one.
    pub fn as_compilation(&self) -> Option<&TemplateCompilationError> {
        match self {
            CompileError::Compilation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TemplateCompilationError> for CompileError {
    fn from(err: TemplateCompilationError) -> Self {
        CompileError::Compilation(Box::new(err))
    }
}

/// All diagnostics of one failed compile attempt.
#[derive(Debug)]
pub struct TemplateCompilationError {
    pub diagnostics: Vec<TemplateDiagnostic>,
    pub record: CompilationRecord,
    pub template: Option<String>,
}

impl TemplateCompilationError {
    pub fn errors(&self) -> impl Iterator<Item = &TemplateDiagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_warning)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &TemplateDiagnostic> {
        self.diagnostics.iter().filter(|d| d.is_warning)
    }
}

impl fmt::Display for TemplateCompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Errors while compiling a template.")?;
        if let Some(dir) = &self.record.working_dir {
            writeln!(f, "Temporary files of the compilation can be found in '{}'.", dir.display())?;
        }
        for diag in &self.diagnostics {
            writeln!(f, " - {}", diag)?;
        }
        Ok(())
    }
}

impl std::error::Error for TemplateCompilationError {}
