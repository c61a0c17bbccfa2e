use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::CompileError;

/// Provenance of one compilation, kept whether it succeeded or failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompilationRecord {
    pub source_code: String,
    pub working_dir: Option<PathBuf>,
    /// Working file the source was written to
    pub source_file: Option<PathBuf>,
}

impl CompilationRecord {
    pub fn new(source_code: impl Into<String>, files: &WorkingFiles) -> Self {
        CompilationRecord {
            source_code: source_code.into(),
            working_dir: Some(files.dir.clone()),
            source_file: Some(files.source.clone()),
        }
    }

    /// Remove the working directory and everything in it.
    pub fn delete_all(&self) -> Result<(), CompileError> {
        match &self.working_dir {
            Some(dir) if dir.exists() => std::fs::remove_dir_all(dir).map_err(|e| CompileError::io(dir, e)),
            _ => Ok(()),
        }
    }
}

/// Paths of the files written for one compile attempt
#[derive(Debug, Clone)]
pub struct WorkingFiles {
    pub dir: PathBuf,
    pub source: PathBuf,
    pub binary: PathBuf,
    pub debug: PathBuf,
}

impl WorkingFiles {
    pub fn new(dir: &Path, unit_name: &str, source_ext: &str, binary_ext: &str, debug_ext: &str) -> Self {
        WorkingFiles {
            dir: dir.to_path_buf(),
            source: dir.join(format!("{}.{}", unit_name, source_ext)),
            binary: dir.join(format!("{}.{}", unit_name, binary_ext)),
            debug: dir.join(format!("{}.{}", unit_name, debug_ext)),
        }
    }
}
