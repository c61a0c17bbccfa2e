//! Path normalization for `#line` pragmas.
//!
//! Generated sources carry line pragmas pointing at the template they were
//! produced from. The resolver decides which path a pragma ends up naming so
//! diagnostics point at the logical template file rather than the generated
//! working file. It does not resolve nested references and it does not read
//! files; both fail loudly.

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePathResolver {
    source_file: PathBuf,
}

impl TemplatePathResolver {
    pub fn new(source_file: impl Into<PathBuf>) -> Self {
        TemplatePathResolver {
            source_file: source_file.into(),
        }
    }

    /// The generated working source file this resolver was built for.
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Normalize a pragma path.
    ///
    /// An existing `path` is kept whatever the base is. Without a base an
    /// empty `path` maps to the working source file and anything else is
    /// kept. With a base the base wins.
    pub fn normalize(&self, path: &Path, base: Option<&Path>) -> PathBuf {
        if path.is_file() {
            return path.to_path_buf();
        }

        match base {
            Some(base) if !base.as_os_str().is_empty() => base.to_path_buf(),
            _ if path.as_os_str().is_empty() => self.source_file.clone(),
            _ => path.to_path_buf(),
        }
    }

    pub fn resolve_reference(&self, _path: &Path, _base: Option<&Path>) -> Result<PathBuf, CompileError> {
        Err(CompileError::Unsupported("resolving a source reference"))
    }

    pub fn open_read(&self, _path: &Path) -> Result<Box<dyn Read>, CompileError> {
        Err(CompileError::Unsupported("reading a source reference"))
    }
}
