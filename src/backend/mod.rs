//! The compiler backend capability.
//!
//! A backend knows one source language. The service builds a
//! [`CompilationUnit`] through it and asks it to emit the unit into a binary
//! stream and, optionally, a debug-information stream.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use target_lexicon::{BinaryFormat, OperatingSystem, Triple};

use crate::diagnostic::BackendDiagnostic;
use crate::error::CompileError;
use crate::reference::MaterializedReference;
use crate::request::CompileRequest;
use crate::resolver::TemplatePathResolver;

pub mod cc;

pub use cc::CcBackend;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OutputKind {
    #[default]
    DynamicLibrary,
    Object,
}

/// Format of the companion debug-information stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DebugFormat {
    /// The platform's native format
    #[default]
    Native,
    /// A self-contained format readable without the native toolchain
    Portable,
}

/// `#line N "path"` found in a syntax unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePragma {
    /// Zero-based line of the directive itself
    pub directive_line: usize,
    pub target_line: usize,
    pub path: PathBuf,
}

/// Parsed form of one source file.
#[derive(Debug, Clone)]
pub struct SyntaxUnit {
    pub text: String,
    pub path: PathBuf,
    pub pragmas: Vec<LinePragma>,
}

impl SyntaxUnit {
    /// Build a unit, collecting its `#line` pragmas.
    pub fn parse(text: &str, path: &Path) -> Self {
        SyntaxUnit {
            text: text.to_string(),
            path: path.to_path_buf(),
            pragmas: scan_line_pragmas(text),
        }
    }
}

/// Find every `#line N "path"` directive. Directives without a path are skipped.
pub fn scan_line_pragmas(text: &str) -> Vec<LinePragma> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let rest = line.trim_start().strip_prefix('#')?.trim_start().strip_prefix("line")?;
            let rest = rest.trim_start();
            let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            let target_line = rest[..digits].parse().ok()?;
            let quoted = rest[digits..].trim();
            let path = quoted.strip_prefix('"')?.strip_suffix('"')?;
            Some(LinePragma {
                directive_line: index,
                target_line,
                path: PathBuf::from(path),
            })
        })
        .collect()
}

/// Options a unit is compiled with.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub output_kind: OutputKind,
    pub target: Triple,
    /// Raw backend arguments, in order
    pub args: Vec<String>,
    pub path_resolver: Option<Arc<TemplatePathResolver>>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            output_kind: OutputKind::default(),
            target: Triple::host(),
            args: Vec::new(),
            path_resolver: None,
        }
    }
}

impl CompileOptions {
    pub fn with_output_kind(mut self, output_kind: OutputKind) -> Self {
        self.output_kind = output_kind;
        self
    }

    pub fn with_target(mut self, target: Triple) -> Self {
        self.target = target;
        self
    }

    pub fn with_path_resolver(mut self, resolver: TemplatePathResolver) -> Self {
        self.path_resolver = Some(Arc::new(resolver));
        self
    }
}

/// File extension of a dynamically loadable library on `target`.
pub fn dylib_extension(target: &Triple) -> &'static str {
    match target.binary_format {
        BinaryFormat::Coff => "dll",
        BinaryFormat::Macho => "dylib",
        _ if target.operating_system == OperatingSystem::Windows => "dll",
        _ => "so",
    }
}

/// Everything the backend needs to emit a module.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub name: String,
    pub syntax_units: Vec<SyntaxUnit>,
    pub references: Vec<MaterializedReference>,
    pub options: CompileOptions,
}

impl CompilationUnit {
    pub fn new(name: impl Into<String>) -> Self {
        CompilationUnit {
            name: name.into(),
            syntax_units: Vec::new(),
            references: Vec::new(),
            options: CompileOptions::default(),
        }
    }

    pub fn add_syntax_unit(mut self, unit: SyntaxUnit) -> Self {
        self.syntax_units.push(unit);
        self
    }

    pub fn add_references(mut self, references: impl IntoIterator<Item = MaterializedReference>) -> Self {
        self.references.extend(references);
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    pub debug_format: DebugFormat,
}

#[derive(Debug, Clone, Default)]
pub struct EmitResult {
    pub success: bool,
    pub diagnostics: Vec<BackendDiagnostic>,
}

impl EmitResult {
    pub fn has_errors(&self) -> bool {
        !self.success || self.diagnostics.iter().any(BackendDiagnostic::is_error)
    }
}

/// A compiler for one source language.
pub trait CompilerBackend: Send + Sync {
    /// Name of the source language, for logs
    fn language(&self) -> &str;

    /// Extension of the working source file, without the dot
    fn source_extension(&self) -> &str;

    /// Extension of the debug-information file in `format`, without the dot
    fn debug_extension(&self, format: DebugFormat) -> &str;

    fn empty_unit(&self, name: &str) -> CompilationUnit {
        CompilationUnit::new(name)
    }

    fn parse_source(&self, text: &str, path: &Path) -> SyntaxUnit {
        SyntaxUnit::parse(text, path)
    }

    /// Options derived from the request, before the service adjusts output settings.
    fn default_options(&self, request: &CompileRequest) -> CompileOptions;

    /// Emit `unit` into `binary`, and into `debug` when given.
    ///
    /// Compile failures are reported through the result's diagnostics; an
    /// `Err` means the backend itself could not run.
    fn emit(
        &self,
        unit: &CompilationUnit,
        binary: &mut dyn Write,
        debug: Option<&mut dyn Write>,
        options: &EmitOptions,
    ) -> Result<EmitResult, CompileError>;
}
