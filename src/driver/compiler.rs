//! Compilation service orchestration module
//!
//! This module contains the service that turns a compile request into a
//! loaded template symbol: it writes the working source, materializes
//! references, drives the backend, emits the module and loads it.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use target_lexicon::Triple;

use crate::backend::{CompilationUnit, CompilerBackend, EmitOptions, EmitResult, OutputKind, dylib_extension};
use crate::diagnostic::translate_all;
use crate::error::{CompileError, TemplateCompilationError};
use crate::loader::{LoadedSymbol, ModuleLoader};
use crate::reference::ReferenceMaterializer;
use crate::request::CompileRequest;
use crate::resolver::TemplatePathResolver;

use super::artifact::{CompilationRecord, WorkingFiles};
use super::cli::ServiceConfig;

static UNIT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Compiles generated template sources and loads the result.
///
/// A service is meant to be created once and shared (`Arc`) between
/// threads. Its reference cache lives as long as the service and is never
/// trimmed.
pub struct CompilerService {
    config: ServiceConfig,
    backend: Box<dyn CompilerBackend>,
    references: ReferenceMaterializer,
    loader: ModuleLoader,
}

impl CompilerService {
    pub fn new(backend: impl CompilerBackend + 'static, config: ServiceConfig) -> Self {
        let loader = ModuleLoader::new(config.load_strategy());
        CompilerService {
            config,
            backend: Box::new(backend),
            references: ReferenceMaterializer::new(),
            loader,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn CompilerBackend {
        self.backend.as_ref()
    }

    pub fn references(&self) -> &ReferenceMaterializer {
        &self.references
    }

    /// Compile `request`, or load `prebuilt` when it names an existing module.
    ///
    /// A prebuilt module that lacks the requested symbol is reported as a
    /// cache inconsistency; it is never recompiled behind the caller's back.
    pub fn compile(
        &self,
        request: &CompileRequest,
        prebuilt: Option<&Path>,
    ) -> Result<(LoadedSymbol, CompilationRecord), CompileError> {
        let qualified_name = request.qualified_name();
        if let Some(path) = prebuilt.filter(|path| path.is_file()) {
            return self.load_prebuilt(path, &qualified_name);
        }

        let (unit_name, dir) = self.create_working_dir(&request.class_name)?;
        debug!(
            "compiling {} as {} ({}) in {}",
            qualified_name,
            unit_name,
            self.backend.language(),
            dir.display()
        );

        let target = Triple::host();
        let files = WorkingFiles::new(
            &dir,
            &unit_name,
            self.backend.source_extension(),
            dylib_extension(&target),
            self.backend.debug_extension(self.config.debug_format),
        );
        let source_file = &files.source;
        std::fs::write(source_file, &request.source).map_err(|e| CompileError::io(source_file, e))?;
        let record = CompilationRecord::new(request.source.clone(), &files);

        let references = self.references.materialize_all(&request.references)?;
        let options = self
            .backend
            .default_options(request)
            .with_output_kind(OutputKind::DynamicLibrary)
            .with_target(target)
            .with_path_resolver(TemplatePathResolver::new(source_file));
        let unit = self
            .backend
            .empty_unit(&unit_name)
            .add_syntax_unit(self.backend.parse_source(&request.source, source_file))
            .add_references(references)
            .with_options(options);

        let result = self.emit(&unit, &files)?;

        if result.has_errors() {
            info!(
                "compilation of {} failed with {} diagnostic(s)",
                qualified_name,
                result.diagnostics.len()
            );
            return Err(TemplateCompilationError {
                diagnostics: translate_all(&result.diagnostics),
                record,
                template: request.template_content.clone(),
            }
            .into());
        }
        for diag in &result.diagnostics {
            warn!("{}: {}", qualified_name, diag.message);
        }

        let debug_file = files.debug.is_file().then_some(files.debug.as_path());
        let module = self.loader.load(&files.binary, debug_file)?;
        let symbol = module
            .resolve(&qualified_name)
            .ok_or_else(|| CompileError::ModuleMismatch {
                path: files.binary.clone(),
                symbol: qualified_name.clone(),
            })?;
        Ok((symbol, record))
    }

    fn load_prebuilt(&self, path: &Path, qualified_name: &str) -> Result<(LoadedSymbol, CompilationRecord), CompileError> {
        info!("loading prebuilt module {}", path.display());
        let module = self.loader.load(path, None)?;
        let symbol = module
            .resolve(qualified_name)
            .ok_or_else(|| CompileError::CacheInconsistency {
                module: path.to_path_buf(),
                symbol: qualified_name.to_string(),
            })?;
        Ok((symbol, CompilationRecord::default()))
    }

    /// Create `{temp_root}/{unit_name}` for a fresh, process-unique unit name.
    fn create_working_dir(&self, class_name: &str) -> Result<(String, PathBuf), CompileError> {
        let root = self.config.temp_root();
        std::fs::create_dir_all(&root).map_err(|e| CompileError::io(&root, e))?;

        let stem = unit_stem(class_name);
        loop {
            let sequence = UNIT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
            let unit_name = format!("{}_{}_{}", stem, std::process::id(), sequence);
            let dir = root.join(&unit_name);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok((unit_name, dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CompileError::io(&dir, e)),
            }
        }
    }

    fn emit(&self, unit: &CompilationUnit, files: &WorkingFiles) -> Result<EmitResult, CompileError> {
        let create = |path: &Path| {
            File::create(path)
                .map(BufWriter::new)
                .map_err(|e| CompileError::io(path, e))
        };

        let mut binary = create(&files.binary)?;
        let mut debug = if self.config.include_debug_info {
            Some(create(&files.debug)?)
        } else {
            None
        };

        let options = EmitOptions {
            debug_format: self.config.debug_format,
        };
        let result = self.backend.emit(
            unit,
            &mut binary,
            debug.as_mut().map(|d| d as &mut dyn Write),
            &options,
        )?;

        binary.flush().map_err(|e| CompileError::io(&files.binary, e))?;
        drop(binary);
        if let Some(mut debug) = debug {
            debug.flush().map_err(|e| CompileError::io(&files.debug, e))?;
            drop(debug);
            let written = std::fs::metadata(&files.debug)
                .map_err(|e| CompileError::io(&files.debug, e))?
                .len();
            if written == 0 {
                std::fs::remove_file(&files.debug).map_err(|e| CompileError::io(&files.debug, e))?;
            }
        }
        Ok(result)
    }
}

/// File-name friendly form of a class name.
fn unit_stem(class_name: &str) -> String {
    let stem: String = class_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "Template".to_string() } else { stem }
}
