use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use target_lexicon::Triple;

use crate::backend::{
    CompilationUnit, CompileOptions, CompilerBackend, DebugFormat, EmitOptions, EmitResult, OutputKind,
};
use crate::diagnostic::{BackendDiagnostic, Severity};
use crate::driver::cli::ServiceConfig;
use crate::driver::compiler::CompilerService;
use crate::error::CompileError;
use crate::reference::DependencyDescriptor;
use crate::request::CompileRequest;

/// What the fake backend saw on its last emit
#[derive(Debug, Default)]
struct Seen {
    units: Vec<CompilationUnit>,
    debug_requested: Vec<bool>,
    debug_format: Option<DebugFormat>,
}

/// Backend that reports canned diagnostics and writes canned bytes.
#[derive(Default)]
struct FakeBackend {
    diagnostics: Vec<BackendDiagnostic>,
    binary: Vec<u8>,
    debug: Vec<u8>,
    seen: Arc<Mutex<Seen>>,
}

impl CompilerBackend for FakeBackend {
    fn language(&self) -> &str {
        "fake"
    }

    fn source_extension(&self) -> &str {
        "fk"
    }

    fn debug_extension(&self, format: DebugFormat) -> &str {
        match format {
            DebugFormat::Native => "ndbg",
            DebugFormat::Portable => "pdbg",
        }
    }

    fn default_options(&self, request: &CompileRequest) -> CompileOptions {
        CompileOptions {
            args: request.options.clone(),
            output_kind: OutputKind::Object,
            ..CompileOptions::default()
        }
    }

    fn emit(
        &self,
        unit: &CompilationUnit,
        binary: &mut dyn Write,
        debug: Option<&mut dyn Write>,
        options: &EmitOptions,
    ) -> Result<EmitResult, CompileError> {
        let mut seen = self.seen.lock();
        seen.units.push(unit.clone());
        seen.debug_requested.push(debug.is_some());
        seen.debug_format = Some(options.debug_format);

        binary.write_all(&self.binary).unwrap();
        if let Some(debug) = debug {
            debug.write_all(&self.debug).unwrap();
        }
        Ok(EmitResult {
            success: true,
            diagnostics: self.diagnostics.clone(),
        })
    }
}

fn failing_backend() -> FakeBackend {
    FakeBackend {
        diagnostics: vec![
            BackendDiagnostic {
                severity: Severity::Warning,
                id: "W100".to_string(),
                message: "variable declared but never used".to_string(),
                location: None,
            },
            BackendDiagnostic::error("E0103", "the name 'missing' does not exist").with_location("Index.fk", 2, 7),
            BackendDiagnostic {
                severity: Severity::Info,
                id: "I1".to_string(),
                message: "declared here".to_string(),
                location: None,
            },
        ],
        ..FakeBackend::default()
    }
}

fn config_in(dir: &Path) -> ServiceConfig {
    ServiceConfig {
        temp_root: Some(dir.to_path_buf()),
        ..ServiceConfig::default()
    }
}

fn template_request() -> CompileRequest {
    CompileRequest::new("Index", "render(missing);\n")
        .with_template_content("<p>@missing</p>")
        .with_option("--strict")
}

#[test]
fn failure_aggregates_every_diagnostic_in_order() {
    let _ = env_logger::builder().is_test(true).try_init();
    let root = tempfile::tempdir().unwrap();
    let service = CompilerService::new(failing_backend(), config_in(root.path()));

    let err = service.compile(&template_request(), None).unwrap_err();
    let failure = err.as_compilation().expect("aggregate compilation error");

    let codes: Vec<_> = failure.diagnostics.iter().map(|d| d.code.as_str()).collect();
    assert_eq!(codes, vec!["W100", "E0103", "I1"]);
    assert_eq!(failure.errors().count(), 1);
    assert_eq!(failure.warnings().count(), 2);

    let error = failure.errors().next().unwrap();
    assert_eq!(error.path, PathBuf::from("Index.fk"));
    assert_eq!((error.line, error.column), (2, 7));

    assert_eq!(failure.template.as_deref(), Some("<p>@missing</p>"));
    assert_eq!(failure.record.source_code, "render(missing);\n");
    let dir = failure.record.working_dir.as_ref().unwrap();
    assert!(dir.starts_with(root.path()));

    let display = err.to_string();
    assert!(display.contains("E0103"));
    assert!(display.contains(&dir.display().to_string()));
}

#[test]
fn working_source_is_persisted_under_the_unit_name() {
    let root = tempfile::tempdir().unwrap();
    let backend = failing_backend();
    let seen = backend.seen.clone();
    let service = CompilerService::new(backend, config_in(root.path()));

    let err = service.compile(&template_request(), None).unwrap_err();
    let dir = err.as_compilation().unwrap().record.working_dir.clone().unwrap();

    let seen = seen.lock();
    let unit = &seen.units[0];
    assert!(unit.name.starts_with("Index_"));
    assert_eq!(dir.file_name().unwrap().to_string_lossy(), unit.name);

    let source = dir.join(format!("{}.fk", unit.name));
    assert_eq!(std::fs::read_to_string(&source).unwrap(), "render(missing);\n");
    assert_eq!(unit.syntax_units.len(), 1);
    assert_eq!(unit.syntax_units[0].path, source);
}

#[test]
fn unit_options_are_set_by_the_service() {
    let root = tempfile::tempdir().unwrap();
    let backend = failing_backend();
    let seen = backend.seen.clone();
    let service = CompilerService::new(backend, config_in(root.path()));
    let _ = service.compile(&template_request(), None);

    let seen = seen.lock();
    let options = &seen.units[0].options;
    assert_eq!(options.output_kind, OutputKind::DynamicLibrary);
    assert_eq!(options.target, Triple::host());
    assert_eq!(options.args, vec!["--strict"]);
    let resolver = options.path_resolver.as_ref().expect("path resolver attached");
    assert_eq!(resolver.source_file(), seen.units[0].syntax_units[0].path);
}

#[test]
fn debug_stream_only_when_enabled() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend {
        debug: b"debug bytes".to_vec(),
        ..failing_backend()
    };
    let seen = backend.seen.clone();
    let service = CompilerService::new(backend, config_in(root.path()));
    let err = service.compile(&template_request(), None).unwrap_err();
    let dir = err.as_compilation().unwrap().record.working_dir.clone().unwrap();
    assert_eq!(seen.lock().debug_requested, vec![false]);
    assert!(!std::fs::read_dir(&dir).unwrap().any(|e| {
        let path = e.unwrap().path();
        path.extension().is_some_and(|ext| ext == "ndbg" || ext == "pdbg")
    }));

    let backend = FakeBackend {
        debug: b"debug bytes".to_vec(),
        ..failing_backend()
    };
    let seen = backend.seen.clone();
    let config = ServiceConfig {
        include_debug_info: true,
        debug_format: DebugFormat::Portable,
        ..config_in(root.path())
    };
    let service = CompilerService::new(backend, config);
    let err = service.compile(&template_request(), None).unwrap_err();
    let dir = err.as_compilation().unwrap().record.working_dir.clone().unwrap();
    let seen = seen.lock();
    assert_eq!(seen.debug_requested, vec![true]);
    assert_eq!(seen.debug_format, Some(DebugFormat::Portable));
    let name = dir.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(std::fs::read(dir.join(format!("{}.pdbg", name))).unwrap(), b"debug bytes");
}

#[test]
fn empty_debug_stream_leaves_no_file() {
    let root = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
        include_debug_info: true,
        ..config_in(root.path())
    };
    let service = CompilerService::new(failing_backend(), config);
    let err = service.compile(&template_request(), None).unwrap_err();
    let dir = err.as_compilation().unwrap().record.working_dir.clone().unwrap();
    let name = dir.file_name().unwrap().to_string_lossy().into_owned();
    assert!(!dir.join(format!("{}.ndbg", name)).exists());
}

#[test]
fn references_are_materialized_once_per_service() {
    let root = tempfile::tempdir().unwrap();
    let lib = root.path().join("helpers.o");
    std::fs::write(&lib, b"object image").unwrap();

    let backend = failing_backend();
    let seen = backend.seen.clone();
    let service = CompilerService::new(backend, config_in(root.path()));

    let request = || {
        template_request()
            .with_reference(DependencyDescriptor::path(&lib))
            .with_reference(DependencyDescriptor::bytes("inline.o", b"inline image".to_vec()))
    };
    let _ = service.compile(&request(), None);
    std::fs::remove_file(&lib).unwrap();
    let _ = service.compile(&request(), None);

    assert_eq!(service.references().len(), 2);
    let seen = seen.lock();
    for unit in &seen.units {
        let images: Vec<_> = unit.references.iter().map(|r| r.image().to_vec()).collect();
        assert_eq!(images, vec![b"object image".to_vec(), b"inline image".to_vec()]);
    }
}

#[test]
fn unreadable_reference_is_an_io_error() {
    let root = tempfile::tempdir().unwrap();
    let service = CompilerService::new(failing_backend(), config_in(root.path()));
    let request = template_request().with_reference(DependencyDescriptor::path(root.path().join("missing.o")));
    let err = service.compile(&request, None).unwrap_err();
    assert!(matches!(err, CompileError::Io { .. }));
}

#[test]
fn missing_prebuilt_module_falls_back_to_compiling() {
    let root = tempfile::tempdir().unwrap();
    let backend = failing_backend();
    let seen = backend.seen.clone();
    let service = CompilerService::new(backend, config_in(root.path()));
    let missing = root.path().join("Index.so");
    let err = service.compile(&template_request(), Some(&missing)).unwrap_err();
    assert!(err.as_compilation().is_some());
    assert_eq!(seen.lock().units.len(), 1);
}

#[test]
fn garbage_module_is_not_returned() {
    let root = tempfile::tempdir().unwrap();
    let backend = FakeBackend {
        binary: b"definitely not a module".to_vec(),
        ..FakeBackend::default()
    };
    let service = CompilerService::new(backend, config_in(root.path()));
    let err = service.compile(&template_request(), None).unwrap_err();
    assert!(matches!(err, CompileError::Load { .. }));
}

#[test]
fn concurrent_compiles_use_distinct_working_dirs() {
    let root = tempfile::tempdir().unwrap();
    let service = Arc::new(CompilerService::new(failing_backend(), config_in(root.path())));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            std::thread::spawn(move || {
                let err = service.compile(&template_request(), None).unwrap_err();
                err.as_compilation().unwrap().record.working_dir.clone().unwrap()
            })
        })
        .collect();

    let mut dirs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 8);
}
