//! C backend driving the system C compiler.
//!
//! Generated C sources are compiled and linked into a shared object in a
//! scratch directory with `cc -shared -fPIC`, and the result is copied into
//! the binary stream. Diagnostics are parsed from the compiler's stderr.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use itertools::Itertools;
use log::{debug, warn};
use regex::Regex;
use target_lexicon::{BinaryFormat, Triple};

use super::{
    CompilationUnit, CompileOptions, CompilerBackend, DebugFormat, EmitOptions, EmitResult, OutputKind, SyntaxUnit,
    dylib_extension,
};
use crate::diagnostic::{BackendDiagnostic, LineSpan, Severity};
use crate::error::CompileError;
use crate::request::CompileRequest;
use crate::resolver::TemplatePathResolver;

/// `file:line:col: severity: message [flag]`, column optional
static LOCATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^:\n]+):(?P<line>\d+):(?:(?P<col>\d+):)? (?P<sev>fatal error|error|warning|note|remark): (?P<msg>.*?)(?: \[(?P<flag>[^\]\s]+)\])?$",
    )
    .expect("valid diagnostic pattern")
});

/// `tool: severity: message`
static TOOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<tool>[^:\n]+): (?P<sev>fatal error|error|warning|note): (?P<msg>.+)$")
        .expect("valid tool pattern")
});

/// `file.o:(.text+0x1c): undefined reference to ...` from the linker, with or without an `ld: ` prefix
static LINKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[^:\n]*\bld: )?(?P<file>[^:\n]+):\([^)]*\): (?P<msg>.+)$").expect("valid linker pattern")
});

const SHARED_LIBRARY_EXTENSIONS: &[&str] = &["so", "dylib", "dll"];

#[derive(Debug, Clone)]
pub struct CcBackend {
    compiler: PathBuf,
    extra_args: Vec<String>,
}

impl Default for CcBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CcBackend {
    /// Use `$CC`, falling back to `cc`.
    pub fn new() -> Self {
        let compiler = std::env::var_os("CC")
            .filter(|cc| !cc.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("cc"));
        Self::with_compiler(compiler)
    }

    pub fn with_compiler(compiler: impl Into<PathBuf>) -> Self {
        CcBackend {
            compiler: compiler.into(),
            extra_args: Vec::new(),
        }
    }

    /// Arguments added to every invocation, before the request's own.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn compiler(&self) -> &Path {
        &self.compiler
    }

    /// A backend for the default compiler, if it can be found.
    pub fn detect() -> Option<Self> {
        let backend = Self::new();
        let found = if backend.compiler.components().count() > 1 {
            backend.compiler.is_file()
        } else {
            is_in_path(&backend.compiler)
        };
        found.then_some(backend)
    }

    fn command_args(
        &self,
        options: &CompileOptions,
        debug_format: Option<DebugFormat>,
        output: &Path,
        inputs: &[PathBuf],
        runtime_dirs: &[PathBuf],
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-fdiagnostics-color=never".into(), "-fno-diagnostics-show-caret".into()];
        match options.output_kind {
            OutputKind::DynamicLibrary => args.extend(["-shared".into(), "-fPIC".into()]),
            OutputKind::Object => args.extend(["-c".into(), "-fPIC".into()]),
        }
        if options.target != Triple::host() {
            args.push(format!("--target={}", options.target).into());
        }
        match debug_format {
            Some(DebugFormat::Native) => args.push("-g".into()),
            Some(DebugFormat::Portable) => args.extend(["-g".into(), "-gsplit-dwarf".into()]),
            None => {}
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args.extend(options.args.iter().map(OsString::from));
        args.push("-o".into());
        args.push(output.into());
        args.extend(inputs.iter().map(OsString::from));

        if options.output_kind == OutputKind::DynamicLibrary {
            // a module linked against this one records it by this name
            if options.target.binary_format == BinaryFormat::Elf
                && let Some(name) = output.file_name()
            {
                let mut soname = OsString::from("-Wl,-soname,");
                soname.push(name);
                args.push(soname);
            }
            for dir in runtime_dirs.iter().unique() {
                let mut rpath = OsString::from("-Wl,-rpath,");
                rpath.push(dir);
                args.push(rpath);
            }
        }
        args
    }
}

impl CompilerBackend for CcBackend {
    fn language(&self) -> &str {
        "c"
    }

    fn source_extension(&self) -> &str {
        "c"
    }

    fn debug_extension(&self, format: DebugFormat) -> &str {
        match format {
            DebugFormat::Native => "debug",
            DebugFormat::Portable => "dwo",
        }
    }

    fn default_options(&self, request: &CompileRequest) -> CompileOptions {
        CompileOptions {
            args: request.options.clone(),
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
        let scratch = tempfile::Builder::new()
            .prefix("cetak-cc-")
            .tempdir()
            .map_err(|e| CompileError::io(std::env::temp_dir(), e))?;
        let resolver = unit.options.path_resolver.as_deref();

        let mut inputs = Vec::new();
        let mut scratch_sources = Vec::new();
        for (index, syntax) in unit.syntax_units.iter().enumerate() {
            let file_name = syntax
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.c", unit.name));
            let scratch_path = scratch.path().join(format!("{}-{}", index, file_name));
            std::fs::write(&scratch_path, rewrite_pragmas(syntax, resolver))
                .map_err(|e| CompileError::io(&scratch_path, e))?;
            scratch_sources.push((scratch_path.clone(), syntax.path.clone()));
            inputs.push(scratch_path);
        }

        let mut runtime_dirs = Vec::new();
        for (index, reference) in unit.references.iter().enumerate() {
            match reference.origin() {
                // linked in place and found again at load time
                Some(origin) if is_shared_library(origin) && origin.is_file() => {
                    runtime_dirs.extend(origin.parent().map(Path::to_path_buf));
                    inputs.push(origin.to_path_buf());
                }
                _ => {
                    let path = scratch.path().join(format!("ref{}-{}", index, reference.file_name()));
                    std::fs::write(&path, reference.image()).map_err(|e| CompileError::io(&path, e))?;
                    inputs.push(path);
                }
            }
        }

        let extension = match unit.options.output_kind {
            OutputKind::DynamicLibrary => dylib_extension(&unit.options.target),
            OutputKind::Object => "o",
        };
        let output = scratch.path().join(format!("{}.{}", unit.name, extension));
        let debug_format = debug.as_ref().map(|_| options.debug_format);
        let args = self.command_args(&unit.options, debug_format, &output, &inputs, &runtime_dirs);

        debug!("running {} {:?}", self.compiler.display(), args);
        let result = Command::new(&self.compiler)
            .args(&args)
            .current_dir(scratch.path())
            .output()
            .map_err(|e| CompileError::io(&self.compiler, e))?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        let mut diagnostics = parse_diagnostics(&stderr, &scratch_sources);
        let success = result.status.success();
        if !success && !diagnostics.iter().any(BackendDiagnostic::is_error) {
            diagnostics.push(BackendDiagnostic::error(
                "CC0001",
                format!("{} failed ({}): {}", self.compiler.display(), result.status, stderr.trim()),
            ));
        }
        let emit = EmitResult { success, diagnostics };
        if emit.has_errors() {
            return Ok(emit);
        }

        let image = std::fs::read(&output).map_err(|e| CompileError::io(&output, e))?;
        binary.write_all(&image).map_err(|e| CompileError::io(&output, e))?;

        if let Some(debug) = debug
            && options.debug_format == DebugFormat::Portable
        {
            let split = find_split_debug(scratch.path()).map_err(|e| CompileError::io(scratch.path(), e))?;
            match split {
                Some(path) => {
                    let image = std::fs::read(&path).map_err(|e| CompileError::io(&path, e))?;
                    debug.write_all(&image).map_err(|e| CompileError::io(&path, e))?;
                }
                None => warn!("{} produced no split debug information", self.compiler.display()),
            }
        }

        Ok(emit)
    }
}

/// Rewrite `#line` paths through the resolver, using the unit's own path as base.
fn rewrite_pragmas(syntax: &SyntaxUnit, resolver: Option<&TemplatePathResolver>) -> String {
    let Some(resolver) = resolver else {
        return syntax.text.clone();
    };
    if syntax.pragmas.is_empty() {
        return syntax.text.clone();
    }

    let mut pragmas = syntax.pragmas.iter().peekable();
    let mut out = String::with_capacity(syntax.text.len());
    for (index, line) in syntax.text.split_inclusive('\n').enumerate() {
        match pragmas.next_if(|p| p.directive_line == index) {
            Some(pragma) => {
                let path = resolver.normalize(&pragma.path, Some(&syntax.path));
                let escaped = path.to_string_lossy().replace('\\', "\\\\").replace('"', "\\\"");
                let ending = &line[line.trim_end_matches(['\r', '\n']).len()..];
                out.push_str(&format!("#line {} \"{}\"{}", pragma.target_line, escaped, ending));
            }
            None => out.push_str(line),
        }
    }
    out
}

/// Parse compiler and linker stderr, mapping scratch copies back to their source files.
fn parse_diagnostics(stderr: &str, scratch_sources: &[(PathBuf, PathBuf)]) -> Vec<BackendDiagnostic> {
    let map_path = |file: &str| {
        let file = Path::new(file);
        scratch_sources
            .iter()
            .find(|(scratch, _)| scratch == file)
            .map(|(_, original)| original.clone())
            .unwrap_or_else(|| file.to_path_buf())
    };

    stderr
        .lines()
        .filter_map(|line| {
            if let Some(caps) = LOCATED.captures(line) {
                let number = |name: &str| {
                    caps.name(name)
                        .and_then(|m| m.as_str().parse::<usize>().ok())
                        .map_or(0, |n| n.saturating_sub(1))
                };
                return Some(BackendDiagnostic {
                    severity: severity(&caps["sev"]),
                    id: caps.name("flag").map(|m| m.as_str().to_string()).unwrap_or_default(),
                    message: caps["msg"].to_string(),
                    location: Some(LineSpan {
                        path: map_path(&caps["file"]),
                        line: number("line"),
                        column: number("col"),
                    }),
                });
            }
            if let Some(caps) = TOOL.captures(line) {
                return Some(BackendDiagnostic {
                    severity: severity(&caps["sev"]),
                    id: String::new(),
                    message: format!("{}: {}", &caps["tool"], &caps["msg"]),
                    location: None,
                });
            }
            if let Some(caps) = LINKER.captures(line) {
                return Some(BackendDiagnostic::error("", &caps["msg"]).with_location(map_path(&caps["file"]), 0, 0));
            }
            None
        })
        .collect()
}

fn severity(text: &str) -> Severity {
    match text {
        "fatal error" | "error" => Severity::Error,
        "warning" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn find_split_debug(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "dwo") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

fn is_shared_library(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SHARED_LIBRARY_EXTENSIONS.contains(&ext))
}

/// Checks if a program is in the system's PATH.
fn is_in_path(program: &Path) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
