//! Shared helpers for the integration tests
//!
//! Tests that need a real C compiler call [`cc_backend`] first and return
//! early when none is installed.

#![allow(dead_code)]

use cetak::backend::dylib_extension;
use cetak::{CcBackend, CompilationRecord, ServiceConfig};
use std::path::{Path, PathBuf};
use std::process::Command;
use target_lexicon::Triple;

/// The system C compiler, or `None` (with a note on stderr) when there is none.
pub fn cc_backend() -> Option<CcBackend> {
    let backend = CcBackend::detect();
    if backend.is_none() {
        eprintln!("skipping: no C compiler found");
    }
    backend
}

/// Service configuration rooted in `dir`
pub fn config_in(dir: &Path) -> ServiceConfig {
    ServiceConfig {
        temp_root: Some(dir.to_path_buf()),
        ..ServiceConfig::default()
    }
}

/// Path of the module emitted for `record`
pub fn module_path(record: &CompilationRecord) -> PathBuf {
    let dir = record.working_dir.as_ref().expect("compiled record has a working dir");
    let unit = dir.file_name().unwrap().to_string_lossy().into_owned();
    dir.join(format!("{}.{}", unit, dylib_extension(&Triple::host())))
}

/// Compile `source` into a position-independent object file at `dir/name`.
pub fn compile_object(backend: &CcBackend, dir: &Path, name: &str, source: &str) -> PathBuf {
    let source_path = dir.join(format!("{}.c", name));
    let object_path = dir.join(format!("{}.o", name));
    std::fs::write(&source_path, source).unwrap();
    let status = Command::new(backend.compiler())
        .args(["-c", "-fPIC", "-o"])
        .arg(&object_path)
        .arg(&source_path)
        .status()
        .unwrap();
    assert!(status.success());
    object_path
}
