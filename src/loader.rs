//! Loading emitted modules into the running process.
//!
//! Two strategies exist. The locking one hands the module path straight to
//! the dynamic loader, which keeps the file mapped (and on Windows locked)
//! for as long as the module stays loaded. The non-locking one reads the
//! module into memory first and loads a private shadow copy, so the working
//! files can be removed as soon as the load returns.
//!
//! Either way the module image stays in memory, so a loaded module can be
//! handed to a later compile as a reference after its files are gone.

use std::ffi::c_void;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use libloading::Library;
use log::{debug, info};
use tempfile::TempPath;

use crate::error::CompileError;

static SHADOW_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    #[default]
    Locking,
    NonLocking,
}

/// Linker-level name of the symbol exported for `qualified_name`.
///
/// Dots are not valid in exported symbol names, every `.` becomes `__`.
pub fn export_name(qualified_name: &str) -> String {
    qualified_name.replace('.', "__")
}

/// A module loaded into the process. Never unloaded while a symbol refers to it.
pub struct LoadedModule {
    library: Library,
    origin: PathBuf,
    strategy: LoadStrategy,
    image: Arc<[u8]>,
    debug_image: Option<Vec<u8>>,
    // dropped after `library`
    _shadow: Option<TempPath>,
}

impl LoadedModule {
    /// File the module was loaded from.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    /// The module file as it was when loaded.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub(crate) fn shared_image(&self) -> Arc<[u8]> {
        self.image.clone()
    }

    /// Debug information read alongside the module by the non-locking loader.
    pub fn debug_image(&self) -> Option<&[u8]> {
        self.debug_image.as_deref()
    }

    /// Look up `{namespace}.{ClassName}`.
    pub fn resolve(self: &Arc<Self>, qualified_name: &str) -> Option<LoadedSymbol> {
        let symbol = export_name(qualified_name);
        let address = unsafe { self.library.get::<*const c_void>(symbol.as_bytes()) }
            .ok()
            .map(|sym| *sym)?;
        if address.is_null() {
            return None;
        }
        Some(LoadedSymbol {
            module: self.clone(),
            name: qualified_name.to_string(),
            address,
        })
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("origin", &self.origin)
            .field("strategy", &self.strategy)
            .field("image", &self.image.len())
            .field("debug_image", &self.debug_image.as_ref().map(|d| d.len()))
            .finish()
    }
}

/// The exported symbol of a loaded template module.
#[derive(Clone)]
pub struct LoadedSymbol {
    module: Arc<LoadedModule>,
    name: String,
    address: *const c_void,
}

// The address points into a module that stays loaded as long as `module` lives.
unsafe impl Send for LoadedSymbol {}
unsafe impl Sync for LoadedSymbol {}

impl LoadedSymbol {
    /// Fully qualified name, `{namespace}.{ClassName}`.
    pub fn qualified_name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.address
    }

    /// Reinterpret the symbol as a function pointer of type `F`.
    ///
    /// An `F` that is not pointer-sized is rejected at compile time.
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the exported definition.
    /// The returned pointer must not outlive this symbol.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        const { assert!(std::mem::size_of::<F>() == std::mem::size_of::<*const c_void>()) };
        unsafe { std::mem::transmute_copy(&self.address) }
    }
}

impl fmt::Debug for LoadedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSymbol")
            .field("name", &self.name)
            .field("origin", &self.module.origin)
            .field("address", &self.address)
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ModuleLoader {
    strategy: LoadStrategy,
}

impl ModuleLoader {
    pub fn new(strategy: LoadStrategy) -> Self {
        ModuleLoader { strategy }
    }

    pub fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    pub fn load(&self, binary: &Path, debug_info: Option<&Path>) -> Result<Arc<LoadedModule>, CompileError> {
        let module = match self.strategy {
            LoadStrategy::Locking => {
                debug!("loading module {} in place", binary.display());
                let library = unsafe { Library::new(binary) }.map_err(|source| CompileError::Load {
                    path: binary.to_path_buf(),
                    source,
                })?;
                let image = std::fs::read(binary).map_err(|e| CompileError::io(binary, e))?;
                LoadedModule {
                    library,
                    origin: binary.to_path_buf(),
                    strategy: self.strategy,
                    image: image.into(),
                    debug_image: None,
                    _shadow: None,
                }
            }
            LoadStrategy::NonLocking => {
                let image = std::fs::read(binary).map_err(|e| CompileError::io(binary, e))?;
                let debug_image = match debug_info {
                    Some(path) if path.is_file() => Some(std::fs::read(path).map_err(|e| CompileError::io(path, e))?),
                    _ => None,
                };
                debug!(
                    "loading module {} from memory ({} bytes)",
                    binary.display(),
                    image.len()
                );
                let (library, shadow) = load_shadow(&image, binary)?;
                LoadedModule {
                    library,
                    origin: binary.to_path_buf(),
                    strategy: self.strategy,
                    image: image.into(),
                    debug_image,
                    _shadow: Some(shadow),
                }
            }
        };
        info!("loaded module {}", binary.display());
        Ok(Arc::new(module))
    }
}

/// Copy `image` to a fresh shadow file and load it from there.
///
/// The dynamic loader tells modules apart by path, and a module it could not
/// unmap (`-z nodelete`, unique symbols) stays known under its old path. The
/// sequence in the name keeps every shadow path unique for the life of the
/// process.
fn load_shadow(image: &[u8], origin: &Path) -> Result<(Library, TempPath), CompileError> {
    let sequence = SHADOW_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let suffix = origin
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut shadow = tempfile::Builder::new()
        .prefix(&format!("cetak-{}-{}-", std::process::id(), sequence))
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| CompileError::io(std::env::temp_dir(), e))?;
    shadow.write_all(image).map_err(|e| CompileError::io(shadow.path(), e))?;
    let shadow = shadow.into_temp_path();

    let library = unsafe { Library::new(&*shadow) }.map_err(|source| CompileError::Load {
        path: origin.to_path_buf(),
        source,
    })?;
    Ok((library, shadow))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_name_replaces_dots() {
        assert_eq!(export_name("CompiledTemplates.Index"), "CompiledTemplates__Index");
        assert_eq!(export_name("Site.Views.Home"), "Site__Views__Home");
        assert_eq!(export_name("Plain"), "Plain");
    }

    #[test]
    fn locking_load_of_missing_file_fails() {
        let err = ModuleLoader::new(LoadStrategy::Locking)
            .load(Path::new("/nonexistent/module.so"), None)
            .unwrap_err();
        assert!(matches!(err, CompileError::Load { .. }));
    }

    #[test]
    fn non_locking_load_of_missing_file_is_io() {
        let err = ModuleLoader::new(LoadStrategy::NonLocking)
            .load(Path::new("/nonexistent/module.so"), None)
            .unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
    }

    #[test]
    fn non_module_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        std::fs::write(&path, b"not a shared object").unwrap();

        for strategy in [LoadStrategy::Locking, LoadStrategy::NonLocking] {
            let err = ModuleLoader::new(strategy).load(&path, None).unwrap_err();
            assert!(matches!(err, CompileError::Load { .. }), "{:?}", strategy);
        }
    }

    #[test]
    fn shadow_paths_are_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        std::fs::write(&path, b"not a shared object").unwrap();

        let before = SHADOW_SEQUENCE.load(Ordering::Relaxed);
        let loader = ModuleLoader::new(LoadStrategy::NonLocking);
        assert!(loader.load(&path, None).is_err());
        assert!(loader.load(&path, None).is_err());
        assert!(SHADOW_SEQUENCE.load(Ordering::Relaxed) >= before + 2);
    }
}
