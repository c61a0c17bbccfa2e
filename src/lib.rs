//! Runtime compilation of generated template sources.
//!
//! A templating layer hands a [`CompileRequest`] (generated source plus its
//! binary dependencies) to a [`CompilerService`], which compiles it with an
//! injected [`CompilerBackend`], loads the emitted module into the process
//! and returns the template's exported [`LoadedSymbol`].

/// Compiler backends and the compilation unit model.
pub mod backend;
/// Backend diagnostics and their translation.
pub mod diagnostic;
/// Configuration, artifacts and the compilation service.
pub mod driver;
/// Contains the error types for the service.
pub mod error;
/// Loading emitted modules into the process.
pub mod loader;
pub mod reference;
pub mod request;
pub mod resolver;

pub use backend::{CcBackend, CompilerBackend, DebugFormat};
pub use diagnostic::TemplateDiagnostic;
pub use driver::{CompilationRecord, CompilerService, ServiceConfig};
pub use error::{CompileError, TemplateCompilationError};
pub use loader::{LoadStrategy, LoadedModule, LoadedSymbol};
pub use reference::DependencyDescriptor;
pub use request::CompileRequest;
