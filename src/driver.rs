//! Compilation service driver: configuration, working artifacts and the
//! orchestration of a compile request.

pub mod artifact;
pub mod cli;
pub mod compiler;

#[cfg(test)]
mod tests_compiler;

pub use artifact::CompilationRecord;
pub use cli::{Cli, ServiceConfig};
pub use compiler::CompilerService;
