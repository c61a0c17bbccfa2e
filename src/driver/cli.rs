//! CLI parsing and configuration module
//!
//! This module handles command-line argument parsing using clap and
//! provides the configuration consumed by the compilation service.

use clap::Parser as CliParser;
use std::path::PathBuf;

use crate::backend::DebugFormat;
use crate::loader::LoadStrategy;
use crate::request::DYNAMIC_TEMPLATE_NAMESPACE;

/// CLI interface using clap
#[derive(CliParser, Debug)]
#[clap(name = "cetak", about = "Compile a generated template source into a loadable module")]
pub struct Cli {
    /// Generated C source file
    #[clap(value_parser)]
    pub source: PathBuf,

    /// Name of the template class the module exports
    #[clap(long = "class", value_name = "NAME")]
    pub class_name: String,

    /// Namespace of the template class
    #[clap(long, default_value = DYNAMIC_TEMPLATE_NAMESPACE)]
    pub namespace: String,

    /// Binary dependency to link against
    #[clap(short = 'r', long = "reference", value_name = "FILE", action = clap::ArgAction::Append)]
    pub references: Vec<PathBuf>,

    /// Previously compiled module to load instead of compiling
    #[clap(long, value_name = "FILE")]
    pub prebuilt: Option<PathBuf>,

    /// Original template, quoted in error reports
    #[clap(long, value_name = "FILE")]
    pub template: Option<PathBuf>,

    /// Load modules from memory so working files can be removed right away
    #[clap(long)]
    pub disable_temp_file_locking: bool,

    /// Emit debug information
    #[clap(short = 'g', long = "debug-info")]
    pub include_debug_info: bool,

    /// Format of the emitted debug information
    #[clap(long, value_enum, default_value = "native")]
    pub debug_format: DebugFormat,

    /// Root directory for working files
    #[clap(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// C compiler to use
    #[clap(long, value_name = "PATH")]
    pub cc: Option<PathBuf>,

    /// Print diagnostics as JSON
    #[clap(long)]
    pub json: bool,

    /// Enable verbose output
    #[clap(short, long)]
    pub verbose: bool,

    /// Extra backend arguments
    #[clap(last = true)]
    pub backend_args: Vec<String>,
}

/// Configuration of a compilation service
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub disable_temp_file_locking: bool,
    pub include_debug_info: bool,
    pub debug_format: DebugFormat,
    /// Defaults to `cetak` under the system temp directory
    pub temp_root: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn load_strategy(&self) -> LoadStrategy {
        if self.disable_temp_file_locking {
            LoadStrategy::NonLocking
        } else {
            LoadStrategy::Locking
        }
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cetak"))
    }
}

impl Cli {
    /// Convert CLI arguments into the service configuration
    pub fn to_config(&self) -> ServiceConfig {
        ServiceConfig {
            disable_temp_file_locking: self.disable_temp_file_locking,
            include_debug_info: self.include_debug_info,
            debug_format: self.debug_format,
            temp_root: self.temp_dir.clone(),
        }
    }
}
