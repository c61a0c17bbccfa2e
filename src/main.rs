use cetak::diagnostic::ErrorFormatter;
use cetak::driver::Cli;
use cetak::{CcBackend, CompileError, CompileRequest, CompilerService, DependencyDescriptor};
use clap::Parser as ClapParser;
use log::debug;
use std::process::exit;

/// The main entry point for the application.
fn main() {
    if !run() {
        exit(1);
    }
}

fn init_logger(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).try_init();
}

/// Compiles the source named on the command line and loads the result.
///
/// Returns `false` when anything went wrong; diagnostics have already been
/// printed by then.
fn run() -> bool {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", cli.source.display(), e);
            return false;
        }
    };
    let template = match cli.template.as_ref().map(std::fs::read_to_string).transpose() {
        Ok(template) => template,
        Err(e) => {
            eprintln!("error: cannot read template: {}", e);
            return false;
        }
    };

    let mut request = CompileRequest::new(cli.class_name.clone(), source)
        .with_namespace(cli.namespace.clone())
        .with_references(cli.references.iter().map(DependencyDescriptor::path));
    for arg in &cli.backend_args {
        request = request.with_option(arg.clone());
    }
    if let Some(template) = template {
        request = request.with_template_content(template);
    }

    let backend = match &cli.cc {
        Some(cc) => CcBackend::with_compiler(cc),
        None => CcBackend::new(),
    };
    debug!("using compiler {}", backend.compiler().display());
    let service = CompilerService::new(backend, cli.to_config());

    match service.compile(&request, cli.prebuilt.as_deref()) {
        Ok((symbol, record)) => {
            println!("{}", symbol.qualified_name());
            if let Some(dir) = &record.working_dir {
                println!("{}", dir.display());
            }
            true
        }
        Err(CompileError::Compilation(failure)) => {
            if cli.json {
                match serde_json::to_string_pretty(&failure.diagnostics) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("error: {}", e),
                }
            } else {
                let source = failure
                    .record
                    .source_file
                    .as_deref()
                    .map(|path| (path, failure.record.source_code.as_str()));
                ErrorFormatter::default().print_diagnostics(&failure.diagnostics, source);
                if let Some(dir) = &failure.record.working_dir {
                    eprintln!("note: working files kept in {}", dir.display());
                }
            }
            false
        }
        Err(e) => {
            eprintln!("error: {}", e);
            false
        }
    }
}
