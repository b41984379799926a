use clap::{Parser, Subcommand};
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use plume_ast::names::NameGen;
use plume_ast::Span;

#[derive(Parser)]
#[command(
    name = "plume",
    about = "A compiler for a small strict functional language, emitting portable C"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a .scala file and dump the AST
    Parse {
        /// Path to the source file
        file: PathBuf,
    },
    /// Type-check a .scala file without emitting code
    Check {
        /// Path to the source file
        file: PathBuf,
    },
    /// Compile a .scala file to C source
    Emit {
        /// Path to the source file
        file: PathBuf,
        /// Output path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile a .scala file to a native binary via the system C compiler
    Build {
        /// Path to the source file
        file: PathBuf,
        /// Output binary path (defaults to the source file stem)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// C compiler to invoke
        #[arg(long, default_value = "cc")]
        cc: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("PLUME_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Parse { file } => {
            let source = read_file(&file);
            let (module, errors) = plume_parser::parse(&source);
            if !errors.is_empty() {
                render_parse_errors(&file, &source, &errors);
                std::process::exit(1);
            }
            println!("{:#?}", module.items);
        }
        Command::Check { file } => {
            let source = read_file(&file);
            check_source(&file, &source);
            println!("OK");
        }
        Command::Emit { file, output } => {
            let source = read_file(&file);
            let program = check_source(&file, &source);
            let text = generate_c(&program);
            match output {
                Some(path) => {
                    if let Err(e) = std::fs::write(&path, text) {
                        eprintln!("error: could not write {}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                }
                None => print!("{}", text),
            }
        }
        Command::Build { file, output, cc } => {
            let source = read_file(&file);
            let program = check_source(&file, &source);
            let text = generate_c(&program);

            let binary = output.unwrap_or_else(|| file.with_extension(""));
            let c_path = binary.with_extension("c");
            if let Err(e) = std::fs::write(&c_path, text) {
                eprintln!("error: could not write {}: {}", c_path.display(), e);
                std::process::exit(1);
            }

            let status = std::process::Command::new(&cc)
                .arg("-std=c99")
                .arg("-o")
                .arg(&binary)
                .arg(&c_path)
                .arg("-lm")
                .status();
            match status {
                Ok(s) if s.success() => {}
                Ok(_) => {
                    eprintln!("error: C compiler exited with failure");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("error: could not run `{}`: {}", cc, e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn read_file(file: &Path) -> String {
    match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: could not read {}: {}", file.display(), e);
            std::process::exit(1);
        }
    }
}

/// Parse and type-check, rendering diagnostics and exiting on failure.
fn check_source(file: &Path, source: &str) -> plume_typeck::TypedProgram {
    let (module, errors) = plume_parser::parse(source);
    if !errors.is_empty() {
        render_parse_errors(file, source, &errors);
        std::process::exit(1);
    }
    match plume_typeck::check(&module) {
        Ok(program) => program,
        Err(e) => {
            render_diagnostic(file, source, &format!("type error: {}", e.message), e.span, &e.related);
            std::process::exit(1);
        }
    }
}

fn generate_c(program: &plume_typeck::TypedProgram) -> String {
    let mut names = NameGen::new();
    match plume_codegen::compile_to_c(program, &mut names) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Diagnostics ──────────────────────────────────────────────────

fn render_parse_errors(file: &Path, source: &str, errors: &[plume_parser::ParseError]) {
    for e in errors {
        render_diagnostic(file, source, &format!("parse error: {}", e.message), Some(e.span), &[]);
    }
}

/// Render an annotated source line with a caret through
/// codespan-reporting.
fn render_diagnostic(
    file: &Path,
    source: &str,
    message: &str,
    span: Option<Span>,
    related: &[Span],
) {
    let mut files = SimpleFiles::new();
    let id = files.add(file.display().to_string(), source);

    let mut labels = Vec::new();
    if let Some(span) = span {
        labels.push(Label::primary(id, span.start as usize..span.end as usize));
    }
    for span in related {
        labels.push(Label::secondary(id, span.start as usize..span.end as usize));
    }

    let diagnostic = Diagnostic::error()
        .with_message(message)
        .with_labels(labels);
    let writer = StandardStream::stderr(ColorChoice::Auto);
    let config = term::Config::default();
    let _ = term::emit(&mut writer.lock(), &config, &files, &diagnostic);
}
