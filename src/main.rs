//! Basic+ checker
//!
//! Command-line front end over the `basicplus` library.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use basicplus::feedback::{CheckOptions, CheckReport};
use basicplus::frontend::lexer;
use basicplus::frontend::symbols::SymbolKind;
use basicplus::Severity;

/// Basic+ checker
#[derive(Parser, Debug)]
#[command(name = "bpc")]
#[command(author = "Z1529")]
#[command(version = "0.1.0")]
#[command(about = "Basic+ checker - parse diagnostics and static analysis for Basic+ procedures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a source file for errors, unreachable code and unassigned variables
    Check {
        /// Input source file
        input: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Skip unreachable-code analysis
        #[arg(long)]
        no_unreachable: bool,

        /// Skip unassigned-variable analysis
        #[arg(long)]
        no_unassigned: bool,
    },
    /// List the symbols of a source file
    Symbols {
        /// Input source file
        input: PathBuf,
    },
    /// Dump the token stream of a source file
    Tokens {
        /// Input source file
        input: PathBuf,
    },
    /// Print version information
    Version,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Check { input, json, no_unreachable, no_unassigned } => {
            let options = CheckOptions { unreachable: !no_unreachable, unassigned: !no_unassigned };
            check_file(input, *json, options)
        }
        Commands::Symbols { input } => print_symbols(input),
        Commands::Tokens { input } => print_tokens(input),
        Commands::Version => {
            println!("bpc 0.1.0");
            println!("Basic+ checker");
            println!("License: Apache-2.0");
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    }
}

fn read_source(input: &Path) -> Result<String> {
    fs::read_to_string(input).with_context(|| format!("could not read {}", input.display()))
}

/// Check a source file; `Ok(false)` when it has errors
fn check_file(input: &Path, json: bool, options: CheckOptions) -> Result<bool> {
    let source = read_source(input)?;
    let procedure = basicplus::parse(&source);
    let name = input.display().to_string();
    let report = CheckReport::build(&name, &procedure, options);
    info!("checked {} in {} ms", name, report.stats.analysis_time_ms);

    if json {
        println!("{}", report.to_json());
        return Ok(report.success);
    }

    for diag in &report.diagnostics {
        let level = match diag.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        println!("{}:{}:{}: {}: {}", name, diag.line_no, diag.start_col + 1, level, diag.message);
    }
    for finding in &report.findings {
        println!(
            "{}:{}:{}: warning[{}]: {}",
            name,
            finding.location.line,
            finding.location.column + 1,
            finding.code,
            finding.message
        );
    }

    if report.success {
        println!("✅ No errors found ({} warnings)", report.count(Severity::Warning));
    } else {
        println!("❌ {} errors", report.count(Severity::Error));
    }
    Ok(report.success)
}

fn print_symbols(input: &Path) -> Result<bool> {
    let source = read_source(input)?;
    let procedure = basicplus::parse(&source);
    for symbol in procedure.symbols.iter() {
        let refs = procedure.symbols.references_of(symbol.id).count();
        let mut line = format!("{:<12} {:<24} {}:{}", symbol.kind.describe(), symbol.name, symbol.token.span.line, symbol.token.span.col + 1);
        if symbol.kind == SymbolKind::Variable {
            if let Some(scope) = symbol.scope {
                line.push_str(&format!(" {:?}", scope));
            }
        }
        if !symbol.is_declared() {
            line.push_str(" (undefined)");
        }
        println!("{}  refs={}", line, refs);
    }
    Ok(true)
}

fn print_tokens(input: &Path) -> Result<bool> {
    let source = read_source(input)?;
    let lexed = lexer::tokenize(&source, 0);
    for token in lexed.all_tokens() {
        println!("{}:{}\t{:?}\t{:?}", token.span.line, token.span.col + 1, token.kind, token.text);
    }
    for err in &lexed.errors {
        eprintln!("{}:{}: {}", err.span().line, err.span().col + 1, err);
    }
    Ok(lexed.errors.is_empty())
}
