//! Affine Interchange Command Line Interface
//!
//! Usage:
//!   affine-interchange [OPTIONS] <input-file>
//!   affine-interchange --help
//!
//! Examples:
//!   affine-interchange matmul.loop                  # Swap the outermost pair of every nest
//!   affine-interchange --slot 1 matmul.loop         # Swap slots 1 and 2
//!   affine-interchange --first-legal --emit=report stencil.loop
//!   affine-interchange --list-passes

use affine_interchange::analysis::collect;
use affine_interchange::frontend;
use affine_interchange::ir::Program;
use affine_interchange::transform::{
    register_passes, registered_passes, FunctionPass, InterchangeOptions, LoopInterchangePass, PassReport,
};
use affine_interchange::utils::print_program;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;

/// Affine Interchange - dependence-checked loop interchange
#[derive(Parser, Debug)]
#[command(name = "affine-interchange")]
#[command(version)]
#[command(about = "Interchange adjacent loops of affine loop nests", long_about = None)]
struct Cli {
    /// Input file
    #[arg(value_name = "FILE", required_unless_present = "list_passes")]
    input: Option<PathBuf>,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Interchange slots N and N + 1 of every nest
    #[arg(long, value_name = "N", conflicts_with = "first_legal")]
    slot: Option<usize>,

    /// Interchange the first legal pair of every nest
    #[arg(long)]
    first_legal: bool,

    /// Reject pairs whose unknown directions could hide a reversal
    #[arg(long)]
    strict: bool,

    /// What to emit
    #[arg(long, default_value = "ir")]
    emit: EmitKind,

    /// List registered passes and exit
    #[arg(long)]
    list_passes: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Transformed source
    Ir,
    /// Loop nests after the pass, one per line
    Nests,
    /// Applied and skipped interchanges
    Report,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("affine-interchange v{}", affine_interchange::VERSION);
    register_passes()?;

    if cli.list_passes {
        let listing: Vec<String> = registered_passes()?
            .into_iter()
            .map(|(name, description)| format!("{:<28} {}", name, description))
            .collect();
        return write_output(&cli.output, &listing.join("\n"));
    }

    let input = cli.input.as_ref().context("No input file given")?;
    debug!("Input file: {:?}", input);
    let source = fs::read_to_string(input).with_context(|| format!("Failed to read input file: {:?}", input))?;

    let mut program = affine_interchange::parse(&source)
        .map_err(|err| match frontend::diagnose(&err, &source) {
            Some(diagnostic) => anyhow!("{}", diagnostic),
            None => err,
        })
        .with_context(|| "Failed to parse input")?;

    let options = build_options(&cli);
    debug!("Interchange options: {:?}", options);

    let pass = LoopInterchangePass::new(options);
    let mut reports = Vec::new();
    for func in &mut program.functions {
        let report = pass
            .run_on_function(func)
            .with_context(|| format!("{} failed on '{}'", pass.name(), func.name))?;
        reports.push(report);
    }
    info!(
        "{} interchange(s) applied across {} function(s)",
        reports.iter().map(|r| r.applied.len()).sum::<usize>(),
        reports.len()
    );

    let output = match cli.emit {
        EmitKind::Ir => print_program(&program),
        EmitKind::Nests => render_nests(&program),
        EmitKind::Report => render_reports(&reports),
    };
    write_output(&cli.output, &output)
}

fn build_options(cli: &Cli) -> InterchangeOptions {
    let mut options = InterchangeOptions::new().strict_unknown(cli.strict);
    if let Some(slot) = cli.slot {
        options = options.with_slot(slot);
    }
    if cli.first_legal {
        options = options.first_legal();
    }
    options
}

fn render_nests(program: &Program) -> String {
    let mut lines = Vec::new();
    for func in &program.functions {
        for nest in collect(&func.body) {
            lines.push(format!("{}: {}", func.name, nest.describe(func)));
        }
    }
    lines.join("\n")
}

fn render_reports(reports: &[PassReport]) -> String {
    reports.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("")
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content).with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
