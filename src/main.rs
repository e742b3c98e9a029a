// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt};

use stockflow::ast::print_eqn;
use stockflow::model::Rate;
use stockflow::parser::parse;
use stockflow::results;
use stockflow::{Model, Result, Specs, build_model, parse_declarations};

const EXIT_FAILURE: i32 = 1;

macro_rules! die(
    ($($arg:tt)*) => { {
        eprintln!($($arg)*);
        std::process::exit(EXIT_FAILURE)
    } }
);

/// Simulate stock-and-flow models.
#[derive(Parser, Debug)]
#[command(name = "stockflow", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a model and display output
    Simulate {
        path: PathBuf,
        /// number of steps to take
        #[arg(long)]
        steps: Option<usize>,
        /// size of each step
        #[arg(long)]
        dt: Option<f64>,
        #[arg(long, value_enum, default_value_t = Format::Tsv)]
        format: Format,
        /// only print the variables of this graph
        #[arg(long)]
        graph: Option<String>,
        /// maximum number of snapshots kept
        #[arg(long, default_value_t = stockflow::results::DEFAULT_HISTORY_CAPACITY)]
        history: usize,
        /// path to write output file
        #[arg(long)]
        output: Option<PathBuf>,
        /// don't print the output (for benchmarking)
        #[arg(long)]
        no_output: bool,
    },
    /// Print the parsed declarations as JSON
    Declarations { path: PathBuf },
    /// Print the equations out
    Equations { path: PathBuf },
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum Format {
    Tsv,
    Csv,
    Json,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => die!("failed to read {}: {}", path.display(), err),
    }
}

fn open_output(output: Option<&Path>) -> Box<dyn Write> {
    match output {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(err) => die!("failed to create {}: {}", path.display(), err),
        },
        None => Box::new(BufWriter::new(io::stdout())),
    }
}

#[allow(clippy::too_many_arguments)]
fn simulate(
    path: &Path,
    steps: Option<usize>,
    dt: Option<f64>,
    format: Format,
    graph: Option<&str>,
    history: usize,
    output: Option<&Path>,
    no_output: bool,
) -> Result<()> {
    let defaults = Specs::default();
    let specs = Specs {
        dt: dt.unwrap_or(defaults.dt),
        steps: steps.unwrap_or(defaults.steps),
    };
    if specs.dt.is_nan() || specs.dt <= 0.0 {
        die!("--dt must be positive, not {}", specs.dt);
    }

    let source = read_source(path);
    let mut model = build_model(
        Model::with_history_capacity(history),
        &parse_declarations(&source),
    );
    model.run(specs.steps, specs.dt);

    if no_output {
        return Ok(());
    }

    let columns = model.columns(graph)?;
    let mut out = open_output(output);
    match format {
        Format::Tsv => results::write_tsv(&mut out, &columns, model.history())?,
        Format::Csv => results::write_csv(&mut out, &columns, model.history())?,
        Format::Json => {
            results::write_json(&mut out, &columns, model.history())?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn declarations(path: &Path) -> Result<()> {
    let source = read_source(path);
    let declarations = parse_declarations(&source);
    let mut out = BufWriter::new(io::stdout());
    if let Err(err) = serde_json::to_writer_pretty(&mut out, &declarations) {
        die!("failed to serialize declarations: {}", err);
    }
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// The equation in canonical form, or as written if it doesn't parse.
fn normalize(text: &str) -> String {
    match parse(text) {
        Ok(Some(expr)) => print_eqn(&expr),
        _ => text.to_owned(),
    }
}

fn equations(path: &Path) -> Result<()> {
    let source = read_source(path);
    let model = build_model(Model::new(), &parse_declarations(&source));
    let mut out = BufWriter::new(io::stdout());

    let mut constants: Vec<_> = model.constants().iter().collect();
    constants.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in constants {
        writeln!(out, "{name} = {value}")?;
    }
    for stock in model.stocks() {
        writeln!(out, "{}(t=0) = {}", stock.name, stock.value)?;
    }
    for flow in model.flows() {
        let rate = match &flow.rate {
            Rate::Const(n) => format!("{n}"),
            Rate::Expr(expr) => normalize(expr.text()),
        };
        writeln!(out, "{} = {}", flow.name, rate)?;
    }
    if let Some(when) = model.termination_text() {
        writeln!(out, "terminate when {}", normalize(when))?;
    }
    out.flush()?;
    Ok(())
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Simulate {
            path,
            steps,
            dt,
            format,
            graph,
            history,
            output,
            no_output,
        } => simulate(
            path,
            *steps,
            *dt,
            *format,
            graph.as_deref(),
            *history,
            output.as_deref(),
            *no_output,
        ),
        Command::Declarations { path } => declarations(path),
        Command::Equations { path } => equations(path),
    };

    if let Err(err) = result {
        die!("{}", err);
    }
}
