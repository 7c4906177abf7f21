use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use typox_core::context::{AnalysisContext, AnalysisMode};
use typox_core::engine::Analysis;
use typox_core::output::{compare_reports, AnalysisReport};
use typox_core::typeshed::SearchContext;

#[derive(Parser)]
#[command(name = "typox", version, about = "Whole-program abstract-interpretation type analyzer for Python sources", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    common: CommonArgs,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Args, Clone)]
struct CommonArgs {
    /// Main file to analyze
    main: Option<PathBuf>,

    /// Project root; prepended to the analysis path for source-module
    /// discovery (defaults to the main file's directory)
    #[arg(long)]
    project: Option<PathBuf>,

    /// Stub corpus root (the directory holding stdlib/); falls back to the
    /// TYPOX_TYPESHED environment variable
    #[arg(long)]
    typeshed: Option<PathBuf>,

    /// Analyzed language version, as major.minor
    #[arg(long, default_value = "3.9")]
    python_version: String,

    /// Target platform string
    #[arg(long, default_value = "linux")]
    platform: String,

    /// Context abstraction: crude or refined
    #[arg(long, default_value = "crude")]
    mode: String,

    /// Skip the fixed-point verification pass
    #[arg(long)]
    no_check: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a main file and print the per-point report as JSON
    Analyze {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run both context abstractions and report how many local variables
    /// they disagree on
    Diff {
        #[command(flatten)]
        common: CommonArgs,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Some(Command::Analyze { common }) => analyze(&common).map(|report| {
            print_json(&report);
        }),
        Some(Command::Diff { common }) => diff(&common),
        None => analyze(&cli.common).map(|report| {
            print_json(&report);
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_json(report: &AnalysisReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(%err, "report serialization failed"),
    }
}

fn search_context(common: &CommonArgs) -> Result<SearchContext> {
    let typeshed = common
        .typeshed
        .clone()
        .or_else(|| std::env::var_os("TYPOX_TYPESHED").map(PathBuf::from))
        .context("no stub corpus: pass --typeshed or set TYPOX_TYPESHED")?;
    let typeshed = if typeshed.join("stdlib").is_dir() {
        typeshed.join("stdlib")
    } else {
        typeshed
    };

    let (major, minor) = common
        .python_version
        .split_once('.')
        .context("python version must be major.minor")?;
    let version = (
        major.parse().context("bad major version")?,
        minor.parse().context("bad minor version")?,
    );
    Ok(SearchContext::new(typeshed, version, common.platform.clone()))
}

fn run_one(common: &CommonArgs, mode: AnalysisMode) -> Result<AnalysisReport> {
    let Some(main) = &common.main else {
        bail!("no main file given");
    };
    let project = common
        .project
        .clone()
        .or_else(|| main.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    let search = search_context(common)?;
    let mut ctx = AnalysisContext::new(search, mode).with_project_root(project);

    let mut analysis = Analysis::new(&mut ctx, main)?;
    analysis.compute_fixed_point()?;
    if !common.no_check {
        analysis.verify_fixed_point()?;
    }
    Ok(analysis.report())
}

fn analyze(common: &CommonArgs) -> Result<AnalysisReport> {
    let mode = AnalysisMode::parse(&common.mode)
        .with_context(|| format!("unknown mode `{}`", common.mode))?;
    run_one(common, mode)
}

fn diff(common: &CommonArgs) -> Result<()> {
    let crude = run_one(common, AnalysisMode::Crude)?;
    let refined = run_one(common, AnalysisMode::Refined)?;
    let summary = compare_reports(&crude, &refined);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
