use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fuzzer::config::Config;
use fuzzer::planner::{Planner, PlannerSettings};
use fuzzer::replay;

/// Property-based fuzzer for Dolt
///
/// Builds random repositories (branches, tables, rows) against a live dolt
/// binary while an in-memory shadow model records what the repository should
/// contain, then checks that the two agree.
#[derive(Parser)]
#[command(name = "fuzzer")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "fuzzer.toml")]
    config: PathBuf,

    /// Number of cycles to run; negative runs until the timeout (or forever)
    #[arg(long, global = true, default_value_t = 1, allow_hyphen_values = true)]
    cycles: i64,

    /// Wall-clock budget for the whole run, e.g. "90s", "10m", "2h"
    #[arg(long, global = true, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Stop at the first failed cycle
    #[arg(long, global = true)]
    first_error: bool,

    /// Directory cycles are built in
    #[arg(long, global = true, default_value = ".")]
    repo_working: PathBuf,

    /// Directory finished cycles are moved to
    #[arg(long, global = true, default_value = ".")]
    repo_finished: PathBuf,

    /// Directory the run metrics file is written to
    #[arg(long, global = true)]
    metrics: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run build-and-validate cycles
    Basic,

    /// Run cycles that also three-way merge every branch
    ///
    /// Forces at least two branches per cycle, merges each non-main branch
    /// into a synthetic branch off main, and verifies the merged tables and
    /// conflict rows against the shadow merge.
    Merge,

    /// Re-execute a cycle log and compare the result with exported data
    #[command(name = "replay-validate")]
    ReplayValidate {
        /// The log.txt of the cycle to replay
        #[arg(long)]
        logfile: PathBuf,

        /// internal_data directory with the cycle's exported CSVs
        #[arg(long)]
        data: Option<PathBuf>,

        /// Directory the replay repository is created in
        #[arg(long, default_value = "replay")]
        workdir: PathBuf,
    },

    /// Print a captured error file
    Error {
        /// Path to an err.txt written by a failed cycle
        #[arg(default_value = "err.txt")]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Basic => run_planner(&cli.global, false),
        Commands::Merge => run_planner(&cli.global, true),
        Commands::ReplayValidate {
            logfile,
            data,
            workdir,
        } => run_replay(&cli.global, &logfile, data.as_deref(), &workdir),
        Commands::Error { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            print!("{text}");
            Ok(())
        }
    }
}

fn run_planner(global: &GlobalArgs, merge_mode: bool) -> Result<()> {
    let settings = PlannerSettings {
        config_path: global.config.clone(),
        cycles: global.cycles,
        timeout: global.timeout,
        first_error: global.first_error,
        repo_working: global.repo_working.clone(),
        repo_finished: global.repo_finished.clone(),
        metrics_dir: global.metrics.clone(),
        merge_mode,
    };
    let mut planner = Planner::new(settings)?;
    let metrics = planner.run()?;
    println!(
        "runs: {}, successful: {}, failed: {}",
        metrics.runs, metrics.successful, metrics.failed
    );
    if metrics.failed > 0 {
        bail!("{} cycle(s) failed", metrics.failed);
    }
    Ok(())
}

fn run_replay(
    global: &GlobalArgs,
    logfile: &std::path::Path,
    data: Option<&std::path::Path>,
    workdir: &std::path::Path,
) -> Result<()> {
    let config = Config::load(&global.config)?;
    let report = replay::replay_validate(Arc::new(config), logfile, data, workdir)?;
    println!(
        "replayed {} line(s), {} row difference(s)",
        report.lines_executed, report.row_differences
    );
    if report.row_differences > 0 {
        bail!("replay diverged from the exported data");
    }
    Ok(())
}

/// Parse durations like `90`, `45s`, `10m`, `2h`.
fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    let (number, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => text.split_at(idx),
        None => (text, "s"),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {text:?}"))?;
    let seconds = match unit {
        "s" | "" => value,
        "m" => value * 60,
        "h" => value * 3600,
        other => return Err(format!("unknown duration unit {other:?}")),
    };
    Ok(Duration::from_secs(seconds))
}
