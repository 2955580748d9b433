//! Outer cycle driver.
//!
//! The planner owns everything that outlives a cycle: the parsed
//! configuration, the random source (seeded, optionally from a file), the
//! process-wide server slot, and the run counters. It spins cycles until the
//! requested count or timeout is reached, decides what happens to each cycle
//! directory, and flushes the metrics file at the end — fatal errors
//! included.
//!
//! An ignorable cycle error discards the cycle: its directory is removed and
//! the counters are rewound as if it never ran.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::cycle::Cycle;
use crate::error::{ErrorContext as _, FuzzerError, Result};
use crate::interface::{self, ServerSlot};
use crate::managers::{BlueprintManager, GcManager, RepositoryManager};
use crate::merge::MergeManager;
use crate::rng::RandomSource;

// ---------------------------------------------------------------------------
// Settings / Metrics
// ---------------------------------------------------------------------------

/// Run parameters from the command line.
#[derive(Clone, Debug)]
pub struct PlannerSettings {
    pub config_path: PathBuf,
    /// Number of cycles; negative means run until the timeout (or forever).
    pub cycles: i64,
    pub timeout: Option<Duration>,
    /// Stop at the first failed cycle.
    pub first_error: bool,
    pub repo_working: PathBuf,
    pub repo_finished: PathBuf,
    pub metrics_dir: Option<PathBuf>,
    /// Register the merge manager (the `merge` command).
    pub merge_mode: bool,
}

/// Run counters, flushed as JSON.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct Metrics {
    #[serde(rename = "Runs")]
    pub runs: u64,
    #[serde(rename = "Successful")]
    pub successful: u64,
    #[serde(rename = "Failed")]
    pub failed: u64,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Drives cycles to completion.
pub struct Planner {
    settings: PlannerSettings,
    config: Arc<Config>,
    config_text: String,
    rng: Arc<RandomSource>,
    server: ServerSlot,
    metrics: Metrics,
    next_cycle_id: u64,
}

impl Planner {
    pub fn new(settings: PlannerSettings) -> Result<Self> {
        let config = Config::load(&settings.config_path)?;
        let config_text = fs::read_to_string(&settings.config_path)
            .with_context(|| format!("reading {}", settings.config_path.display()))?;

        check_dolt_version(&config.options.dolt_version)?;

        let rng = if config.options.seed_in_file.is_empty() {
            RandomSource::new()
        } else {
            RandomSource::from_seed_file(Path::new(&config.options.seed_in_file))?
        };
        if !config.options.seed_out_file.is_empty() {
            rng.write_seed_file(Path::new(&config.options.seed_out_file))?;
        }

        Ok(Self {
            settings,
            config: Arc::new(config),
            config_text,
            rng: Arc::new(rng),
            server: interface::new_server_slot(),
            metrics: Metrics::default(),
            next_cycle_id: 1,
        })
    }

    /// Run cycles until the count or timeout is exhausted. Metrics are
    /// flushed even when a fatal error stops the run early.
    pub fn run(&mut self) -> Result<Metrics> {
        let deadline = self.settings.timeout.map(|t| Instant::now() + t);
        let mut completed: i64 = 0;

        let outcome = loop {
            if self.settings.cycles >= 0 && completed >= self.settings.cycles {
                break Ok(());
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("timeout reached");
                    break Ok(());
                }
            }
            match self.run_cycle() {
                Ok(()) => {
                    self.metrics.runs += 1;
                    self.metrics.successful += 1;
                    completed += 1;
                }
                Err(err) if err.is_ignorable() => {
                    // Discarded: counters rewound, cycle not counted.
                    warn!(error = %err, "cycle discarded (ignorable)");
                }
                Err(err) => {
                    self.metrics.runs += 1;
                    self.metrics.failed += 1;
                    completed += 1;
                    error!(error = %err, "cycle failed");
                    if self.settings.first_error {
                        break Err(err);
                    }
                }
            }
        };

        interface::close_server(&self.server);
        self.flush_metrics()?;
        outcome.map(|()| self.metrics)
    }

    fn run_cycle(&mut self) -> Result<()> {
        let id = self.next_cycle_id;
        let dir = next_cycle_dir(&self.settings.repo_working)?;
        info!(id, dir = %dir.display(), "starting cycle");

        let mut cycle = Cycle::new(
            id,
            dir.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.rng),
            Arc::clone(&self.server),
            self.config_text.clone(),
        );
        cycle.register_hook(Box::new(BlueprintManager));
        cycle.register_hook(Box::new(RepositoryManager::new(&self.config)?));
        cycle.register_hook(Box::new(GcManager::default()));
        if self.settings.merge_mode {
            cycle.register_hook(Box::new(MergeManager));
        }
        cycle.queue_action(Cycle::init);

        let result = cycle.run();
        drop(cycle);
        self.dispose_cycle_dir(&dir, &result)?;
        if result.is_ok() || !result.as_ref().is_err_and(FuzzerError::is_ignorable) {
            self.next_cycle_id += 1;
        }
        result
    }

    /// Directory disposition: remove discarded and (optionally) successful
    /// cycles, relocate the rest to the finished path. A failed move is a
    /// fatal system error.
    fn dispose_cycle_dir(&self, dir: &Path, result: &Result<()>) -> Result<()> {
        let remove = match result {
            Ok(()) => self.config.options.delete_successful_runs,
            Err(err) => err.is_ignorable(),
        };
        if remove {
            if dir.exists() {
                fs::remove_dir_all(dir)
                    .with_context(|| format!("removing cycle dir {}", dir.display()))?;
            }
            return Ok(());
        }
        if self.settings.repo_finished != self.settings.repo_working && dir.exists() {
            fs::create_dir_all(&self.settings.repo_finished)
                .with_context(|| format!("creating {}", self.settings.repo_finished.display()))?;
            let target = self
                .settings
                .repo_finished
                .join(dir.file_name().expect("cycle dir has a name"));
            fs::rename(dir, &target).with_context(|| {
                format!("moving {} to {}", dir.display(), target.display())
            })?;
        }
        Ok(())
    }

    fn flush_metrics(&self) -> Result<()> {
        let Some(metrics_dir) = &self.settings.metrics_dir else {
            return Ok(());
        };
        fs::create_dir_all(metrics_dir)
            .with_context(|| format!("creating {}", metrics_dir.display()))?;
        let name = format!("{}.txt", Utc::now().format("%Y%m%d%H%M%S"));
        let path = metrics_dir.join(name);
        let body = serde_json::to_string(&self.metrics)
            .map_err(|e| FuzzerError::external("serializing metrics", e))?;
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "metrics written");
        Ok(())
    }
}

/// Next timestamp-named cycle directory under `base`; bumps by one second on
/// collision.
fn next_cycle_dir(base: &Path) -> Result<PathBuf> {
    fs::create_dir_all(base).with_context(|| format!("creating {}", base.display()))?;
    let mut stamp = Utc::now();
    loop {
        let dir = base.join(stamp.format("%Y%m%d%H%M%S").to_string());
        if !dir.exists() {
            return Ok(dir);
        }
        stamp += TimeDelta::seconds(1);
    }
}

/// With a configured `Dolt_Version`, the installed binary must match.
fn check_dolt_version(expected: &str) -> Result<()> {
    if expected.is_empty() {
        return Ok(());
    }
    let output = Command::new("dolt")
        .arg("version")
        .output()
        .map_err(|e| FuzzerError::external("running dolt version", e))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let installed = stdout
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("dolt version "))
        .map(str::trim)
        .unwrap_or("");
    if installed != expected {
        return Err(FuzzerError::new(format!(
            "Options.Dolt_Version is {expected:?} but the installed binary reports {installed:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
