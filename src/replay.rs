//! Log replay.
//!
//! `replay-validate` re-executes a cycle's `log.txt` in order: `CLI:` lines
//! through the CLI (skipping the logged `dolt init` — the replay repository
//! is initialized up front), SQL lines through the server connection. The
//! shadow model is bootstrapped from `CREATE TABLE` lines and mutated by
//! every DML line, so the replayed shadow state is exactly the state the
//! original run described, up to the first `ERR:  ` line.
//!
//! With `--data`, the rebuilt shadow tables are compared row by row against
//! the CSVs exported by the original run.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::cycle::Cycle;
use crate::error::{ErrorContext as _, FuzzerError, Result};
use crate::interface;
use crate::logging::{parse_line, LogType};
use crate::repo::table::Column;
use crate::repo::Table;
use crate::rng::RandomSource;
use crate::sqlparse::{parse_statement, CreateTableStatement, SqlStatement};
use crate::store::TableData;

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Outcome of a replay.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub lines_executed: u64,
    pub stopped_at_error: bool,
    /// Rows differing from the `--data` CSVs (0 when no data dir given).
    pub row_differences: u64,
}

/// Replay `logfile` into a fresh repository under `work_dir`, validating
/// against `data_dir` CSVs when given.
pub fn replay_validate(
    config: Arc<Config>,
    logfile: &Path,
    data_dir: Option<&Path>,
    work_dir: &Path,
) -> Result<ReplayReport> {
    let text = fs::read_to_string(logfile)
        .with_context(|| format!("reading log {}", logfile.display()))?;

    fs::create_dir_all(work_dir)
        .with_context(|| format!("creating {}", work_dir.display()))?;
    let mut cycle = Cycle::new(
        0,
        work_dir.to_path_buf(),
        config,
        Arc::new(RandomSource::new()),
        interface::new_server_slot(),
        String::new(),
    );
    cycle.cli_query(&["init"])?;

    let mut shadow: BTreeMap<String, Table> = BTreeMap::new();
    let mut report = ReplayReport::default();

    for raw in text.lines() {
        if raw.is_empty() {
            continue;
        }
        let line = parse_line(raw)?;
        match line.kind {
            LogType::Err => {
                report.stopped_at_error = true;
                break;
            }
            LogType::Info | LogType::Warn => {}
            LogType::Cli => {
                replay_cli_line(&mut cycle, &line.payload)?;
                report.lines_executed += 1;
            }
            LogType::SqlQuery | LogType::SqlBatch | LogType::SqlServer => {
                replay_sql_line(&mut cycle, &mut shadow, &line.payload)?;
                report.lines_executed += 1;
            }
        }
    }

    if let Some(data_dir) = data_dir {
        report.row_differences = compare_with_data(&shadow, data_dir)?;
    }
    cycle.close_server_connection();
    info!(
        lines = report.lines_executed,
        differences = report.row_differences,
        "replay complete"
    );
    Ok(report)
}

fn replay_cli_line(cycle: &mut Cycle, payload: &str) -> Result<()> {
    let Some(rest) = payload.strip_prefix("dolt ") else {
        return Err(FuzzerError::new(format!(
            "CLI log line does not invoke dolt: {payload:?}"
        )));
    };
    let args = crate::logging::split_cli_args(rest)?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    if args.first() == Some(&"init") {
        // The replay repository is already initialized.
        return Ok(());
    }
    // A logged merge may legitimately end in conflicts; everything else must
    // succeed cleanly.
    if args.first() == Some(&"merge") {
        let _ = cycle.cli_query_raw(&args)?;
        Ok(())
    } else {
        cycle.cli_query(&args).map(|_| ())
    }
}

fn replay_sql_line(
    cycle: &mut Cycle,
    shadow: &mut BTreeMap<String, Table>,
    payload: &str,
) -> Result<()> {
    apply_sql_to_shadow(shadow, payload)?;
    cycle.sql_server(payload)
}

fn apply_sql_to_shadow(shadow: &mut BTreeMap<String, Table>, payload: &str) -> Result<()> {
    match parse_statement(payload) {
        Ok(SqlStatement::CreateTable(ct)) => {
            shadow.insert(ct.name.clone(), table_from_schema(&ct)?);
        }
        Ok(
            SqlStatement::Insert { ref table, .. }
            | SqlStatement::Update { ref table, .. }
            | SqlStatement::Delete { ref table, .. },
        ) => {
            let entry = shadow.get_mut(table).ok_or_else(|| {
                FuzzerError::new(format!("log references unknown table `{table}`"))
            })?;
            entry
                .data
                .exec(payload)
                .with_context(|| format!("replaying {payload:?} into the shadow model"))?;
        }
        Err(_) => {
            // Schema statements the shadow does not model (CREATE INDEX).
            warn!(statement = payload, "statement replayed to the database only");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shadow-only replay
// ---------------------------------------------------------------------------

/// Shadow state rebuilt from a log, without touching the database.
#[derive(Debug, Default)]
pub struct ShadowReplay {
    pub tables: BTreeMap<String, Table>,
    pub stopped_at_error: bool,
    pub sql_lines: u64,
}

/// Rebuild the shadow model a log describes, stopping at the first
/// `ERR:  ` line. This is the pure half of [`replay_validate`].
pub fn rebuild_shadow(log_text: &str) -> Result<ShadowReplay> {
    let mut replayed = ShadowReplay::default();
    for raw in log_text.lines() {
        if raw.is_empty() {
            continue;
        }
        let line = parse_line(raw)?;
        match line.kind {
            LogType::Err => {
                replayed.stopped_at_error = true;
                break;
            }
            LogType::SqlQuery | LogType::SqlBatch | LogType::SqlServer => {
                apply_sql_to_shadow(&mut replayed.tables, &line.payload)?;
                replayed.sql_lines += 1;
            }
            LogType::Cli | LogType::Info | LogType::Warn => {}
        }
    }
    Ok(replayed)
}

/// Rebuild a [`Table`] from a parsed `CREATE TABLE`.
fn table_from_schema(ct: &CreateTableStatement) -> Result<Table> {
    let mut pk_cols = Vec::with_capacity(ct.primary_key.len());
    for key in &ct.primary_key {
        let col = ct
            .columns
            .iter()
            .find(|c| &c.name == key)
            .ok_or_else(|| {
                FuzzerError::new(format!("primary key `{key}` names no column"))
            })?;
        pk_cols.push(Column::new(col.name.clone(), col.type_instance.clone()));
    }
    let non_pk_cols: Vec<Column> = ct
        .columns
        .iter()
        .filter(|c| !ct.primary_key.contains(&c.name))
        .map(|c| Column::new(c.name.clone(), c.type_instance.clone()))
        .collect();
    Ok(Table::new(ct.name.clone(), pk_cols, non_pk_cols, Vec::new()))
}

/// Compare each replayed table against `<data_dir>/<table>.csv`, counting
/// differing rows.
fn compare_with_data(shadow: &BTreeMap<String, Table>, data_dir: &Path) -> Result<u64> {
    let mut differences: u64 = 0;
    for (name, table) in shadow {
        let csv_path = data_dir.join(format!("{name}.csv"));
        if !csv_path.exists() {
            warn!(table = name.as_str(), "no CSV for table in data dir");
            differences += table.data.row_count();
            continue;
        }
        let mut expected = TableData::new(
            table.all_columns().cloned().collect(),
            table.pk_cols.len(),
        );
        expected.import_from_csv(&csv_path)?;

        let replayed = table.data.all_rows();
        let exported = expected.all_rows();
        let mut i = 0;
        let mut j = 0;
        while i < replayed.len() || j < exported.len() {
            match (replayed.get(i), exported.get(j)) {
                (Some(a), Some(b)) => match a.key_cmp(b) {
                    std::cmp::Ordering::Equal => {
                        if a.full_cmp(b) != std::cmp::Ordering::Equal {
                            differences += 1;
                        }
                        i += 1;
                        j += 1;
                    }
                    std::cmp::Ordering::Less => {
                        differences += 1;
                        i += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        differences += 1;
                        j += 1;
                    }
                },
                (Some(_), None) => {
                    differences += 1;
                    i += 1;
                }
                (None, Some(_)) => {
                    differences += 1;
                    j += 1;
                }
                (None, None) => break,
            }
        }
    }
    Ok(differences)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
