//! Repository manager.
//!
//! Drives the repository build after initial setup. On `CycleStarted` it
//! creates the first table on `main`, derives the per-call probability
//! thresholds from the configured row-count median and table target, and
//! queues itself as a recurring action. Each invocation either grows the
//! structure (new table on `main`, new branch), emits one statement against
//! an under-target table, or — when the current branch is saturated —
//! commits and moves to an unvisited branch. When every branch is visited
//! and saturated it validates the whole repository against the shadow model
//! and fires `RepositoryFinished`.
//!
//! The recurring action and the hook handler share state through an `Rc`;
//! the cycle is single-threaded by design.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::{info, warn};

use crate::config::Config;
use crate::cycle::Cycle;
use crate::dump;
use crate::error::{ErrorContext as _, FuzzerError, Result};
use crate::generate::{self, StatementSet};
use crate::hooks::{CycleHook, HookEvent};
use crate::merge::verify;
use crate::names::{NameGenerator, NameKind};
use crate::repo::table::{Column, ForeignKey, Index};
use crate::repo::Table;
use crate::types::TypeRegistry;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct PendingIndex {
    table: String,
    index: Index,
    remaining: u64,
}

struct RepoState {
    statements: StatementSet,
    names: NameGenerator,
    types: TypeRegistry,
    /// `u64::MAX / median_rows`: expected one table add per table's worth of
    /// statements.
    table_threshold: u64,
    /// One branch add per repository's worth of statements.
    branch_threshold: u64,
    visited: BTreeSet<String>,
    pending_indexes: Vec<PendingIndex>,
}

/// Builds and validates the repository.
pub struct RepositoryManager {
    state: Rc<RefCell<RepoState>>,
}

impl RepositoryManager {
    pub fn new(config: &Config) -> Result<Self> {
        let filters = config.invalid_name_regexes.compile()?;
        Ok(Self {
            state: Rc::new(RefCell::new(RepoState {
                statements: StatementSet::from_config(&config.statement_distribution),
                names: NameGenerator::new(filters),
                types: TypeRegistry::from_config(&config.types),
                table_threshold: 0,
                branch_threshold: 0,
                visited: BTreeSet::new(),
                pending_indexes: Vec::new(),
            })),
        })
    }
}

impl CycleHook for RepositoryManager {
    fn handle(&mut self, cycle: &mut Cycle, event: &HookEvent) -> Result<()> {
        if !matches!(event, HookEvent::CycleStarted) {
            return Ok(());
        }
        {
            let mut state = self.state.borrow_mut();
            let rows = cycle.config.amounts.rows;
            let median = ((rows.lower + rows.upper) / 2).max(1);
            let tables = cycle.blueprint.target_table_count.max(1);
            state.table_threshold = u64::MAX / median;
            state.branch_threshold = u64::MAX / median.saturating_mul(tables).max(1);
        }
        // Submitting statements from inside hook dispatch would lose the
        // statement pre/post events, so the first table is built from the
        // action queue like everything else.
        let state = Rc::clone(&self.state);
        cycle.queue_action(move |cycle| {
            create_table(cycle, &state).context("creating the first table")?;
            queue_step(cycle, Rc::clone(&state));
            Ok(())
        });
        Ok(())
    }
}

fn queue_step(cycle: &mut Cycle, state: Rc<RefCell<RepoState>>) {
    cycle.queue_action(move |cycle| step(cycle, &state));
}

// ---------------------------------------------------------------------------
// The recurring step
// ---------------------------------------------------------------------------

fn step(cycle: &mut Cycle, state: &Rc<RefCell<RepoState>>) -> Result<()> {
    let branch_name = cycle.current_branch().name.clone();
    let on_main = branch_name == "main";
    let table_count = cycle.working_set().tables.len() as u64;
    let branch_count = cycle.branches().len() as u64;
    let tables_wanted = on_main && table_count < cycle.blueprint.target_table_count;
    let branches_wanted = branch_count < cycle.blueprint.target_branch_count;

    // Probabilistic structure growth, spread across the row fill.
    if tables_wanted && cycle.rng.u64() < state.borrow().table_threshold {
        create_table(cycle, state)?;
        queue_step(cycle, Rc::clone(state));
        return Ok(());
    }
    if branches_wanted && cycle.rng.u64() < state.borrow().branch_threshold {
        create_branch(cycle, state)?;
        queue_step(cycle, Rc::clone(state));
        return Ok(());
    }

    // One statement against a random under-target table.
    let under = under_target_tables(cycle, &branch_name);
    if !under.is_empty() {
        let pick = cycle.rng.u64_below(under.len() as u64) as usize;
        emit_statement(cycle, state, &under[pick])?;
        queue_step(cycle, Rc::clone(state));
        return Ok(());
    }

    // Saturated here, but structure targets unmet: grow deterministically.
    if tables_wanted {
        create_table(cycle, state)?;
        queue_step(cycle, Rc::clone(state));
        return Ok(());
    }

    // This branch is done: flush deferred indexes and commit.
    flush_pending_indexes(cycle, state)?;
    if cycle.current_branch().is_dirty(&cycle.arena) {
        cycle.commit_current_branch()?;
    }
    state.borrow_mut().visited.insert(branch_name);

    if branches_wanted {
        create_branch(cycle, state)?;
        queue_step(cycle, Rc::clone(state));
        return Ok(());
    }

    let unvisited = cycle
        .branch_names()
        .into_iter()
        .find(|name| !state.borrow().visited.contains(name));
    if let Some(next) = unvisited {
        cycle.switch_current_branch(&next)?;
        queue_step(cycle, Rc::clone(state));
        return Ok(());
    }

    // Everything visited and saturated: validate.
    cycle.queue_action(validate);
    Ok(())
}

fn under_target_tables(cycle: &Cycle, branch: &str) -> Vec<String> {
    cycle
        .working_set()
        .tables
        .iter()
        .filter(|t| t.data.row_count() < cycle.blueprint.target_row_count(branch, &t.name))
        .map(|t| t.name.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Structure growth
// ---------------------------------------------------------------------------

fn create_table(cycle: &mut Cycle, state: &Rc<RefCell<RepoState>>) -> Result<()> {
    let amounts = cycle.config.amounts.clone();
    let (table, foreign_keys, deferred) = {
        let state = state.borrow();
        let taken: Vec<String> = cycle
            .working_set()
            .tables
            .iter()
            .map(|t| t.name.clone())
            .collect();
        let name = state.names.generate(&cycle.rng, NameKind::Table, &taken)?;

        let pk_count = amounts.primary_keys.sample(&cycle.rng).max(1) as usize;
        let col_count = (amounts.columns.sample(&cycle.rng) as usize).max(pk_count);

        let mut column_names: Vec<String> = Vec::with_capacity(col_count);
        let mut pk_cols = Vec::with_capacity(pk_count);
        for _ in 0..pk_count {
            let col = state.names.generate(&cycle.rng, NameKind::Column, &column_names)?;
            pk_cols.push(Column::new(
                col.clone(),
                state.types.instantiate(&cycle.rng, true)?,
            ));
            column_names.push(col);
        }
        let mut non_pk_cols = Vec::with_capacity(col_count - pk_count);
        for _ in 0..col_count - pk_count {
            let col = state.names.generate(&cycle.rng, NameKind::Column, &column_names)?;
            non_pk_cols.push(Column::new(
                col.clone(),
                state.types.instantiate(&cycle.rng, false)?,
            ));
            column_names.push(col);
        }

        // Foreign keys reference the full primary key of an existing table;
        // each adds mirror columns to this table.
        let mut foreign_keys = Vec::new();
        let parents: Vec<(String, Vec<Column>)> = cycle
            .working_set()
            .tables
            .iter()
            .filter(|t| !t.pk_cols.is_empty())
            .map(|t| (t.name.clone(), t.pk_cols.clone()))
            .collect();
        let fk_count = amounts.foreign_keys().sample(&cycle.rng);
        let mut fk_names: Vec<String> = Vec::new();
        if !parents.is_empty() {
            for _ in 0..fk_count {
                let (parent, parent_pks) =
                    &parents[cycle.rng.u64_below(parents.len() as u64) as usize];
                let mut referencing = Vec::with_capacity(parent_pks.len());
                for parent_col in parent_pks {
                    let col =
                        state.names.generate(&cycle.rng, NameKind::Column, &column_names)?;
                    non_pk_cols.push(Column::new(col.clone(), parent_col.type_instance.clone()));
                    referencing.push(col.clone());
                    column_names.push(col);
                }
                let fk_name =
                    state.names.generate(&cycle.rng, NameKind::Constraint, &fk_names)?;
                foreign_keys.push(ForeignKey {
                    name: fk_name.clone(),
                    table: name.clone(),
                    columns: referencing,
                    referenced_table: parent.clone(),
                    referenced_columns: parent_pks.iter().map(|c| c.name.clone()).collect(),
                });
                fk_names.push(fk_name);
            }
        }

        // Secondary indexes over non-key columns; creation can be deferred
        // by `Index_Delay` statements.
        let mut inline = Vec::new();
        let mut deferred = Vec::new();
        if !non_pk_cols.is_empty() {
            let index_count = amounts.indexes().sample(&cycle.rng);
            let mut index_names: Vec<String> = Vec::new();
            for _ in 0..index_count {
                let idx_name =
                    state.names.generate(&cycle.rng, NameKind::Index, &index_names)?;
                let width = cycle
                    .rng
                    .u64_range(1, (non_pk_cols.len() as u64).min(3))
                    as usize;
                let start = cycle.rng.u64_below(non_pk_cols.len() as u64) as usize;
                let columns: Vec<String> = (0..width)
                    .map(|i| non_pk_cols[(start + i) % non_pk_cols.len()].name.clone())
                    .collect();
                let index = Index {
                    name: idx_name.clone(),
                    columns,
                };
                let delay = amounts.index_delay().sample(&cycle.rng);
                if delay == 0 {
                    inline.push(index);
                } else {
                    deferred.push(PendingIndex {
                        table: name.clone(),
                        index,
                        remaining: delay,
                    });
                }
                index_names.push(idx_name);
            }
        }

        (
            Table::new(name, pk_cols, non_pk_cols, inline),
            foreign_keys,
            deferred,
        )
    };

    let table_name = table.name.clone();
    let ddl = table.create_statement(&foreign_keys);
    {
        let ws = cycle.working_set_mut();
        ws.tables.push(table);
        ws.foreign_keys.extend(foreign_keys.iter().cloned());
        ws.dirty = true;
    }
    let iface = cycle.choose_interface(1)?;
    cycle.submit_statement(iface, &ddl)?;

    let branch = cycle.current_branch().name.clone();
    for index in cycle
        .working_set()
        .table(&table_name)
        .expect("just added")
        .indexes
        .clone()
    {
        cycle.enqueue_hook(HookEvent::IndexCreated {
            table: table_name.clone(),
            index: index.name,
        });
    }
    for fk in &foreign_keys {
        cycle.enqueue_hook(HookEvent::ForeignKeyCreated {
            table: table_name.clone(),
            foreign_key: fk.name.clone(),
        });
    }
    cycle.enqueue_hook(HookEvent::TableCreated {
        branch,
        table: table_name,
    });
    state.borrow_mut().pending_indexes.extend(deferred);
    Ok(())
}

fn create_branch(cycle: &mut Cycle, state: &Rc<RefCell<RepoState>>) -> Result<()> {
    let name = {
        let state = state.borrow();
        let taken = cycle.branch_names();
        state.names.generate(&cycle.rng, NameKind::Branch, &taken)?
    };
    cycle.create_branch(&name)
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

fn emit_statement(
    cycle: &mut Cycle,
    state: &Rc<RefCell<RepoState>>,
    table_name: &str,
) -> Result<()> {
    let branch = cycle.current_branch().name.clone();
    let target = cycle.blueprint.target_row_count(&branch, table_name);
    let (statement, expected_calls) = {
        let ws = cycle.working_set();
        let table = ws
            .table(table_name)
            .ok_or_else(|| FuzzerError::new(format!("table `{table_name}` vanished")))?;
        let expected = target.saturating_sub(table.data.row_count()).max(1);
        let kind = state.borrow().statements.choose(&cycle.rng, 1)?;
        let stmt = generate::generate_statement(kind, table, &ws.foreign_keys, &cycle.rng)?;
        (stmt, expected)
    };

    {
        let ws = cycle.working_set_mut();
        ws.table_mut(table_name)
            .expect("checked above")
            .data
            .exec(&statement.shadow)
            .context("applying statement to shadow store")?;
        ws.dirty = true;
    }
    let iface = cycle.choose_interface(expected_calls)?;
    cycle.submit_statement(iface, &statement.database)?;

    tick_pending_indexes(cycle, state, table_name)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Deferred indexes
// ---------------------------------------------------------------------------

fn take_due_indexes(
    state: &Rc<RefCell<RepoState>>,
    table_name: &str,
    tick: bool,
    force: bool,
) -> Vec<PendingIndex> {
    let mut state = state.borrow_mut();
    if tick {
        for pending in state
            .pending_indexes
            .iter_mut()
            .filter(|p| p.table == table_name)
        {
            pending.remaining = pending.remaining.saturating_sub(1);
        }
    }
    let mut due = Vec::new();
    let mut rest = Vec::new();
    for pending in state.pending_indexes.drain(..) {
        let matches = pending.table == table_name && (force || pending.remaining == 0);
        if matches {
            due.push(pending);
        } else {
            rest.push(pending);
        }
    }
    state.pending_indexes = rest;
    due
}

fn submit_indexes(cycle: &mut Cycle, due: Vec<PendingIndex>) -> Result<()> {
    for pending in due {
        let ddl = pending.index.create_statement(&pending.table);
        let iface = cycle.choose_interface(1)?;
        cycle.submit_statement(iface, &ddl)?;
        {
            let ws = cycle.working_set_mut();
            if let Some(table) = ws.table_mut(&pending.table) {
                table.indexes.push(pending.index.clone());
            }
            ws.dirty = true;
        }
        cycle.enqueue_hook(HookEvent::IndexCreated {
            table: pending.table,
            index: pending.index.name,
        });
    }
    Ok(())
}

fn tick_pending_indexes(
    cycle: &mut Cycle,
    state: &Rc<RefCell<RepoState>>,
    table_name: &str,
) -> Result<()> {
    let due = take_due_indexes(state, table_name, true, false);
    submit_indexes(cycle, due)
}

/// Create any still-deferred indexes for tables on the current branch before
/// it is committed and left.
fn flush_pending_indexes(cycle: &mut Cycle, state: &Rc<RefCell<RepoState>>) -> Result<()> {
    let tables: Vec<String> = cycle
        .working_set()
        .tables
        .iter()
        .map(|t| t.name.clone())
        .collect();
    for table in tables {
        let due = take_due_indexes(state, &table, false, true);
        submit_indexes(cycle, due)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(cycle: &mut Cycle) -> Result<()> {
    let branch_names = cycle.branch_names();
    for branch in &branch_names {
        cycle.switch_current_branch(branch)?;
        let table_names: Vec<String> = cycle
            .working_set()
            .tables
            .iter()
            .map(|t| t.name.clone())
            .collect();
        for name in &table_names {
            let table = cycle
                .working_set()
                .table(name)
                .expect("listed above")
                .copy();
            if let Err(err) = verify::verify_table(cycle, &table) {
                dump_on_mismatch(cycle);
                return Err(FuzzerError::wrap(
                    format!("validation failed on branch `{branch}` table `{name}`"),
                    err,
                ));
            }
        }
    }
    info!(branches = branch_names.len(), "repository validated");
    cycle.enqueue_hook(HookEvent::RepositoryFinished);
    Ok(())
}

fn dump_on_mismatch(cycle: &mut Cycle) {
    let tables: Vec<Table> = cycle.working_set().tables.iter().map(Table::copy).collect();
    let options = &cycle.config.options;
    if let Err(err) = dump::dump_internal_data(
        &cycle.dir,
        &tables,
        None,
        options.zip_internal_data,
        options.delete_after_zip,
    ) {
        warn!(error = %err, "failed to dump internal data");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
