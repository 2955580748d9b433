//! Three-way merge engine.
//!
//! [`process_merge`] reconciles the tables of two descendants of a common
//! base commit. Table-level presence drives the outcome: a table added on
//! exactly one side is promoted verbatim; a table present in all three runs
//! the row-level walk in [`rows`]; deletion shapes and double-adds are not
//! supported and fail the cycle.
//!
//! [`MergeManager`] drives `fuzzer merge` cycles: it raises the branch
//! target to at least two and, once the repository is built and validated,
//! merges every non-main branch into a synthetic branch forked from `main`,
//! comparing the database's merge result and conflict rows against the
//! shadow merge.

pub mod rows;
pub mod verify;

use std::collections::BTreeMap;

use tracing::info;

use crate::cycle::Cycle;
use crate::error::{ErrorContext as _, FuzzerError, Result};
use crate::hooks::{CycleHook, HookEvent};
use crate::repo::{Branch, CommitArena, CommitId, Table};

pub use rows::{merge_rows, TableMerge};

/// Presence bits for the table-level cases.
const IN_BASE: u8 = 1;
const IN_OURS: u8 = 2;
const IN_THEIRS: u8 = 4;

// ---------------------------------------------------------------------------
// Table-level merge
// ---------------------------------------------------------------------------

/// Merge the tables of `ours` and `theirs` against `base`.
pub fn process_merge(
    arena: &CommitArena,
    base: CommitId,
    ours: CommitId,
    theirs: CommitId,
) -> Result<Vec<TableMerge>> {
    let base_commit = arena.get(base);
    let ours_commit = arena.get(ours);
    let theirs_commit = arena.get(theirs);

    let mut presence: BTreeMap<&str, u8> = BTreeMap::new();
    for table in &base_commit.tables {
        *presence.entry(table.name.as_str()).or_default() |= IN_BASE;
    }
    for table in &ours_commit.tables {
        *presence.entry(table.name.as_str()).or_default() |= IN_OURS;
    }
    for table in &theirs_commit.tables {
        *presence.entry(table.name.as_str()).or_default() |= IN_THEIRS;
    }

    let mut merges = Vec::with_capacity(presence.len());
    for (name, mask) in presence {
        match mask {
            IN_OURS => {
                let table = ours_commit.table(name).expect("presence bit set");
                merges.push(TableMerge {
                    table: table.copy(),
                    conflicts: Vec::new(),
                });
            }
            IN_THEIRS => {
                let table = theirs_commit.table(name).expect("presence bit set");
                merges.push(TableMerge {
                    table: table.copy(),
                    conflicts: Vec::new(),
                });
            }
            mask if mask == IN_BASE | IN_OURS | IN_THEIRS => {
                let base_table = base_commit.table(name).expect("presence bit set");
                let ours_table = ours_commit.table(name).expect("presence bit set");
                let theirs_table = theirs_commit.table(name).expect("presence bit set");
                merges.push(merge_rows(base_table, ours_table, theirs_table));
            }
            mask if mask == IN_OURS | IN_THEIRS => {
                return Err(FuzzerError::new(format!(
                    "table `{name}` added on both sides of the merge is not supported"
                )));
            }
            _ => {
                // Cases 1, 3, 5: the table disappeared from at least one side.
                return Err(FuzzerError::new(format!(
                    "table `{name}` deleted on a merge side; table deletion is not yet supported"
                )));
            }
        }
    }
    Ok(merges)
}

/// The last common commit of two branch chains, if any.
#[must_use]
pub fn common_base(ours: &Branch, theirs: &Branch) -> Option<CommitId> {
    let theirs_real = &theirs.commits[..theirs.commits.len() - 1];
    ours.commits[..ours.commits.len() - 1]
        .iter()
        .rev()
        .find(|id| theirs_real.contains(id))
        .copied()
}

// ---------------------------------------------------------------------------
// MergeManager
// ---------------------------------------------------------------------------

/// Hook handler driving merge cycles.
#[derive(Debug, Default)]
pub struct MergeManager;

impl CycleHook for MergeManager {
    fn handle(&mut self, cycle: &mut Cycle, event: &HookEvent) -> Result<()> {
        match event {
            HookEvent::CycleInitialized => {
                // A merge needs something to merge.
                if cycle.blueprint.target_branch_count < 2 {
                    cycle.blueprint.target_branch_count = 2;
                }
                Ok(())
            }
            HookEvent::RepositoryFinished => {
                cycle.queue_action(run_merges);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn run_merges(cycle: &mut Cycle) -> Result<()> {
    let theirs_names: Vec<String> = cycle
        .branch_names()
        .into_iter()
        .filter(|name| name != "main")
        .collect();
    for theirs in &theirs_names {
        run_one_merge(cycle, theirs)
            .with_context(|| format!("merging `{theirs}` into `main`"))?;
    }
    Ok(())
}

fn run_one_merge(cycle: &mut Cycle, theirs_name: &str) -> Result<()> {
    cycle.switch_current_branch("main")?;
    let merge_branch = format!("merge_main_{theirs_name}");
    cycle.create_branch(&merge_branch)?;
    cycle.switch_current_branch(&merge_branch)?;

    let (base_id, ours_ws, theirs_ws) = {
        let ours_branch = cycle.current_branch();
        let theirs_branch = cycle
            .branch(theirs_name)
            .ok_or_else(|| FuzzerError::new(format!("unknown branch {theirs_name:?}")))?;
        let base_id = common_base(ours_branch, theirs_branch).ok_or_else(|| {
            FuzzerError::new(format!(
                "branches `{merge_branch}` and `{theirs_name}` share no commit"
            ))
        })?;
        (
            base_id,
            ours_branch.working_set_id(),
            theirs_branch.working_set_id(),
        )
    };

    let merges = process_merge(&cycle.arena, base_id, ours_ws, theirs_ws)?;
    let conflicted = merges.iter().any(|m| !m.conflicts.is_empty());

    // The database merge. A conflicted merge is a result to verify, not a
    // command failure, so the raw variant is used and the status is judged
    // against the shadow expectation.
    let (_stdout, stderr, success) = cycle.cli_query_raw(&["merge", theirs_name])?;
    if !success && !conflicted {
        return Err(FuzzerError::new(format!(
            "dolt merge {theirs_name} failed but the shadow merge is clean: {}",
            stderr.trim()
        )));
    }

    // The merged tables become the synthetic branch's model state so the
    // lockstep verification reads them. The database merge made its own
    // commit (or left conflicts), so the working set stays clean: switching
    // away must not try to commit on top of it.
    let tables: Vec<Table> = merges.iter().map(|m| m.table.copy()).collect();
    cycle.working_set_mut().tables = tables;

    for merge in &merges {
        verify::verify_table(cycle, &merge.table)?;
        verify::verify_conflicts(cycle, &merge.table, &merge.conflicts)?;
    }
    info!(
        branch = %merge_branch,
        theirs = theirs_name,
        conflicts = merges.iter().map(|m| m.conflicts.len()).sum::<usize>(),
        "merge verified"
    );

    if conflicted {
        // Leave the repository mergeable for the next synthetic branch.
        let _ = cycle.cli_query_raw(&["merge", "--abort"])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
