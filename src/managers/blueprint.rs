//! Blueprint manager.
//!
//! Fills the per-cycle blueprint in from configuration: branch and table
//! targets at `CycleInitialized`, and a row-count target for every
//! `(branch, table)` pair as branches and tables appear. With
//! `Enforce_Rows_Lower_Bound_on_Master_Only`, rows on non-main branches are
//! sampled from `[0, upper]` instead of the configured range.

use crate::cycle::Cycle;
use crate::error::Result;
use crate::hooks::{CycleHook, HookEvent};

/// Fills blueprint targets from configuration.
#[derive(Debug, Default)]
pub struct BlueprintManager;

impl CycleHook for BlueprintManager {
    fn handle(&mut self, cycle: &mut Cycle, event: &HookEvent) -> Result<()> {
        match event {
            HookEvent::CycleInitialized => {
                let amounts = &cycle.config.amounts;
                cycle.blueprint.target_branch_count = amounts.branches.sample(&cycle.rng);
                cycle.blueprint.target_table_count = amounts.tables.sample(&cycle.rng);
                Ok(())
            }
            HookEvent::TableCreated { branch, table } => {
                let rows = sample_rows(cycle, branch);
                cycle.blueprint.set_target_row_count(branch, table, rows);
                Ok(())
            }
            HookEvent::BranchCreated { branch } => {
                let tables: Vec<String> = {
                    let Some(b) = cycle.branch(branch) else {
                        return Ok(());
                    };
                    cycle
                        .arena
                        .get(b.working_set_id())
                        .tables
                        .iter()
                        .map(|t| t.name.clone())
                        .collect()
                };
                for table in tables {
                    let rows = sample_rows(cycle, branch);
                    cycle.blueprint.set_target_row_count(branch, &table, rows);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn sample_rows(cycle: &Cycle, branch: &str) -> u64 {
    let range = cycle.config.amounts.rows;
    if branch != "main" && cycle.config.options.enforce_rows_lower_bound_on_master_only {
        cycle.rng.u64_range(0, range.upper)
    } else {
        range.sample(&cycle.rng)
    }
}
