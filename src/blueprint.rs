//! Per-cycle blueprint.
//!
//! The blueprint is the plan a cycle builds toward: how many branches and
//! tables to create, and how many rows each `(branch, table)` pair should
//! hold. The blueprint manager fills the targets in from configuration at
//! `CycleInitialized`; any hook may adjust them afterwards.

use std::collections::BTreeMap;
use std::time::SystemTime;

// ---------------------------------------------------------------------------
// Blueprint
// ---------------------------------------------------------------------------

/// The per-cycle plan: targets and running totals.
#[derive(Debug)]
pub struct Blueprint {
    pub start_time: SystemTime,
    /// How many branches this cycle should create (`main` included).
    pub target_branch_count: u64,
    /// How many tables `main` should hold.
    pub target_table_count: u64,
    /// Target row count per `(branch, table)`.
    target_row_counts: BTreeMap<(String, String), u64>,
    /// Statements executed so far, all transports.
    pub sql_statements_executed: u64,
}

impl Blueprint {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            target_branch_count: 1,
            target_table_count: 1,
            target_row_counts: BTreeMap::new(),
            sql_statements_executed: 0,
        }
    }

    /// Target row count for a table on a branch (0 when unset).
    #[must_use]
    pub fn target_row_count(&self, branch: &str, table: &str) -> u64 {
        self.target_row_counts
            .get(&(branch.to_owned(), table.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// Set the target row count for a `(branch, table)` pair.
    pub fn set_target_row_count(&mut self, branch: &str, table: &str, rows: u64) {
        self.target_row_counts
            .insert((branch.to_owned(), table.to_owned()), rows);
    }

    /// All `(branch, table)` pairs with a target set.
    pub fn row_targets(&self) -> impl Iterator<Item = (&(String, String), &u64)> {
        self.target_row_counts.iter()
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
