//! Commits and the commit arena.
//!
//! Commits are nodes in an arena owned by the cycle; branches and parent
//! lists hold [`CommitId`] indices. Parents are shared by reference — the
//! graph is a DAG with shared prefixes, never a tree of copies. Deep copies
//! happen only going forward: committing a working set clones its tables
//! into the next working set.

use crate::repo::table::{ForeignKey, Table};

/// Length of a real commit hash from the database under test.
pub const COMMIT_HASH_LEN: usize = 32;

/// Arena index of a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommitId(pub usize);

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// One commit: tables, foreign keys, shared parents.
///
/// The working set is a commit with an empty hash at the tip of a branch;
/// every other commit carries a real hash and at least one parent.
#[derive(Clone, Debug)]
pub struct Commit {
    /// Empty for the working set.
    pub hash: String,
    pub parents: Vec<CommitId>,
    pub tables: Vec<Table>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Set when the working set has diverged from its parent.
    pub dirty: bool,
}

impl Commit {
    /// A fresh, empty working-set commit.
    #[must_use]
    pub fn working_set(parents: Vec<CommitId>) -> Self {
        Self {
            hash: String::new(),
            parents,
            tables: Vec::new(),
            foreign_keys: Vec::new(),
            dirty: false,
        }
    }

    /// Whether this commit is a working set.
    #[must_use]
    pub fn is_working_set(&self) -> bool {
        self.hash.is_empty()
    }

    /// Deep copy: tables (row stores included) and foreign keys are cloned;
    /// parents stay shared ids.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            hash: self.hash.clone(),
            parents: self.parents.clone(),
            tables: self.tables.iter().map(Table::copy).collect(),
            foreign_keys: self.foreign_keys.clone(),
            dirty: self.dirty,
        }
    }

    /// Look up a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Look up a table by name, mutably.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }
}

/// Validate a commit hash read back from the database.
#[must_use]
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == COMMIT_HASH_LEN && hash.bytes().all(|b| b.is_ascii_alphanumeric())
}

// ---------------------------------------------------------------------------
// CommitArena
// ---------------------------------------------------------------------------

/// Cycle-owned commit storage.
#[derive(Debug, Default)]
pub struct CommitArena {
    nodes: Vec<Commit>,
}

impl CommitArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a commit, returning its id.
    pub fn add(&mut self, commit: Commit) -> CommitId {
        self.nodes.push(commit);
        CommitId(self.nodes.len() - 1)
    }

    #[must_use]
    pub fn get(&self, id: CommitId) -> &Commit {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: CommitId) -> &mut Commit {
        &mut self.nodes[id.0]
    }

    /// Number of commits stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Close every table store in every commit. Used at `CycleEnded`.
    pub fn close_all_stores(&mut self) {
        for commit in &mut self.nodes {
            for table in &mut commit.tables {
                table.data.close();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::table::Column;
    use crate::types::TypeInstance;

    fn table_with_row(name: &str) -> Table {
        let mut t = Table::new(
            name,
            vec![Column::new("pk", TypeInstance::Int)],
            vec![Column::new("c", TypeInstance::Int)],
            Vec::new(),
        );
        t.data
            .exec(&format!("INSERT INTO `{name}` VALUES (1, 2)"))
            .unwrap();
        t
    }

    #[test]
    fn working_set_has_empty_hash() {
        let ws = Commit::working_set(vec![CommitId(0)]);
        assert!(ws.is_working_set());
        assert_eq!(ws.parents, vec![CommitId(0)]);
    }

    #[test]
    fn copy_shares_parents_but_not_tables() {
        let mut arena = CommitArena::new();
        let base = arena.add(Commit::working_set(Vec::new()));
        let mut ws = Commit::working_set(vec![base]);
        ws.tables.push(table_with_row("t"));
        let copy = ws.copy();
        assert_eq!(copy.parents, ws.parents);

        ws.table_mut("t")
            .unwrap()
            .data
            .exec("DELETE FROM `t` WHERE `pk` = 1")
            .unwrap();
        assert_eq!(copy.table("t").unwrap().data.row_count(), 1);
        assert_eq!(ws.table("t").unwrap().data.row_count(), 0);
    }

    #[test]
    fn hash_validation() {
        assert!(is_valid_hash("a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6"));
        assert!(!is_valid_hash("short"));
        assert!(!is_valid_hash("a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d!"));
    }

    #[test]
    fn close_all_stores_closes_every_table() {
        let mut arena = CommitArena::new();
        let mut ws = Commit::working_set(Vec::new());
        ws.tables.push(table_with_row("t"));
        let id = arena.add(ws);
        arena.close_all_stores();
        assert!(arena.get(id).table("t").unwrap().data.is_closed());
    }
}
