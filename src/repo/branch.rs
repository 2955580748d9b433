//! Branches.
//!
//! A branch is a named, ordered chain of commit ids. The last id always
//! points at the branch's mutable working-set commit (empty hash); every
//! preceding id points at a real commit. Sibling branches share chain
//! prefixes through the arena.

use crate::error::{FuzzerError, Result};
use crate::repo::commit::{is_valid_hash, Commit, CommitArena, CommitId};

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// A named chain of commits ending in the working set.
#[derive(Clone, Debug)]
pub struct Branch {
    pub name: String,
    /// Commit ids, oldest first; the last is the working set.
    pub commits: Vec<CommitId>,
}

impl Branch {
    /// Create a branch whose only commit is a fresh working set.
    pub fn new(name: impl Into<String>, arena: &mut CommitArena) -> Self {
        let ws = arena.add(Commit::working_set(Vec::new()));
        Self {
            name: name.into(),
            commits: vec![ws],
        }
    }

    /// The working-set commit id (last in the chain).
    #[must_use]
    pub fn working_set_id(&self) -> CommitId {
        *self.commits.last().expect("branch always has a working set")
    }

    /// The most recent real commit, if any.
    #[must_use]
    pub fn latest_commit_id(&self) -> Option<CommitId> {
        if self.commits.len() >= 2 {
            Some(self.commits[self.commits.len() - 2])
        } else {
            None
        }
    }

    /// Whether the working set has uncommitted changes.
    #[must_use]
    pub fn is_dirty(&self, arena: &CommitArena) -> bool {
        arena.get(self.working_set_id()).dirty
    }

    /// Seal the working set with `hash` and push a fresh working set whose
    /// tables are deep copies of the sealed commit.
    pub fn commit_working_set(&mut self, arena: &mut CommitArena, hash: &str) -> Result<CommitId> {
        if !is_valid_hash(hash) {
            return Err(FuzzerError::new(format!(
                "invalid commit hash {hash:?} on branch {}",
                self.name
            )));
        }
        let sealed_id = self.working_set_id();
        {
            let sealed = arena.get_mut(sealed_id);
            sealed.hash = hash.to_owned();
            sealed.dirty = false;
        }
        let mut next = arena.get(sealed_id).copy();
        next.hash = String::new();
        next.parents = vec![sealed_id];
        next.dirty = false;
        let next_id = arena.add(next);
        self.commits.push(next_id);
        Ok(sealed_id)
    }

    /// Fork a branch at this branch's last real commit. The new branch shares
    /// the whole real-commit chain and gets its own working set deep-copied
    /// from this branch's working set.
    ///
    /// The caller must have committed this branch's working set first: a
    /// dirty fork would diverge from the database, which branches from HEAD.
    pub fn fork(&self, name: impl Into<String>, arena: &mut CommitArena) -> Result<Branch> {
        if self.is_dirty(arena) {
            return Err(FuzzerError::new(format!(
                "cannot fork branch {} with a dirty working set",
                self.name
            )));
        }
        let mut commits: Vec<CommitId> = self.commits[..self.commits.len() - 1].to_vec();
        let parent = self.latest_commit_id();
        let mut ws = arena.get(self.working_set_id()).copy();
        ws.hash = String::new();
        ws.parents = parent.into_iter().collect();
        ws.dirty = false;
        let ws_id = arena.add(ws);
        commits.push(ws_id);
        Ok(Branch {
            name: name.into(),
            commits,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::table::{Column, Table};
    use crate::types::TypeInstance;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn add_table(arena: &mut CommitArena, branch: &Branch, name: &str) {
        let ws = arena.get_mut(branch.working_set_id());
        ws.tables.push(Table::new(
            name,
            vec![Column::new("pk", TypeInstance::Int)],
            vec![Column::new("c", TypeInstance::Int)],
            Vec::new(),
        ));
        ws.dirty = true;
    }

    #[test]
    fn new_branch_is_a_lone_working_set() {
        let mut arena = CommitArena::new();
        let branch = Branch::new("main", &mut arena);
        assert_eq!(branch.commits.len(), 1);
        assert!(arena.get(branch.working_set_id()).is_working_set());
        assert!(branch.latest_commit_id().is_none());
    }

    #[test]
    fn commit_seals_and_pushes_fresh_working_set() {
        let mut arena = CommitArena::new();
        let mut branch = Branch::new("main", &mut arena);
        add_table(&mut arena, &branch, "t");
        let sealed = branch.commit_working_set(&mut arena, HASH_A).unwrap();

        assert_eq!(branch.commits.len(), 2);
        assert_eq!(arena.get(sealed).hash, HASH_A);
        let ws = arena.get(branch.working_set_id());
        assert!(ws.is_working_set());
        assert_eq!(ws.parents, vec![sealed]);
        assert!(!ws.dirty);
        // The fresh working set carries a deep copy of the tables.
        assert!(ws.table("t").is_some());
    }

    #[test]
    fn commit_rejects_bad_hash() {
        let mut arena = CommitArena::new();
        let mut branch = Branch::new("main", &mut arena);
        assert!(branch.commit_working_set(&mut arena, "nope").is_err());
    }

    #[test]
    fn working_set_mutation_does_not_touch_sealed_commit() {
        let mut arena = CommitArena::new();
        let mut branch = Branch::new("main", &mut arena);
        add_table(&mut arena, &branch, "t");
        arena
            .get_mut(branch.working_set_id())
            .table_mut("t")
            .unwrap()
            .data
            .exec("INSERT INTO `t` VALUES (1, 2)")
            .unwrap();
        let sealed = branch.commit_working_set(&mut arena, HASH_A).unwrap();

        arena
            .get_mut(branch.working_set_id())
            .table_mut("t")
            .unwrap()
            .data
            .exec("DELETE FROM `t` WHERE `pk` = 1")
            .unwrap();

        assert_eq!(arena.get(sealed).table("t").unwrap().data.row_count(), 1);
    }

    #[test]
    fn fork_shares_real_commits() {
        let mut arena = CommitArena::new();
        let mut main = Branch::new("main", &mut arena);
        add_table(&mut arena, &main, "t");
        main.commit_working_set(&mut arena, HASH_A).unwrap();

        let feature = main.fork("feature", &mut arena).unwrap();
        assert_eq!(feature.commits.len(), 2);
        assert_eq!(feature.commits[0], main.commits[0]);
        assert_ne!(feature.working_set_id(), main.working_set_id());
        assert_eq!(
            arena.get(feature.working_set_id()).parents,
            vec![main.commits[0]]
        );
    }

    #[test]
    fn fork_refuses_dirty_working_set() {
        let mut arena = CommitArena::new();
        let mut main = Branch::new("main", &mut arena);
        add_table(&mut arena, &main, "t");
        main.commit_working_set(&mut arena, HASH_A).unwrap();
        add_table(&mut arena, &main, "u");
        assert!(main.fork("feature", &mut arena).is_err());
    }

    #[test]
    fn fork_working_sets_do_not_alias() {
        let mut arena = CommitArena::new();
        let mut main = Branch::new("main", &mut arena);
        add_table(&mut arena, &main, "t");
        main.commit_working_set(&mut arena, HASH_A).unwrap();
        let feature = main.fork("feature", &mut arena).unwrap();

        arena
            .get_mut(feature.working_set_id())
            .table_mut("t")
            .unwrap()
            .data
            .exec("INSERT INTO `t` VALUES (9, 9)")
            .unwrap();
        assert_eq!(
            arena.get(main.working_set_id()).table("t").unwrap().data.row_count(),
            0
        );
    }

    #[test]
    fn chains_grow_linearly() {
        let mut arena = CommitArena::new();
        let mut main = Branch::new("main", &mut arena);
        add_table(&mut arena, &main, "t");
        main.commit_working_set(&mut arena, HASH_A).unwrap();
        arena.get_mut(main.working_set_id()).dirty = true;
        main.commit_working_set(&mut arena, HASH_B).unwrap();
        assert_eq!(main.commits.len(), 3);
        assert_eq!(arena.get(main.commits[0]).hash, HASH_A);
        assert_eq!(arena.get(main.commits[1]).hash, HASH_B);
        assert!(arena.get(main.commits[2]).is_working_set());
        // The second real commit's parent is the first.
        assert_eq!(arena.get(main.commits[1]).parents, vec![main.commits[0]]);
    }
}
