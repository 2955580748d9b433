//! The fuzzer's mirror of the repository under test: branches holding linear
//! chains of commits, commits owning tables, tables owning shadow row stores.

pub mod branch;
pub mod commit;
pub mod table;

pub use branch::Branch;
pub use commit::{Commit, CommitArena, CommitId};
pub use table::{Column, ForeignKey, Index, Table};
