//! Property-based fuzzer for Dolt.
//!
//! Each cycle builds a random repository — branches, tables, rows — by
//! driving the database under test through randomly ordered SQL statements
//! and CLI commands, while an in-memory shadow model records what the
//! repository should contain. A cycle succeeds when the database and the
//! shadow model agree after every phase: repository build, commits, and
//! three-way merges.

pub mod blueprint;
pub mod config;
pub mod cycle;
pub mod dump;
pub mod error;
pub mod generate;
pub mod hooks;
pub mod interface;
pub mod logging;
pub mod managers;
pub mod merge;
pub mod names;
pub mod planner;
pub mod repo;
pub mod replay;
pub mod rng;
pub mod row;
pub mod sample;
pub mod sqlparse;
pub mod store;
pub mod types;
pub mod value;

pub use error::{FuzzerError, Result};
