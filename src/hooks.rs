//! Hook bus.
//!
//! The hook set is closed: every event the cycle can emit is a variant of
//! [`HookEvent`], with its parameters inline. Handlers implement
//! [`CycleHook`] and match on the variants they care about. Registration is
//! append-only; dispatch runs handlers in registration order and stops at
//! the first error.
//!
//! Structural events (`BranchCreated`, `TableCreated`, ...) are queued and
//! drained between actions by the cycle loop. The statement pre/post pair is
//! dispatched synchronously around each server statement.

use crate::cycle::Cycle;
use crate::error::Result;

// ---------------------------------------------------------------------------
// HookEvent
// ---------------------------------------------------------------------------

/// Everything a cycle can announce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookEvent {
    CycleInitialized,
    CycleStarted,
    /// Always the last event of a cycle, dispatched exactly once.
    CycleEnded,
    RepositoryFinished,
    BranchCreated {
        branch: String,
    },
    BranchSwitched {
        branch: String,
    },
    CommitCreated {
        branch: String,
        hash: String,
    },
    TableCreated {
        branch: String,
        table: String,
    },
    IndexCreated {
        table: String,
        index: String,
    },
    ForeignKeyCreated {
        table: String,
        foreign_key: String,
    },
    SqlStatementPreExecution {
        statement: String,
    },
    SqlStatementPostExecution {
        statement: String,
    },
}

// ---------------------------------------------------------------------------
// CycleHook
// ---------------------------------------------------------------------------

/// A registered hook handler.
///
/// Handlers receive the cycle mutably and may queue actions or further
/// hooks; the cycle loop converges as long as producers eventually stop.
pub trait CycleHook {
    /// Handle one event. An error aborts dispatch for this event and fails
    /// the cycle.
    fn handle(&mut self, cycle: &mut Cycle, event: &HookEvent) -> Result<()>;
}
