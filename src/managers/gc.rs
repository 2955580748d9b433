//! GC manager.
//!
//! With `Manual_GC` enabled, every run of more than 150 statements triggers
//! one `dolt gc`, and a final `gc` runs when the repository build finishes.

use tracing::debug;

use crate::cycle::Cycle;
use crate::error::Result;
use crate::hooks::{CycleHook, HookEvent};

/// Statements between manual GC passes.
const GC_STATEMENT_THRESHOLD: u64 = 150;

/// Issues `dolt gc` as statements accumulate.
#[derive(Debug, Default)]
pub struct GcManager {
    statements_since_gc: u64,
}

impl CycleHook for GcManager {
    fn handle(&mut self, cycle: &mut Cycle, event: &HookEvent) -> Result<()> {
        if !cycle.config.options.manual_gc {
            return Ok(());
        }
        match event {
            HookEvent::SqlStatementPostExecution { .. } => {
                self.statements_since_gc += 1;
                if self.statements_since_gc > GC_STATEMENT_THRESHOLD {
                    self.statements_since_gc = 0;
                    debug!("queueing manual gc");
                    cycle.queue_action(run_gc);
                }
                Ok(())
            }
            HookEvent::RepositoryFinished => {
                self.statements_since_gc = 0;
                cycle.queue_action(run_gc);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn run_gc(cycle: &mut Cycle) -> Result<()> {
    cycle.cli_query(&["gc"]).map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
