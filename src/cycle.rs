//! Cycle orchestrator.
//!
//! A [`Cycle`] owns everything one fuzzing run needs: the action queue, the
//! hook queue and its handlers, the cycle logger, the commit arena, the
//! branch list, and the transport services. Control flow is cooperative and
//! single-threaded: the outer loop pops one action per iteration and fully
//! drains the hook queue between iterations; the loop ends when a pass finds
//! both queues empty.
//!
//! `run` guarantees cleanup exactly once regardless of errors or panics:
//! `CycleEnded` is dispatched, every table store is closed, the server
//! connection is closed, and the final log line and `err.txt` are written.
//! Directory disposition (keep, move, or discard-and-rewind for ignorable
//! errors) belongs to the planner.

use std::any::Any;
use std::collections::VecDeque;
use std::fs;
use std::io::Write as _;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::blueprint::Blueprint;
use crate::config::Config;
use crate::error::{ErrorContext as _, FuzzerError, Result};
use crate::hooks::{CycleHook, HookEvent};
use crate::interface::{self, InterfaceKind, InterfaceSet, ServerSlot};
use crate::logging::{CycleLogger, LogType};
use crate::repo::{Branch, Commit, CommitArena};
use crate::rng::RandomSource;

/// A queued continuation.
pub type Action = Box<dyn FnOnce(&mut Cycle) -> Result<()>>;

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// One fuzzing cycle.
pub struct Cycle {
    pub id: u64,
    /// Working directory of the repository under construction.
    pub dir: PathBuf,
    /// Database name the server exposes for this repository.
    pub db_name: String,
    pub config: Arc<Config>,
    pub rng: Arc<RandomSource>,
    pub blueprint: Blueprint,
    pub logger: CycleLogger,
    pub arena: CommitArena,
    branches: Vec<Branch>,
    current_branch: usize,
    actions: VecDeque<Action>,
    hook_queue: VecDeque<HookEvent>,
    handlers: Vec<Box<dyn CycleHook>>,
    interfaces: InterfaceSet,
    server: ServerSlot,
    /// Raw configuration text for the optional README drop.
    config_text: String,
}

impl Cycle {
    /// Build a cycle. Nothing touches the filesystem until [`Cycle::init`].
    #[must_use]
    pub fn new(
        id: u64,
        dir: PathBuf,
        config: Arc<Config>,
        rng: Arc<RandomSource>,
        server: ServerSlot,
        config_text: String,
    ) -> Self {
        let db_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("cycle{id}"));
        let interfaces = InterfaceSet::from_config(&config.interface_distribution);
        Self {
            id,
            dir,
            db_name,
            config,
            rng,
            blueprint: Blueprint::new(),
            logger: CycleLogger::disabled(),
            arena: CommitArena::new(),
            branches: Vec::new(),
            current_branch: 0,
            actions: VecDeque::new(),
            hook_queue: VecDeque::new(),
            handlers: Vec::new(),
            interfaces,
            server,
            config_text,
        }
    }

    // -- queues and hooks --------------------------------------------------

    /// Append a continuation; runs after everything already queued.
    pub fn queue_action(&mut self, action: impl FnOnce(&mut Cycle) -> Result<()> + 'static) {
        self.actions.push_back(Box::new(action));
    }

    /// Queue an event for the next hook drain.
    pub fn enqueue_hook(&mut self, event: HookEvent) {
        self.hook_queue.push_back(event);
    }

    /// Register a handler. Append-only; dispatch order is registration order.
    pub fn register_hook(&mut self, handler: Box<dyn CycleHook>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to every handler now, stopping at the first error.
    pub fn dispatch_now(&mut self, event: &HookEvent) -> Result<()> {
        let mut handlers = std::mem::take(&mut self.handlers);
        let mut outcome = Ok(());
        for handler in &mut handlers {
            if let Err(err) = handler.handle(self, event) {
                outcome = Err(FuzzerError::wrap(format!("hook for {event:?}"), err));
                break;
            }
        }
        // Handlers registered during dispatch landed in self.handlers.
        let registered_during = std::mem::take(&mut self.handlers);
        handlers.extend(registered_during);
        self.handlers = handlers;
        outcome
    }

    // -- lifecycle ---------------------------------------------------------

    /// Create the cycle directory, init the repository, and queue the
    /// `CycleInitialized` / `CycleStarted` events.
    pub fn init(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating cycle dir {}", self.dir.display()))?;
        self.logger = CycleLogger::open(&self.dir, self.config.options.logging)?;

        if self.config.options.include_readme_config {
            let text = format!(
                "# Fuzzer cycle {}\n\nActive configuration:\n\n```toml\n{}```\n",
                self.id, self.config_text
            );
            fs::write(self.dir.join("README.md"), text).context("writing README.md")?;
        }

        self.cli_query(&["init"])?;
        let head = self.read_head_hash()?;
        let mut main = Branch::new("main", &mut self.arena);
        main.commit_working_set(&mut self.arena, &head)
            .context("recording initial commit")?;
        self.branches.push(main);
        self.current_branch = 0;

        self.enqueue_hook(HookEvent::CycleInitialized);
        self.enqueue_hook(HookEvent::CycleStarted);
        Ok(())
    }

    /// Drive the cycle to completion. Cleanup runs exactly once, panics
    /// included; the terminal error (if any) is returned.
    pub fn run(&mut self) -> Result<()> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.drive()));
        let mut failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => Some(panic_to_error(panic)),
        };

        // CycleEnded is always dispatched, and dispatched exactly once.
        let ended = catch_unwind(AssertUnwindSafe(|| {
            self.dispatch_now(&HookEvent::CycleEnded)
        }));
        match ended {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if failure.is_none() {
                    failure = Some(err);
                } else {
                    warn!(error = %err, "CycleEnded hook failed after cycle error");
                }
            }
            Err(panic) => {
                let err = panic_to_error(panic);
                if failure.is_none() {
                    failure = Some(err);
                } else {
                    warn!(error = %err, "CycleEnded hook panicked after cycle error");
                }
            }
        }

        self.arena.close_all_stores();
        interface::close_server(&self.server);

        match &failure {
            None => {
                let _ = self.logger.log(LogType::Info, "Cycle finished successfully");
            }
            Some(err) => {
                let _ = self.logger.log(LogType::Err, &err.to_string());
                let _ = fs::File::create(self.dir.join("err.txt"))
                    .and_then(|mut f| writeln!(f, "{err:#}"));
            }
        }
        let _ = self.logger.flush();

        match failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn drive(&mut self) -> Result<()> {
        loop {
            while let Some(event) = self.hook_queue.pop_front() {
                self.dispatch_now(&event)?;
            }
            match self.actions.pop_front() {
                Some(action) => action(self)?,
                None => {
                    if self.hook_queue.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }

    // -- branch graph ------------------------------------------------------

    /// Look up a branch by name.
    #[must_use]
    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// The checked-out branch.
    #[must_use]
    pub fn current_branch(&self) -> &Branch {
        &self.branches[self.current_branch]
    }

    /// All branch names, creation order.
    #[must_use]
    pub fn branch_names(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.name.clone()).collect()
    }

    #[must_use]
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// The current branch's working-set commit.
    #[must_use]
    pub fn working_set(&self) -> &Commit {
        self.arena.get(self.current_branch().working_set_id())
    }

    /// The current branch's working-set commit, mutably.
    pub fn working_set_mut(&mut self) -> &mut Commit {
        let id = self.branches[self.current_branch].working_set_id();
        self.arena.get_mut(id)
    }

    /// Commit the working set if dirty, then check out `branch`.
    /// No-op when already current; unknown names fail.
    pub fn switch_current_branch(&mut self, name: &str) -> Result<()> {
        if self.current_branch().name == name {
            return Ok(());
        }
        let idx = self
            .branches
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| FuzzerError::new(format!("unknown branch {name:?}")))?;
        if self.current_branch().is_dirty(&self.arena) {
            self.commit_current_branch()?;
        }
        self.cli_query(&["checkout", name])?;
        self.current_branch = idx;
        self.enqueue_hook(HookEvent::BranchSwitched {
            branch: name.to_owned(),
        });
        Ok(())
    }

    /// Seal the current working set as a real commit and read its hash back.
    pub fn commit_current_branch(&mut self) -> Result<String> {
        self.cli_query(&["add", "-A"])?;
        self.cli_query(&["commit", "-m", "fuzzer checkpoint"])?;
        let hash = self.read_head_hash()?;
        let branch_name = self.current_branch().name.clone();
        let branch = &mut self.branches[self.current_branch];
        branch.commit_working_set(&mut self.arena, &hash)?;
        self.enqueue_hook(HookEvent::CommitCreated {
            branch: branch_name,
            hash: hash.clone(),
        });
        debug!(hash = %hash, "committed working set");
        Ok(hash)
    }

    /// Create `name` at the current branch's head, committing first if the
    /// working set is dirty.
    pub fn create_branch(&mut self, name: &str) -> Result<()> {
        if self.branch(name).is_some() {
            return Err(FuzzerError::new(format!("branch {name:?} already exists")));
        }
        if self.current_branch().is_dirty(&self.arena) {
            self.commit_current_branch()?;
        }
        self.cli_query(&["branch", name])?;
        let forked = self.branches[self.current_branch].fork(name, &mut self.arena)?;
        self.branches.push(forked);
        self.enqueue_hook(HookEvent::BranchCreated {
            branch: name.to_owned(),
        });
        Ok(())
    }

    // -- transports --------------------------------------------------------

    /// Spawn the database binary; non-empty stderr or a failing exit status
    /// is an error. Closes the server connection first.
    pub fn cli_query(&mut self, args: &[&str]) -> Result<String> {
        let (stdout, stderr, success) = self.cli_query_raw(args)?;
        if !stderr.trim().is_empty() {
            return Err(FuzzerError::new(format!(
                "dolt {} wrote to stderr: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        if !success {
            return Err(FuzzerError::new(format!(
                "dolt {} exited with failure",
                args.join(" ")
            )));
        }
        Ok(stdout)
    }

    /// As [`Cycle::cli_query`] but hands the caller stdout, stderr, and the
    /// exit status untouched. The merge engine needs this: a conflicted
    /// merge is a result, not a failure.
    pub fn cli_query_raw(&mut self, args: &[&str]) -> Result<(String, String, bool)> {
        interface::close_server(&self.server);
        self.logger.log(
            LogType::Cli,
            &format!("dolt {}", crate::logging::render_cli_args(args)),
        )?;
        let output = Command::new("dolt")
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| FuzzerError::external(format!("spawning dolt {}", args.join(" ")), e))?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.success(),
        ))
    }

    /// Execute a statement over the reused server connection, with the
    /// pre/post statement hooks around it.
    pub fn sql_server(&mut self, stmt: &str) -> Result<()> {
        self.dispatch_now(&HookEvent::SqlStatementPreExecution {
            statement: stmt.to_owned(),
        })?;
        self.logger.log(LogType::SqlServer, stmt)?;
        let port = self.config.options.port as u16;
        interface::with_server(&self.server, &self.dir, port, &self.db_name, |conn| {
            use mysql::prelude::Queryable as _;
            conn.query_drop(stmt).map_err(FuzzerError::from)
        })
        .with_context(|| format!("executing {stmt:?} over server connection"))?;
        self.dispatch_now(&HookEvent::SqlStatementPostExecution {
            statement: stmt.to_owned(),
        })?;
        Ok(())
    }

    /// Pick a transport for a batch of `expected_calls` statements.
    pub fn choose_interface(&self, expected_calls: u64) -> Result<InterfaceKind> {
        self.interfaces.choose(&self.rng, expected_calls)
    }

    /// Submit one statement through the chosen transport.
    pub fn submit_statement(&mut self, iface: InterfaceKind, stmt: &str) -> Result<()> {
        match iface {
            InterfaceKind::Server => self.sql_server(stmt)?,
            InterfaceKind::CliQuery => {
                interface::close_server(&self.server);
                self.logger.log(LogType::SqlQuery, stmt)?;
                let output = Command::new("dolt")
                    .args(["sql", "-q", stmt])
                    .current_dir(&self.dir)
                    .stdin(Stdio::null())
                    .output()
                    .map_err(|e| FuzzerError::external("spawning dolt sql -q", e))?;
                check_sql_process(stmt, &output)?;
            }
            InterfaceKind::CliBatch => {
                interface::close_server(&self.server);
                self.logger.log(LogType::SqlBatch, stmt)?;
                let mut child = Command::new("dolt")
                    .arg("sql")
                    .current_dir(&self.dir)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| FuzzerError::external("spawning dolt sql", e))?;
                {
                    let stdin = child.stdin.as_mut().expect("stdin piped");
                    writeln!(stdin, "{stmt};").context("writing statement batch")?;
                }
                let output = child
                    .wait_with_output()
                    .map_err(|e| FuzzerError::external("waiting for dolt sql", e))?;
                check_sql_process(stmt, &output)?;
            }
        }
        self.blueprint.sql_statements_executed += 1;
        Ok(())
    }

    /// Run a read query over the server connection, returning raw wire rows.
    pub fn server_query_rows(&mut self, sql: &str) -> Result<Vec<Vec<mysql::Value>>> {
        let port = self.config.options.port as u16;
        interface::with_server(&self.server, &self.dir, port, &self.db_name, |conn| {
            interface::query_rows(conn, sql)
        })
    }

    /// Close the shared server connection, if open.
    pub fn close_server_connection(&self) {
        interface::close_server(&self.server);
    }

    /// Number of queued actions (test inspection).
    #[cfg(test)]
    pub(crate) fn queued_actions(&self) -> usize {
        self.actions.len()
    }

    /// Direct branch-list access for tests that bypass `init`.
    #[cfg(test)]
    pub(crate) fn branches_mut_for_tests(&mut self) -> &mut Vec<Branch> {
        &mut self.branches
    }

    fn read_head_hash(&mut self) -> Result<String> {
        let stdout = self.cli_query(&["log", "-n", "1"])?;
        parse_head_hash(&stdout)
    }
}

fn check_sql_process(stmt: &str, output: &std::process::Output) -> Result<()> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return Err(FuzzerError::new(format!(
            "statement {stmt:?} wrote to stderr: {}",
            stderr.trim()
        )));
    }
    if !output.status.success() {
        return Err(FuzzerError::new(format!(
            "statement {stmt:?} exited with failure"
        )));
    }
    Ok(())
}

fn parse_head_hash(log_output: &str) -> Result<String> {
    for line in log_output.lines() {
        if let Some(rest) = line.strip_prefix("commit ") {
            let hash = rest.split_whitespace().next().unwrap_or("");
            if crate::repo::commit::is_valid_hash(hash) {
                return Ok(hash.to_owned());
            }
            return Err(FuzzerError::new(format!(
                "malformed commit hash {hash:?} in log output"
            )));
        }
    }
    Err(FuzzerError::new("no commit hash found in log output"))
}

fn panic_to_error(panic: Box<dyn Any + Send>) -> FuzzerError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    };
    FuzzerError::new(format!("panic in cycle: {message}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
