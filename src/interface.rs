//! SQL transports.
//!
//! Three ways to hand a statement to the database under test: a one-shot
//! `dolt sql -q` invocation, a `dolt sql` process fed over stdin, and a
//! long-lived `dolt sql-server` with a reused SQL connection. Transport
//! choice goes through the weighted sampler with an expected-call count so a
//! whole batch amortizes one selection.
//!
//! The server connection is a process-wide singleton guarded by a mutex and
//! passed into each cycle as a service. It is reused across cycles when
//! `(port, database)` match and closed before any CLI invocation — the CLI
//! and the server cannot touch the repository concurrently.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mysql::prelude::Queryable as _;
use tracing::debug;

use crate::config::{InterfaceDistribution, IntRange};
use crate::error::{FuzzerError, Result};
use crate::logging::LogType;
use crate::rng::RandomSource;
use crate::sample::{self, Distributable};

/// Wall-clock budget for the server process to accept connections.
const SERVER_START_TIMEOUT: Duration = Duration::from_secs(5);
/// Additional budget for pings to succeed once connected.
const SERVER_PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Poll interval during startup.
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// InterfaceKind
// ---------------------------------------------------------------------------

/// The three transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceKind {
    CliQuery,
    CliBatch,
    Server,
}

impl InterfaceKind {
    /// Log tag for statements submitted through this transport.
    #[must_use]
    pub const fn log_type(self) -> LogType {
        match self {
            Self::CliQuery => LogType::SqlQuery,
            Self::CliBatch => LogType::SqlBatch,
            Self::Server => LogType::SqlServer,
        }
    }
}

// ---------------------------------------------------------------------------
// InterfaceSet
// ---------------------------------------------------------------------------

struct WeightedInterface {
    kind: InterfaceKind,
    range: IntRange,
}

impl Distributable for WeightedInterface {
    fn occurrence_rate(&self, rng: &RandomSource) -> u64 {
        self.range.sample(rng)
    }
}

/// The configured transport distribution.
pub struct InterfaceSet {
    entries: Vec<WeightedInterface>,
}

impl InterfaceSet {
    #[must_use]
    pub fn from_config(dist: &InterfaceDistribution) -> Self {
        Self {
            entries: vec![
                WeightedInterface {
                    kind: InterfaceKind::CliQuery,
                    range: dist.cli_query,
                },
                WeightedInterface {
                    kind: InterfaceKind::CliBatch,
                    range: dist.cli_batch,
                },
                WeightedInterface {
                    kind: InterfaceKind::Server,
                    range: dist.sql_server,
                },
            ],
        }
    }

    /// Pick a transport for a batch of `expected_calls` statements.
    pub fn choose(&self, rng: &RandomSource, expected_calls: u64) -> Result<InterfaceKind> {
        let refs: Vec<&WeightedInterface> = self.entries.iter().collect();
        let idx = sample::select(rng, expected_calls.max(1), &refs)?;
        Ok(self.entries[idx].kind)
    }
}

// ---------------------------------------------------------------------------
// Server connection singleton
// ---------------------------------------------------------------------------

/// A live server process plus its SQL connection.
pub struct ServerConnection {
    process: Child,
    conn: mysql::Conn,
    port: u16,
    db_name: String,
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Process-wide server slot. Constructed once and passed into every cycle.
pub type ServerSlot = Arc<Mutex<Option<ServerConnection>>>;

/// A fresh, empty slot.
#[must_use]
pub fn new_server_slot() -> ServerSlot {
    Arc::new(Mutex::new(None))
}

/// Close whatever the slot holds. Killing the process is part of dropping
/// the connection.
pub fn close_server(slot: &ServerSlot) {
    let mut guard = slot.lock().expect("server slot poisoned");
    if guard.take().is_some() {
        debug!("closed server connection");
    }
}

/// Run `f` against the server connection for `(port, db_name)`, starting or
/// restarting the server in `repo_dir` as needed.
pub fn with_server<R>(
    slot: &ServerSlot,
    repo_dir: &Path,
    port: u16,
    db_name: &str,
    f: impl FnOnce(&mut mysql::Conn) -> Result<R>,
) -> Result<R> {
    let mut guard = slot.lock().expect("server slot poisoned");
    let reusable = matches!(
        guard.as_ref(),
        Some(server) if server.port == port && server.db_name == db_name
    );
    if !reusable {
        *guard = None; // kills any mismatched server first
        *guard = Some(start_server(repo_dir, port, db_name)?);
    }
    let server = guard.as_mut().expect("slot populated above");
    f(&mut server.conn)
}

/// Spawn `dolt sql-server` and wait for it to accept and answer.
///
/// Startup failures are ignorable: they indicate an environment problem, not
/// a database defect.
fn start_server(repo_dir: &Path, port: u16, db_name: &str) -> Result<ServerConnection> {
    let mut process = Command::new("dolt")
        .args(["sql-server", "--host", "127.0.0.1", "--port", &port.to_string()])
        .current_dir(repo_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| FuzzerError::external("spawning dolt sql-server", e))?;

    let connect_result = wait_for_connection(&mut process, port);
    let mut conn = match connect_result {
        Ok(conn) => conn,
        Err(err) => {
            let _ = process.kill();
            let _ = process.wait();
            return Err(err);
        }
    };

    if let Err(err) = wait_for_pings(&mut conn) {
        let _ = process.kill();
        let _ = process.wait();
        return Err(err);
    }

    if let Err(err) = conn
        .query_drop(format!("USE `{db_name}`"))
        .map_err(FuzzerError::from)
    {
        let _ = process.kill();
        let _ = process.wait();
        return Err(FuzzerError::wrap("selecting cycle database", err));
    }

    debug!(port, db_name, "server connection established");
    Ok(ServerConnection {
        process,
        conn,
        port,
        db_name: db_name.to_owned(),
    })
}

fn wait_for_connection(process: &mut Child, port: u16) -> Result<mysql::Conn> {
    let deadline = Instant::now() + SERVER_START_TIMEOUT;
    loop {
        if let Some(status) = process
            .try_wait()
            .map_err(|e| FuzzerError::external("polling dolt sql-server", e))?
        {
            return Err(FuzzerError::ignorable(format!(
                "dolt sql-server exited during startup with {status}"
            )));
        }
        let opts = mysql::OptsBuilder::new()
            .ip_or_hostname(Some("127.0.0.1"))
            .tcp_port(port)
            .user(Some("root"))
            .tcp_connect_timeout(Some(SERVER_POLL_INTERVAL));
        match mysql::Conn::new(opts) {
            Ok(conn) => return Ok(conn),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(SERVER_POLL_INTERVAL);
            }
            Err(e) => {
                return Err(FuzzerError::wrap(
                    "server did not accept connections within 5s",
                    FuzzerError::ignorable(e.to_string()),
                ));
            }
        }
    }
}

fn wait_for_pings(conn: &mut mysql::Conn) -> Result<()> {
    let deadline = Instant::now() + SERVER_PING_TIMEOUT;
    loop {
        match conn.query_drop("SELECT 1") {
            Ok(()) => return Ok(()),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(SERVER_POLL_INTERVAL);
            }
            Err(e) => {
                return Err(FuzzerError::wrap(
                    "server did not answer pings within 5s",
                    FuzzerError::ignorable(e.to_string()),
                ));
            }
        }
    }
}

/// Run a query over the server connection, collecting raw wire rows.
pub fn query_rows(conn: &mut mysql::Conn, sql: &str) -> Result<Vec<Vec<mysql::Value>>> {
    let result = conn
        .query_iter(sql)
        .map_err(|e| FuzzerError::wrap(format!("querying {sql:?}"), e.into()))?;
    let mut rows = Vec::new();
    for row in result {
        let row = row.map_err(FuzzerError::from)?;
        rows.push(row.unwrap());
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
