#![allow(dead_code)]

use agencydb::db::schema::{COLUMN_EXISTS, READ_AUDIT_IDENTITY, TABLE_EXISTS};
use agencydb::db::{PoolConnector, RowSet, SqlParam, Statement, TenantPool};
use agencydb::{ActingUser, AgencyDbError, Config, ErrorKind, TenantId};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

static ADD_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"ALTER TABLE "\w+"\."(\w+)" ADD COLUMN IF NOT EXISTS "(\w+)""#).unwrap()
});
static CREATE_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"CREATE TABLE IF NOT EXISTS "\w+"\."(\w+)""#).unwrap());

/// A failure the fake database reports.
#[derive(Debug, Clone)]
pub struct Fault {
    pub kind: ErrorKind,
    pub sqlstate: &'static str,
    pub message: String,
}

impl Fault {
    pub fn connectivity() -> Self {
        Self {
            kind: ErrorKind::Connectivity,
            sqlstate: "08006",
            message: "connection reset by peer".into(),
        }
    }

    pub fn integrity() -> Self {
        Self {
            kind: ErrorKind::Integrity,
            sqlstate: "23505",
            message: "duplicate key value violates unique constraint".into(),
        }
    }

    pub fn missing_function(name: &str) -> Self {
        Self {
            kind: ErrorKind::Schema,
            sqlstate: "42883",
            message: format!("function {name}(text) does not exist"),
        }
    }

    fn to_error(&self, tenant: &TenantId) -> AgencyDbError {
        AgencyDbError::query(self.kind, tenant, self.message.clone()).with_sqlstate(self.sqlstate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub tenant: String,
    pub sql: String,
    pub acting_user: Option<String>,
    /// Audit setting as a trigger would have read it while the statement ran.
    pub audit_seen: String,
}

#[derive(Default)]
pub struct FakeState {
    pub columns: HashSet<(String, String)>,
    pub tables: HashSet<String>,
    /// Business statements that reference `sql fragment` need `(table, column)`.
    pub requirements: Vec<(String, String, String)>,
    /// Failures returned by the next `run` calls, oldest first.
    pub queued_faults: VecDeque<Fault>,
    /// Statements containing the fragment always fail.
    pub sql_faults: Vec<(String, Fault)>,
    pub ddl_takes_effect: bool,
    pub connect_delay: Option<Duration>,
    pub connect_fault: Option<Fault>,
    /// Every `run` sleeps this long before touching the database.
    pub run_delay: Option<Duration>,
    /// `close` waits for a notification, like a pool draining busy connections.
    pub close_gate: Option<Arc<Notify>>,

    pub connects: usize,
    /// `run` calls that reached the pool, including ones cut short by a timeout.
    pub started: usize,
    pub closes: usize,
    pub runs: usize,
    pub ddl_runs: usize,
    pub attempted: Vec<String>,
    pub committed: Vec<Committed>,
    /// Session-level audit setting. Only transaction-local identities are ever
    /// stamped, so this stays empty unless a test seeds it.
    pub session_audit: String,
}

/// Shared in-memory stand-in for every tenant database.
#[derive(Clone)]
pub struct FakeDb {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeDb {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDb {
    pub fn new() -> Self {
        let state = FakeState {
            ddl_takes_effect: true,
            ..FakeState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector { db: self.clone() }
    }

    pub fn with_table(self, table: &str, columns: &[&str]) -> Self {
        {
            let mut state = self.state();
            state.tables.insert(table.to_string());
            for column in columns {
                state
                    .columns
                    .insert((table.to_string(), column.to_string()));
            }
        }
        self
    }

    pub fn require(&self, sql_fragment: &str, table: &str, column: &str) {
        self.state().requirements.push((
            sql_fragment.to_string(),
            table.to_string(),
            column.to_string(),
        ));
    }

    pub fn fail_next(&self, fault: Fault, times: usize) {
        let mut state = self.state();
        for _ in 0..times {
            state.queued_faults.push_back(fault.clone());
        }
    }

    pub fn fail_sql(&self, sql_fragment: &str, fault: Fault) {
        self.state()
            .sql_faults
            .push((sql_fragment.to_string(), fault));
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.state()
            .columns
            .contains(&(table.to_string(), column.to_string()))
    }

    fn run(
        &self,
        tenant: &TenantId,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
    ) -> Result<Vec<RowSet>, AgencyDbError> {
        let mut state = self.state();
        state.runs += 1;
        if let Some(fault) = state.queued_faults.pop_front() {
            return Err(fault.to_error(tenant));
        }

        // Work on a copy; it only becomes visible on commit.
        let mut columns = state.columns.clone();
        let mut tables = state.tables.clone();
        let mut pending = Vec::new();
        let mut sets = Vec::with_capacity(statements.len());
        let tx_audit = acting_user.map(|u| u.as_str().to_string());

        for stmt in statements {
            state.attempted.push(stmt.sql.clone());
            let audit_seen = tx_audit.clone().unwrap_or_else(|| state.session_audit.clone());

            if stmt.sql == COLUMN_EXISTS || stmt.sql == TABLE_EXISTS {
                let table = text_param(&stmt.params, 1);
                let found = if stmt.sql == COLUMN_EXISTS {
                    columns.contains(&(table, text_param(&stmt.params, 2)))
                } else {
                    tables.contains(&table)
                };
                sets.push(found_rows(found));
                continue;
            }
            if stmt.sql == READ_AUDIT_IDENTITY {
                let mut row = Map::new();
                row.insert("acting_user".into(), Value::String(audit_seen));
                sets.push(RowSet {
                    columns: vec!["acting_user".into()],
                    rows: vec![row],
                    rows_affected: 0,
                });
                continue;
            }

            if let Some((_, fault)) = state
                .sql_faults
                .iter()
                .find(|(fragment, _)| stmt.sql.contains(fragment.as_str()))
            {
                return Err(fault.to_error(tenant));
            }

            let is_ddl = stmt.sql.starts_with("ALTER TABLE")
                || stmt.sql.starts_with("CREATE ")
                || stmt.sql.starts_with("UPDATE \"");
            if is_ddl {
                state.ddl_runs += 1;
                if state.ddl_takes_effect {
                    if let Some(caps) = ADD_COLUMN.captures(&stmt.sql) {
                        columns.insert((caps[1].to_string(), caps[2].to_string()));
                    }
                    if let Some(caps) = CREATE_TABLE.captures(&stmt.sql) {
                        tables.insert(caps[1].to_string());
                    }
                }
                sets.push(RowSet::default());
                continue;
            }

            if let Some((_, table, column)) = state.requirements.iter().find(|(fragment, t, c)| {
                stmt.sql.contains(fragment.as_str()) && !columns.contains(&(t.clone(), c.clone()))
            }) {
                let message = format!("column \"{column}\" of relation \"{table}\" does not exist");
                return Err(
                    AgencyDbError::query(ErrorKind::Schema, tenant, message).with_sqlstate("42703")
                );
            }

            pending.push(Committed {
                tenant: tenant.to_string(),
                sql: stmt.sql.clone(),
                acting_user: tx_audit.clone(),
                audit_seen,
            });
            sets.push(RowSet {
                rows_affected: 1,
                ..RowSet::default()
            });
        }

        state.columns = columns;
        state.tables = tables;
        state.committed.extend(pending);
        Ok(sets)
    }
}

fn text_param(params: &[SqlParam], idx: usize) -> String {
    match params.get(idx) {
        Some(SqlParam::Text(v)) => v.clone(),
        other => panic!("expected text parameter at {idx}, got {other:?}"),
    }
}

fn found_rows(found: bool) -> RowSet {
    let rows = if found { vec![Map::new()] } else { Vec::new() };
    RowSet {
        columns: Vec::new(),
        rows,
        rows_affected: 0,
    }
}

pub struct FakeConnector {
    db: FakeDb,
}

#[async_trait]
impl PoolConnector for FakeConnector {
    type Pool = FakePool;

    async fn connect(&self, tenant: &TenantId) -> Result<FakePool, AgencyDbError> {
        let (delay, fault) = {
            let mut state = self.db.state();
            state.connects += 1;
            (state.connect_delay, state.connect_fault.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = fault {
            return Err(fault.to_error(tenant));
        }
        Ok(FakePool {
            tenant: tenant.clone(),
            db: self.db.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct FakePool {
    tenant: TenantId,
    db: FakeDb,
    closed: AtomicBool,
}

impl FakePool {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantPool for FakePool {
    async fn run(
        &self,
        statements: &[Statement],
        acting_user: Option<&ActingUser>,
    ) -> Result<Vec<RowSet>, AgencyDbError> {
        if self.is_closed() {
            return Err(AgencyDbError::connectivity(&self.tenant, "pool closed"));
        }
        let delay = {
            let mut state = self.db.state();
            state.started += 1;
            state.run_delay
        };
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.db.run(&self.tenant, statements, acting_user)
    }

    async fn close(&self) {
        let gate = self.db.state().close_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.state().closes += 1;
        }
    }

    fn size(&self) -> u32 {
        1
    }

    fn num_idle(&self) -> usize {
        1
    }

    fn max_connections(&self) -> u32 {
        10
    }
}

/// Lets background pool closes run to completion.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn tenant(name: &str) -> TenantId {
    TenantId::new(name).unwrap()
}

pub fn config() -> Config {
    Config::default()
}

pub fn repair_config() -> Config {
    let mut cfg = Config::default();
    cfg.schema_repair.auto_repair = true;
    cfg
}
