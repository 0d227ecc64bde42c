//! Per-session handle cache and the process-wide session registry.
//!
//! A session owns at most one open handle per table. Handles are keyed by
//! lower-cased table name and stamped with the query identifier of the
//! statement that opened them; a handle from an earlier statement is closed
//! on the next `acquire` instead of being reused.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use extab_core::TableSchema;

use crate::alter::{check_alter, AlterPlan, AlterRequest};
use crate::backend::{IndexKind, OpenRequest, TableStats};
use crate::config::EngineConfig;
use crate::error::{ConnectorError, Result};
use crate::index::{plan_index_changes, DropScope, IndexCheck, IndexPlan};
use crate::lifecycle::{ColumnUsage, ExternalTable, Projection, SessionId, TableHandle};
use crate::mode::{decide, AccessMode, LockKind, ModeDecision, SqlCommand, TableLock};

/// Statement-spanning state of one table within a session.
#[derive(Debug, Clone, Default)]
struct TableState {
    mode: Option<AccessMode>,
    /// Query identifier of the statement that set `mode`.
    mode_query: u64,
    table_lock: TableLock,
    recheck_indexes: bool,
    create_as_select: bool,
    pending_check: Option<IndexCheck>,
}

/// What happened when a table was unlocked.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnlockReport {
    /// A live handle was closed.
    pub released: bool,
    /// Index plan that was applied, if any.
    pub plan: Option<IndexPlan>,
    /// Non-fatal problems, relayed to the host as DDL warnings.
    pub warnings: Vec<String>,
}

fn table_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

pub struct Session {
    id: SessionId,
    config: EngineConfig,
    query_id: u64,
    command: SqlCommand,
    handles: HashMap<String, TableHandle>,
    states: HashMap<String, TableState>,
}

impl Session {
    pub fn new(id: SessionId, config: EngineConfig) -> Self {
        Self {
            id,
            config,
            query_id: 0,
            command: SqlCommand::Select,
            handles: HashMap::new(),
            states: HashMap::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn command(&self) -> &SqlCommand {
        &self.command
    }

    /// Start a new statement. Handles opened by earlier statements become
    /// stale and are closed when next acquired.
    pub fn begin_statement(&mut self, query_id: u64, command: SqlCommand) {
        debug!(session = self.id, query_id, command = %command, "statement started");
        self.query_id = query_id;
        self.command = command;
        for state in self.states.values_mut() {
            state.recheck_indexes = false;
            state.create_as_select = false;
        }
    }

    /// Mode the table is in for the current statement, `NONE` when
    /// untouched. Modes set by earlier statements are stale and ignored.
    pub fn current_mode(&self, table: &str) -> AccessMode {
        let key = table_key(table);
        let query_id = self.query_id;
        self.states
            .get(&key)
            .filter(|s| s.mode_query == query_id)
            .and_then(|s| s.mode)
            .or_else(|| {
                self.handles
                    .get(&key)
                    .filter(|h| h.query_id == query_id)
                    .map(|h| h.mode)
            })
            .unwrap_or(AccessMode::None)
    }

    pub fn table_lock(&self, table: &str) -> TableLock {
        self.states
            .get(&table_key(table))
            .map(|s| s.table_lock)
            .unwrap_or_default()
    }

    /// Whether the table is the target of a `CREATE TABLE ... SELECT`.
    pub fn is_create_as_select(&self, table: &str) -> bool {
        self.states
            .get(&table_key(table))
            .map(|s| s.create_as_select)
            .unwrap_or(false)
    }

    /// Apply a lock request for the current statement.
    ///
    /// `ERROR` decisions fail with [`ConnectorError::UnsupportedCommand`]. A
    /// live handle whose mode no longer fits is closed; the next `acquire`
    /// re-opens it.
    pub fn lock_table(&mut self, table: &ExternalTable, lock: LockKind) -> Result<ModeDecision> {
        let key = table_key(table.name());
        let current = self.current_mode(table.name());
        let mut decision = decide(&self.command, lock, current).into_result()?;

        if lock == LockKind::Unlock {
            if decision.release {
                let report = self.unlock_table(table)?;
                if !report.warnings.is_empty() {
                    decision.message = Some(report.warnings.join("; "));
                }
            }
            return Ok(decision);
        }

        let state = self.states.entry(key.clone()).or_default();
        state.mode = Some(decision.mode);
        state.mode_query = self.query_id;
        state.recheck_indexes |= decision.recheck_indexes;
        state.create_as_select |= decision.create_as_select;
        if let Some(table_lock) = decision.table_lock {
            state.table_lock = table_lock;
        }

        let mismatched = self
            .handles
            .get(&key)
            .map(|h| h.mode != decision.mode)
            .unwrap_or(false);
        if mismatched {
            debug!(table = %table.name(), mode = %decision.mode, "mode changed, closing handle");
            self.release(table.name())?;
        }

        info!(
            session = self.id,
            table = %table.name(),
            command = %self.command,
            mode = %decision.mode,
            "table locked"
        );
        Ok(decision)
    }

    /// End table access: apply any pending index plan, then close the handle.
    /// Index failures become warnings; they do not fail the unlock.
    pub fn unlock_table(&mut self, table: &ExternalTable) -> Result<UnlockReport> {
        let key = table_key(table.name());
        let state = self.states.remove(&key).unwrap_or_default();
        let mut report = UnlockReport::default();

        if let Some(check) = state.pending_check {
            let plan = plan_index_changes(&check);
            if !plan.is_empty() {
                if table.backend.capability().index_kind == IndexKind::Local {
                    apply_index_plan(table, &plan, &mut report.warnings);
                } else {
                    report
                        .warnings
                        .push(format!("Table type {} is not indexable", table.kind()));
                }
                report.plan = Some(plan);
            }
        }
        for message in &report.warnings {
            warn!(table = %table.name(), "{}", message);
        }

        report.released = self.release(table.name())?;
        Ok(report)
    }

    /// Return the handle for `table` in `mode`, opening one if needed.
    ///
    /// A cached handle is reused when it belongs to the current statement,
    /// addresses the same table and its mode satisfies `mode`. Otherwise it
    /// is closed and a new one opened. A failed open caches nothing.
    pub fn acquire(
        &mut self,
        table: &ExternalTable,
        mode: AccessMode,
        usage: &ColumnUsage,
    ) -> Result<&mut TableHandle> {
        let schema = &table.schema;
        if mode == AccessMode::Error {
            return Err(ConnectorError::UnsupportedCommand(format!(
                "Cannot open table {} in ERROR mode",
                schema.name
            )));
        }
        if mode.is_write() && schema.options.readonly() {
            return Err(ConnectorError::ReadOnly(schema.name.clone()));
        }

        let key = table_key(&schema.name);
        let verdict = self
            .handles
            .get(&key)
            .map(|h| self.validate(h, table, mode));
        if let Some(Err(stale)) = verdict {
            debug!(table = %schema.name, reason = %stale, "closing stale handle");
            self.release(&schema.name)?;
        }

        let (session, query_id) = (self.id, self.query_id);
        match self.handles.entry(key) {
            Entry::Occupied(entry) => {
                debug!(table = %schema.name, mode = %mode, "reusing handle");
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let handle = open_handle(table, mode, usage, session, query_id)?;
                let state = self.states.entry(table_key(&schema.name)).or_default();
                state.mode = Some(mode);
                state.mode_query = query_id;
                Ok(entry.insert(handle))
            }
        }
    }

    fn validate(&self, handle: &TableHandle, table: &ExternalTable, mode: AccessMode) -> Result<()> {
        let same_table = handle.schema.name.eq_ignore_ascii_case(table.name())
            && (Arc::ptr_eq(&handle.schema, &table.schema) || handle.schema == table.schema);
        if handle.query_id != self.query_id || !same_table || !handle.mode.satisfies(mode) {
            return Err(ConnectorError::StaleHandle(table.name().to_string()));
        }
        Ok(())
    }

    /// Close the handle of `table`, if any. Returns whether one was open.
    pub fn release(&mut self, table: &str) -> Result<bool> {
        match self.handles.remove(&table_key(table)) {
            Some(mut handle) => {
                info!(session = self.id, table = %handle.schema.name, mode = %handle.mode, "handle released");
                handle.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn handle(&self, table: &str) -> Option<&TableHandle> {
        self.handles.get(&table_key(table))
    }

    pub fn handle_mut(&mut self, table: &str) -> Option<&mut TableHandle> {
        self.handles.get_mut(&table_key(table))
    }

    /// Row estimates for planning. Uses the live handle when it belongs to
    /// the current statement; otherwise opens the table in `NONE` mode just
    /// long enough to query it.
    pub fn statistics(&mut self, table: &ExternalTable) -> Result<TableStats> {
        let query_id = self.query_id;
        if let Some(handle) = self.handles.get_mut(&table_key(table.name())) {
            if handle.query_id == query_id {
                return handle.statistics();
            }
        }

        debug!(table = %table.name(), "opening table for statistics");
        let request = OpenRequest {
            mode: AccessMode::None,
            projection: Projection::default(),
        };
        let mut inner = table.backend.open(&table.schema, &request)?;
        let stats = inner.statistics();
        let closed = inner.close();
        let stats = stats?;
        closed?;
        Ok(stats)
    }

    /// Prepare an indexed read on `index`. Returns `false` when indexing is
    /// disabled because the table is held under `LOCK TABLES ... WRITE`.
    pub fn begin_index_scan(
        &mut self,
        table: &ExternalTable,
        index: &str,
        usage: &ColumnUsage,
    ) -> Result<bool> {
        let capability = table.backend.capability();
        if !capability.is_indexable() {
            return Err(ConnectorError::IndexConflict(format!(
                "Table type {} is not indexable",
                table.kind()
            )));
        }
        let defs = table.backend.index_info(&table.schema)?;
        let def = defs
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(index))
            .ok_or_else(|| {
                ConnectorError::IndexConflict(format!("No index {} on table {}", index, table.name()))
            })?;

        if self.table_lock(table.name()) == TableLock::Write {
            debug!(table = %table.name(), "indexing disabled under write lock");
            return Ok(false);
        }

        let mut mode = match self.current_mode(table.name()) {
            m if m.is_terminal() => AccessMode::Read,
            m => m,
        };
        if capability.index_kind == IndexKind::Remote && mode == AccessMode::Read {
            mode = AccessMode::ReadIndexed;
            let downgraded = self
                .handle(table.name())
                .map(|h| h.mode == AccessMode::Read)
                .unwrap_or(false);
            if downgraded {
                self.release(table.name())?;
            }
        }

        let name = def.name.clone();
        let handle = self.acquire(table, mode, usage)?;
        handle.active_index = Some(name);
        Ok(true)
    }

    /// Run the ALTER compatibility check and remember its index comparison
    /// for the unlock of `old`.
    pub fn prepare_alter(
        &mut self,
        old: &TableSchema,
        new: &TableSchema,
        request: &AlterRequest,
    ) -> Result<AlterPlan> {
        let plan = check_alter(old, new, request, &self.config)?;
        if let Some(check) = &plan.index_check {
            self.states
                .entry(table_key(&old.name))
                .or_default()
                .pending_check = Some(check.clone());
        }
        Ok(plan)
    }

    /// Close every open handle. All handles are closed even if one fails;
    /// the first failure is returned.
    pub fn close_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for (_, mut handle) in self.handles.drain() {
            if let Err(e) = handle.close() {
                warn!(table = %handle.schema.name, error = %e, "close failed");
                first_err.get_or_insert(e);
            }
        }
        self.states.clear();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("query_id", &self.query_id)
            .field("command", &self.command)
            .field("handles", &self.handles.len())
            .finish()
    }
}

fn open_handle(
    table: &ExternalTable,
    mode: AccessMode,
    usage: &ColumnUsage,
    session: SessionId,
    query_id: u64,
) -> Result<TableHandle> {
    let schema = Arc::clone(&table.schema);
    let capability = table.backend.capability();
    let projection = Projection::compute(&schema, capability.kind, mode, usage);
    let request = OpenRequest {
        mode,
        projection: projection.clone(),
    };
    let inner = table.backend.open(&schema, &request)?;
    info!(
        session,
        query_id,
        table = %schema.name,
        kind = %capability.kind,
        mode = %mode,
        columns = ?projection.names(&schema),
        "table opened"
    );
    Ok(TableHandle {
        read_only: schema.options.readonly(),
        schema,
        capability,
        mode,
        session,
        query_id,
        projection,
        inner,
        stats: None,
        condition: None,
        active_index: None,
    })
}

fn apply_index_plan(table: &ExternalTable, plan: &IndexPlan, warnings: &mut Vec<String>) {
    let dropped = match &plan.drop {
        DropScope::Nothing => Ok(()),
        DropScope::All => table
            .backend
            .drop_index(&table.schema, None, plan.drop_layout.separate),
        DropScope::Only(defs) => {
            table
                .backend
                .drop_index(&table.schema, Some(defs), plan.drop_layout.separate)
        }
    };
    if let Err(e) = dropped {
        warnings.push(e.to_string());
    }
    if !plan.build.is_empty() {
        if let Err(e) = table
            .backend
            .build_index(&table.schema, &plan.build, plan.build_layout.separate)
        {
            warnings.push(e.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct SessionEntry {
    refs: usize,
    session: Arc<Mutex<Session>>,
}

/// Process-wide map of live sessions. The lock is taken only to attach or
/// detach; work inside a session goes through the session's own mutex.
pub struct SessionRegistry {
    config: EngineConfig,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Find or create the session `id`, adding a reference to it.
    pub fn attach(&self, id: SessionId) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sessions.entry(id).or_insert_with(|| {
            info!(session = id, "session created");
            SessionEntry {
                refs: 0,
                session: Arc::new(Mutex::new(Session::new(id, self.config.clone()))),
            }
        });
        entry.refs += 1;
        Arc::clone(&entry.session)
    }

    /// Drop one reference to session `id`. The last reference closes its
    /// handles and removes it. Returns whether the session was removed.
    pub fn detach(&self, id: SessionId) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            match sessions.get_mut(&id) {
                Some(entry) if entry.refs > 1 => {
                    entry.refs -= 1;
                    None
                }
                Some(_) => sessions.remove(&id),
                None => None,
            }
        };
        match removed {
            Some(entry) => {
                let mut session = entry.session.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = session.close_all() {
                    warn!(session = id, error = %e, "closing session handles failed");
                }
                info!(session = id, "session removed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
