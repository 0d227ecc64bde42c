//! External table descriptions, column projections and open table handles.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use extab_core::{TableSchema, Value};

use crate::backend::{Backend, BackendKind, BackendTable, Capability, ReadOutcome, TableStats};
use crate::error::Result;
use crate::mode::AccessMode;
use crate::predicate::PredicateNode;
use crate::translate::{translate, Translation};

pub type SessionId = u64;

/// A table the host can address: its schema and the backend serving it.
#[derive(Clone)]
pub struct ExternalTable {
    pub schema: Arc<TableSchema>,
    pub backend: Arc<dyn Backend>,
}

impl ExternalTable {
    pub fn new(schema: TableSchema, backend: Arc<dyn Backend>) -> Self {
        Self {
            schema: Arc::new(schema),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }
}

impl fmt::Debug for ExternalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalTable")
            .field("name", &self.schema.name)
            .field("kind", &self.backend.kind())
            .finish()
    }
}

/// Columns the host reads and writes in the current row operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnUsage {
    pub read: BTreeSet<usize>,
    pub write: BTreeSet<usize>,
}

impl ColumnUsage {
    /// Every column read and written.
    pub fn all(schema: &TableSchema) -> Self {
        let every: BTreeSet<usize> = (0..schema.columns.len()).collect();
        Self {
            read: every.clone(),
            write: every,
        }
    }

    /// Read the named columns. Unknown names are ignored.
    pub fn reading(schema: &TableSchema, names: &[&str]) -> Self {
        Self {
            read: names.iter().filter_map(|n| schema.column_index(n)).collect(),
            write: BTreeSet::new(),
        }
    }

    pub fn with_write(mut self, schema: &TableSchema, names: &[&str]) -> Self {
        self.write
            .extend(names.iter().filter_map(|n| schema.column_index(n)));
        self
    }
}

/// Column positions a backend must materialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub columns: Vec<usize>,
    /// Columns an UPDATE writes.
    pub updated: Vec<usize>,
}

impl Projection {
    /// Minimal projection for opening `schema` in `mode`.
    ///
    /// File tables opened for INSERT take every column. Otherwise INSERT uses
    /// the write set, UPDATE the read set united with the write set, and
    /// every other mode the read set. Virtual columns are never projected.
    pub fn compute(
        schema: &TableSchema,
        kind: BackendKind,
        mode: AccessMode,
        usage: &ColumnUsage,
    ) -> Self {
        let stored = |i: &usize| schema.columns.get(*i).map(|c| !c.is_virtual).unwrap_or(false);
        if mode == AccessMode::Insert && kind.is_file() {
            return Self {
                columns: (0..schema.columns.len()).filter(|i| stored(i)).collect(),
                updated: Vec::new(),
            };
        }
        let columns: BTreeSet<usize> = match mode {
            AccessMode::Insert => usage.write.clone(),
            AccessMode::Update => usage.read.union(&usage.write).copied().collect(),
            _ => usage.read.clone(),
        };
        let updated = if mode == AccessMode::Update {
            usage.write.iter().copied().filter(stored).collect()
        } else {
            Vec::new()
        };
        Self {
            columns: columns.into_iter().filter(stored).collect(),
            updated,
        }
    }

    pub fn names(&self, schema: &TableSchema) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|i| schema.columns.get(*i))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.columns.contains(&index)
    }
}

/// One open backend table owned by a session.
pub struct TableHandle {
    pub(crate) schema: Arc<TableSchema>,
    pub(crate) capability: Capability,
    pub(crate) mode: AccessMode,
    pub(crate) read_only: bool,
    pub(crate) session: SessionId,
    pub(crate) query_id: u64,
    pub(crate) projection: Projection,
    pub(crate) inner: Box<dyn BackendTable>,
    pub(crate) stats: Option<TableStats>,
    pub(crate) condition: Option<(PredicateNode, Translation)>,
    pub(crate) active_index: Option<String>,
}

impl TableHandle {
    pub fn table_name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn kind(&self) -> BackendKind {
        self.capability.kind
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Query identifier the handle is valid for.
    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn active_index(&self) -> Option<&str> {
        self.active_index.as_deref()
    }

    /// Cached row-count estimate, if statistics were requested.
    pub fn cached_stats(&self) -> Option<TableStats> {
        self.stats
    }

    /// Translate `predicate` for this backend and install it. The result is
    /// cached for the statement; pushing the same predicate again reuses it.
    pub fn push_condition(&mut self, predicate: &PredicateNode) -> &Translation {
        if matches!(&self.condition, Some((p, _)) if p == predicate) {
            debug!(table = %self.schema.name, "reusing cached translation");
        } else {
            self.condition = None;
        }
        let (schema, capability, inner) = (&self.schema, &self.capability, &mut self.inner);
        let (_, translation) = self.condition.get_or_insert_with(|| {
            let translation = translate(predicate, schema, capability);
            inner.set_filter(&translation);
            (predicate.clone(), translation)
        });
        translation
    }

    /// The translation installed for the current statement.
    pub fn condition(&self) -> Option<&Translation> {
        self.condition.as_ref().map(|(_, t)| t)
    }

    /// Next row, skipping positions that hold none. `None` at end of data.
    pub fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        loop {
            match self.inner.read_next()? {
                ReadOutcome::Row(row) => return Ok(Some(row)),
                ReadOutcome::NotFound => continue,
                ReadOutcome::EndOfData => return Ok(None),
            }
        }
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.inner.rewind()
    }

    pub fn statistics(&mut self) -> Result<TableStats> {
        if let Some(stats) = self.stats {
            return Ok(stats);
        }
        let stats = self.inner.statistics()?;
        self.stats = Some(stats);
        Ok(stats)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.stats = None;
        self.condition = None;
        self.active_index = None;
        self.inner.close()
    }
}

impl fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHandle")
            .field("table", &self.schema.name)
            .field("kind", &self.capability.kind)
            .field("mode", &self.mode)
            .field("session", &self.session)
            .field("query_id", &self.query_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extab_core::{ColumnDef, ColumnType};

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDef::new("a", ColumnType::Integer),
                ColumnDef::new("b", ColumnType::String),
                ColumnDef::new("c", ColumnType::String),
                ColumnDef::new("v", ColumnType::Integer).virtual_column(),
            ],
        )
    }

    #[test]
    fn test_read_projection() {
        let s = schema();
        let usage = ColumnUsage::reading(&s, &["c", "A", "v"]);
        let p = Projection::compute(&s, BackendKind::Csv, AccessMode::Read, &usage);
        assert_eq!(p.columns, vec![0, 2]);
        assert_eq!(p.names(&s), vec!["a", "c"]);
        assert!(p.updated.is_empty());
    }

    #[test]
    fn test_update_projection_unites_sets() {
        let s = schema();
        let usage = ColumnUsage::reading(&s, &["a"]).with_write(&s, &["b"]);
        let p = Projection::compute(&s, BackendKind::Mysql, AccessMode::Update, &usage);
        assert_eq!(p.columns, vec![0, 1]);
        assert_eq!(p.updated, vec![1]);
    }

    #[test]
    fn test_insert_projection() {
        let s = schema();
        let usage = ColumnUsage::reading(&s, &["a"]).with_write(&s, &["b"]);
        let file = Projection::compute(&s, BackendKind::Dos, AccessMode::Insert, &usage);
        assert_eq!(file.columns, vec![0, 1, 2]);
        let remote = Projection::compute(&s, BackendKind::Odbc, AccessMode::Insert, &usage);
        assert_eq!(remote.columns, vec![1]);
    }
}
