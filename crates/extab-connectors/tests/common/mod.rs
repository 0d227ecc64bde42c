//! Shared fixtures: an in-memory backend that records every call.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use extab_connectors::{
    Backend, BackendKind, BackendTable, ExternalTable, OpenRequest, ReadOutcome, Result,
    TableStats, Translation,
};
use extab_connectors::{AccessMode, ConnectorError};
use extab_core::{ColumnDef, ColumnType, IndexDefinition, TableSchema, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum IndexCall {
    Drop {
        names: Option<Vec<String>>,
        separate: bool,
    },
    Build {
        names: Vec<String>,
        separate: bool,
    },
}

#[derive(Default)]
pub struct Recorded {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub modes: Mutex<Vec<AccessMode>>,
    pub projections: Mutex<Vec<Vec<usize>>>,
    pub filters: Mutex<Vec<Translation>>,
    pub index_calls: Mutex<Vec<IndexCall>>,
    pub fail_open: AtomicBool,
}

impl Recorded {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn modes(&self) -> Vec<AccessMode> {
        self.modes.lock().unwrap().clone()
    }
}

/// Serves a fixed row set. Every other read reports `NotFound` first, as a
/// backend with deleted records would.
pub struct MemoryBackend {
    pub kind: BackendKind,
    pub rows: Vec<Vec<Value>>,
    pub calls: Arc<Recorded>,
}

impl MemoryBackend {
    pub fn new(kind: BackendKind, rows: Vec<Vec<Value>>) -> Self {
        Self {
            kind,
            rows,
            calls: Arc::new(Recorded::default()),
        }
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open(&self, schema: &TableSchema, request: &OpenRequest) -> Result<Box<dyn BackendTable>> {
        if self.calls.fail_open.load(Ordering::SeqCst) {
            return Err(ConnectorError::open(&schema.name, "resource unavailable"));
        }
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        self.calls.modes.lock().unwrap().push(request.mode);
        self.calls
            .projections
            .lock()
            .unwrap()
            .push(request.projection.columns.clone());
        Ok(Box::new(MemoryTable {
            rows: self.rows.clone(),
            position: 0,
            gap: false,
            calls: Arc::clone(&self.calls),
        }))
    }

    fn build_index(&self, _schema: &TableSchema, defs: &[IndexDefinition], separate: bool) -> Result<()> {
        self.calls.index_calls.lock().unwrap().push(IndexCall::Build {
            names: defs.iter().map(|d| d.name.clone()).collect(),
            separate,
        });
        Ok(())
    }

    fn drop_index(
        &self,
        _schema: &TableSchema,
        defs: Option<&[IndexDefinition]>,
        separate: bool,
    ) -> Result<()> {
        self.calls.index_calls.lock().unwrap().push(IndexCall::Drop {
            names: defs.map(|d| d.iter().map(|d| d.name.clone()).collect()),
            separate,
        });
        Ok(())
    }
}

struct MemoryTable {
    rows: Vec<Vec<Value>>,
    position: usize,
    gap: bool,
    calls: Arc<Recorded>,
}

impl BackendTable for MemoryTable {
    fn read_next(&mut self) -> Result<ReadOutcome> {
        self.gap = !self.gap;
        if self.gap {
            return Ok(ReadOutcome::NotFound);
        }
        match self.rows.get(self.position) {
            Some(row) => {
                self.position += 1;
                Ok(ReadOutcome::Row(row.clone()))
            }
            None => Ok(ReadOutcome::EndOfData),
        }
    }

    fn set_filter(&mut self, filter: &Translation) {
        self.calls.filters.lock().unwrap().push(filter.clone());
    }

    fn statistics(&mut self) -> Result<TableStats> {
        Ok(TableStats {
            records: self.rows.len() as u64,
            mean_row_length: 16,
            data_length: 16 * self.rows.len() as u64,
        })
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn orders_schema() -> TableSchema {
    TableSchema::new(
        "orders",
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("col", ColumnType::String),
            ColumnDef::new("col2", ColumnType::Integer),
        ],
    )
}

pub fn orders_rows() -> Vec<Vec<Value>> {
    vec![
        vec![Value::Integer(1), Value::from("a"), Value::Integer(3)],
        vec![Value::Integer(2), Value::from("a"), Value::Integer(8)],
        vec![Value::Integer(3), Value::from("b"), Value::Integer(9)],
        vec![Value::Integer(4), Value::Null, Value::Integer(7)],
    ]
}

/// Table over a recording backend, plus the call record.
pub fn memory_table(kind: BackendKind, schema: TableSchema) -> (ExternalTable, Arc<Recorded>) {
    let backend = MemoryBackend::new(kind, orders_rows());
    let calls = Arc::clone(&backend.calls);
    (ExternalTable::new(schema, Arc::new(backend)), calls)
}
