//! Local delimited-file backend.
//!
//! Reads `CSV` and `DOS` tables with the `csv` crate, evaluates the pushed
//! native filter while reading, and stores index artifacts next to the data
//! file as JSON lines sorted by key.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use extab_core::{ColumnType, IndexDefinition, TableSchema, Value};

use crate::backend::{
    Backend, BackendKind, BackendTable, OpenRequest, ReadOutcome, TableStats,
};
use crate::config::EngineConfig;
use crate::error::{ConnectorError, Result};
use crate::native::NativeFilter;
use crate::translate::Translation;

/// Width assumed for a column with no declared length when estimating rows.
const DEFAULT_FIELD_WIDTH: u64 = 8;

pub struct CsvBackend {
    kind: BackendKind,
    config: EngineConfig,
}

impl CsvBackend {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            kind: BackendKind::Csv,
            config,
        }
    }

    /// Backend for another delimited kind. Only `CSV` and `DOS` are accepted.
    pub fn with_kind(kind: BackendKind, config: EngineConfig) -> Result<Self> {
        match kind {
            BackendKind::Csv | BackendKind::Dos => Ok(Self { kind, config }),
            other => Err(ConnectorError::Config(format!(
                "table type {} is not a delimited file",
                other
            ))),
        }
    }

    /// Data file of the table: the `filename` option resolved against the
    /// data directory, or `<table>.<kind>` for tables without one.
    pub fn data_path(&self, schema: &TableSchema) -> PathBuf {
        let file = schema.options.filename().unwrap_or_else(|| {
            format!("{}.{}", schema.name, self.kind.name().to_ascii_lowercase())
        });
        self.config.resolve(&file)
    }

    /// Index artifact path: `<file>.<index>.idx` for one index, or the shared
    /// `<file>.idx` when `index` is `None`.
    pub fn index_path(&self, schema: &TableSchema, index: Option<&str>) -> PathBuf {
        let mut name = self.data_path(schema).into_os_string();
        if let Some(index) = index {
            name.push(format!(".{}", index.to_ascii_lowercase()));
        }
        name.push(".idx");
        PathBuf::from(name)
    }

    fn layout(&self, schema: &TableSchema) -> Layout {
        let delimiter = schema
            .options
            .separator()
            .and_then(|s| s.bytes().next())
            .unwrap_or(b',');
        let mut next_field = 0;
        let columns = schema
            .columns
            .iter()
            .map(|c| {
                let field = if c.is_virtual {
                    None
                } else {
                    next_field += 1;
                    Some(next_field - 1)
                };
                ColumnLayout {
                    name: c.name.clone(),
                    column_type: c.column_type,
                    date_format: c.options.dateformat(),
                    field,
                }
            })
            .collect();
        Layout {
            delimiter,
            has_header: schema.options.header().unwrap_or(0) != 0,
            buffer_capacity: self.config.work_size.clamp(8 * 1024, 1 << 20),
            columns,
        }
    }

    /// Every stored column of every record, in file order.
    fn load_rows(&self, schema: &TableSchema) -> Result<Vec<Vec<Value>>> {
        let layout = self.layout(schema);
        let path = self.data_path(schema);
        let wanted: BTreeSet<usize> = (0..layout.columns.len()).collect();
        let mut reader = layout.reader(&schema.name, &path)?;
        let mut record = csv::StringRecord::new();
        let mut rows = Vec::new();
        let mut line = 0;
        while reader.read_record(&mut record)? {
            line += 1;
            rows.push(layout.parse(&record, &wanted, line)?);
        }
        Ok(rows)
    }
}

impl Backend for CsvBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open(&self, schema: &TableSchema, request: &OpenRequest) -> Result<Box<dyn BackendTable>> {
        let layout = self.layout(schema);
        let path = self.data_path(schema);
        let reader = layout.reader(&schema.name, &path)?;
        let projection: BTreeSet<usize> = request
            .projection
            .columns
            .iter()
            .copied()
            .filter(|i| layout.columns.get(*i).is_some_and(|c| c.field.is_some()))
            .collect();
        debug!(table = %schema.name, path = %path.display(), mode = %request.mode, "csv file opened");
        Ok(Box::new(CsvTable {
            table: schema.name.clone(),
            path,
            wanted: projection.clone(),
            projection,
            layout,
            reader,
            record: csv::StringRecord::new(),
            filter: None,
            line: 0,
            exact_info: self.config.exact_info,
            lrecl: schema.options.lrecl().filter(|l| *l > 0),
            declared_widths: schema
                .columns
                .iter()
                .filter(|c| !c.is_virtual)
                .map(|c| match c.length {
                    0 => DEFAULT_FIELD_WIDTH,
                    n => u64::from(n),
                })
                .collect(),
        }))
    }

    fn build_index(
        &self,
        schema: &TableSchema,
        defs: &[IndexDefinition],
        separate: bool,
    ) -> Result<()> {
        let rows = self.load_rows(schema)?;
        let mut built = Vec::with_capacity(defs.len());
        for def in defs {
            built.push((def, sorted_entries(schema, def, &rows)?));
        }

        if separate {
            for (def, entries) in &built {
                write_entries(&self.index_path(schema, Some(&def.name)), &[entries.as_slice()])?;
            }
        } else {
            let all: Vec<&[IndexEntry]> = built.iter().map(|(_, e)| e.as_slice()).collect();
            write_entries(&self.index_path(schema, None), &all)?;
        }
        info!(
            table = %schema.name,
            indexes = defs.len(),
            separate,
            "index artifacts built"
        );
        Ok(())
    }

    fn drop_index(
        &self,
        schema: &TableSchema,
        defs: Option<&[IndexDefinition]>,
        separate: bool,
    ) -> Result<()> {
        if !separate {
            return remove_if_exists(&self.index_path(schema, None));
        }
        match defs {
            Some(defs) => {
                for def in defs {
                    remove_if_exists(&self.index_path(schema, Some(&def.name)))?;
                }
            }
            None => {
                let data = self.data_path(schema);
                let prefix = match data.file_name() {
                    Some(name) => format!("{}.", name.to_string_lossy()),
                    None => return Ok(()),
                };
                let dir = match data.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                let entries = match std::fs::read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                for entry in entries {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with(&prefix) && name.ends_with(".idx") {
                        remove_if_exists(&entry.path())?;
                    }
                }
            }
        }
        debug!(table = %schema.name, "index artifacts dropped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

struct ColumnLayout {
    name: String,
    column_type: ColumnType,
    date_format: Option<String>,
    /// Field position in the record, `None` for virtual columns.
    field: Option<usize>,
}

struct Layout {
    delimiter: u8,
    has_header: bool,
    buffer_capacity: usize,
    columns: Vec<ColumnLayout>,
}

impl Layout {
    fn reader(&self, table: &str, path: &Path) -> Result<csv::Reader<File>> {
        let file = File::open(path)
            .map_err(|e| ConnectorError::open(table, format!("{}: {}", path.display(), e)))?;
        Ok(csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_header)
            .flexible(true)
            .buffer_capacity(self.buffer_capacity)
            .from_reader(file))
    }

    /// Full-width row with only the `wanted` columns parsed.
    fn parse(
        &self,
        record: &csv::StringRecord,
        wanted: &BTreeSet<usize>,
        line: u64,
    ) -> Result<Vec<Value>> {
        let mut row = vec![Value::Null; self.columns.len()];
        for &i in wanted {
            let Some(column) = self.columns.get(i) else {
                continue;
            };
            let Some(field) = column.field else {
                continue;
            };
            let text = record.get(field).unwrap_or("");
            row[i] = Value::parse_as(text, column.column_type, column.date_format.as_deref())
                .ok_or_else(|| {
                    ConnectorError::BackendRead(format!(
                        "line {}: invalid {:?} value '{}' for column {}",
                        line, column.column_type, text, column.name
                    ))
                })?;
        }
        Ok(row)
    }
}

struct CsvTable {
    table: String,
    path: PathBuf,
    layout: Layout,
    reader: csv::Reader<File>,
    record: csv::StringRecord,
    projection: BTreeSet<usize>,
    /// Projection plus the columns the filter reads.
    wanted: BTreeSet<usize>,
    filter: Option<NativeFilter>,
    line: u64,
    exact_info: bool,
    lrecl: Option<i64>,
    declared_widths: Vec<u64>,
}

impl BackendTable for CsvTable {
    fn read_next(&mut self) -> Result<ReadOutcome> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(ReadOutcome::EndOfData);
        }
        self.line += 1;
        let mut row = self.layout.parse(&self.record, &self.wanted, self.line)?;
        if let Some(filter) = &self.filter {
            if !filter.matches(&row) {
                return Ok(ReadOutcome::NotFound);
            }
        }
        for i in self.wanted.difference(&self.projection) {
            row[*i] = Value::Null;
        }
        Ok(ReadOutcome::Row(row))
    }

    fn set_filter(&mut self, filter: &Translation) {
        self.filter = filter.native().cloned();
        self.wanted = self.projection.clone();
        if let Some(filter) = &self.filter {
            self.wanted.extend(
                filter
                    .columns()
                    .into_iter()
                    .filter(|i| self.layout.columns.get(*i).is_some_and(|c| c.field.is_some())),
            );
        }
    }

    fn statistics(&mut self) -> Result<TableStats> {
        let data_length = std::fs::metadata(&self.path)?.len();
        if data_length == 0 {
            return Ok(TableStats::default());
        }
        if self.exact_info {
            let mut reader = self.layout.reader(&self.table, &self.path)?;
            let mut record = csv::StringRecord::new();
            let mut records = 0u64;
            while reader.read_record(&mut record)? {
                records += 1;
            }
            return Ok(TableStats {
                records,
                mean_row_length: data_length / records.max(1),
                data_length,
            });
        }
        let row_length = match self.lrecl {
            Some(lrecl) => lrecl as u64,
            // Field widths, separators and the line ending.
            None => self.declared_widths.iter().sum::<u64>() + self.declared_widths.len() as u64,
        }
        .max(1);
        Ok(TableStats {
            records: data_length.div_ceil(row_length),
            mean_row_length: row_length,
            data_length,
        })
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader = self.layout.reader(&self.table, &self.path)?;
        self.line = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Index artifacts
// ---------------------------------------------------------------------------

/// One line of an index artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub index: String,
    pub key: Vec<Value>,
    /// Zero-based record number in the data file.
    pub row: u64,
}

fn key_order(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x.sql_cmp(y).unwrap_or(Ordering::Equal),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn sorted_entries(
    schema: &TableSchema,
    def: &IndexDefinition,
    rows: &[Vec<Value>],
) -> Result<Vec<IndexEntry>> {
    let positions = def
        .parts
        .iter()
        .map(|part| {
            schema.column_index(&part.column).ok_or_else(|| {
                ConnectorError::IndexConflict(format!(
                    "Column {} of index {} not found",
                    part.column, def.name
                ))
            })
        })
        .collect::<Result<Vec<usize>>>()?;

    let mut entries: Vec<IndexEntry> = rows
        .iter()
        .enumerate()
        .map(|(n, row)| IndexEntry {
            index: def.name.clone(),
            key: positions
                .iter()
                .map(|p| row.get(*p).cloned().unwrap_or(Value::Null))
                .collect(),
            row: n as u64,
        })
        .collect();
    entries.sort_by(|a, b| key_order(&a.key, &b.key).then(a.row.cmp(&b.row)));

    // NULL keys never collide in a unique index.
    if def.unique {
        let duplicate = entries
            .windows(2)
            .filter(|w| !w.iter().any(|e| e.key.iter().any(Value::is_null)))
            .any(|w| key_order(&w[0].key, &w[1].key) == Ordering::Equal);
        if duplicate {
            return Err(ConnectorError::IndexConflict(format!(
                "Duplicate key in unique index {}",
                def.name
            )));
        }
    }
    Ok(entries)
}

fn write_entries(path: &Path, sets: &[&[IndexEntry]]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for entries in sets {
        for entry in entries.iter() {
            serde_json::to_writer(&mut out, entry)?;
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read back an index artifact.
pub fn read_index_file(path: &Path) -> Result<Vec<IndexEntry>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(ConnectorError::from))
        .collect()
}
