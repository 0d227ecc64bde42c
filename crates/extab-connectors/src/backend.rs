//! Backend kinds, their pushdown/index capabilities, and the traits concrete
//! backends implement.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use extab_core::{IndexDefinition, TableSchema, Value};

use crate::error::{ConnectorError, Result};
use crate::lifecycle::Projection;
use crate::mode::AccessMode;
use crate::translate::Translation;

/// Every external table type the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendKind {
    Dos,
    Fix,
    Bin,
    Csv,
    Fmt,
    Dbf,
    Xml,
    Ini,
    Vec,
    Dir,
    Mysql,
    Odbc,
    Myx,
    Xdbc,
    Wmi,
    Tbl,
    Proxy,
    Catalog,
}

const ALL_KINDS: [BackendKind; 18] = [
    BackendKind::Dos,
    BackendKind::Fix,
    BackendKind::Bin,
    BackendKind::Csv,
    BackendKind::Fmt,
    BackendKind::Dbf,
    BackendKind::Xml,
    BackendKind::Ini,
    BackendKind::Vec,
    BackendKind::Dir,
    BackendKind::Mysql,
    BackendKind::Odbc,
    BackendKind::Myx,
    BackendKind::Xdbc,
    BackendKind::Wmi,
    BackendKind::Tbl,
    BackendKind::Proxy,
    BackendKind::Catalog,
];

impl BackendKind {
    pub fn all() -> &'static [BackendKind] {
        &ALL_KINDS
    }

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Dos => "DOS",
            BackendKind::Fix => "FIX",
            BackendKind::Bin => "BIN",
            BackendKind::Csv => "CSV",
            BackendKind::Fmt => "FMT",
            BackendKind::Dbf => "DBF",
            BackendKind::Xml => "XML",
            BackendKind::Ini => "INI",
            BackendKind::Vec => "VEC",
            BackendKind::Dir => "DIR",
            BackendKind::Mysql => "MYSQL",
            BackendKind::Odbc => "ODBC",
            BackendKind::Myx => "MYX",
            BackendKind::Xdbc => "XDBC",
            BackendKind::Wmi => "WMI",
            BackendKind::Tbl => "TBL",
            BackendKind::Proxy => "PROXY",
            BackendKind::Catalog => "CATALOG",
        }
    }

    /// Kind of the table described by `schema`, from its `type` option.
    pub fn of_schema(schema: &TableSchema) -> Result<Self> {
        schema.options.table_type().parse()
    }

    /// Tables whose data lives in a local file owned by the engine.
    pub fn is_file(self) -> bool {
        matches!(
            self,
            BackendKind::Dos
                | BackendKind::Fix
                | BackendKind::Bin
                | BackendKind::Csv
                | BackendKind::Fmt
                | BackendKind::Dbf
                | BackendKind::Xml
                | BackendKind::Ini
                | BackendKind::Vec
                | BackendKind::Dir
        )
    }

    /// Whether the backend can report an exact row count cheaply.
    pub fn is_exact(self) -> bool {
        matches!(
            self,
            BackendKind::Fix | BackendKind::Bin | BackendKind::Dbf | BackendKind::Vec
        )
    }

    pub fn capability(self) -> Capability {
        let filter = match self {
            BackendKind::Dos
            | BackendKind::Fix
            | BackendKind::Bin
            | BackendKind::Csv
            | BackendKind::Fmt
            | BackendKind::Dbf
            | BackendKind::Vec => FilterTarget::Native,
            BackendKind::Mysql | BackendKind::Odbc | BackendKind::Tbl | BackendKind::Catalog => {
                FilterTarget::Text(TextDialect::Sql)
            }
            BackendKind::Wmi => FilterTarget::Text(TextDialect::Wql),
            BackendKind::Myx | BackendKind::Xdbc => FilterTarget::Text(TextDialect::Command),
            BackendKind::Xml | BackendKind::Ini | BackendKind::Dir | BackendKind::Proxy => {
                FilterTarget::None
            }
        };
        let special_columns = match self {
            BackendKind::Tbl => SpecialColumns::TabIdOnly,
            BackendKind::Catalog => SpecialColumns::Any,
            _ => SpecialColumns::None,
        };
        let index_kind = match self {
            BackendKind::Dos
            | BackendKind::Fix
            | BackendKind::Bin
            | BackendKind::Csv
            | BackendKind::Fmt
            | BackendKind::Dbf
            | BackendKind::Vec => IndexKind::Local,
            BackendKind::Mysql | BackendKind::Odbc => IndexKind::Remote,
            _ => IndexKind::None,
        };
        let identifier_quote = match self {
            BackendKind::Mysql => Some('`'),
            BackendKind::Odbc | BackendKind::Catalog => Some('"'),
            _ => None,
        };
        Capability {
            kind: self,
            filter,
            special_columns,
            index_kind,
            residual_filter: !matches!(self, BackendKind::Myx | BackendKind::Xdbc),
            identifier_quote,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let alias = match upper.as_str() {
            "PRX" => "PROXY",
            "PLG" | "CATLG" => "CATALOG",
            other => other,
        };
        ALL_KINDS
            .iter()
            .copied()
            .find(|k| k.name() == alias)
            .ok_or_else(|| ConnectorError::Config(format!("unknown table type {}", s)))
    }
}

/// Where a pushed predicate ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterTarget {
    /// A filter object evaluated by the backend while reading.
    Native,
    /// A textual fragment sent to a remote engine.
    Text(TextDialect),
    /// Nothing is pushed; the host filters every row.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextDialect {
    Sql,
    /// WMI query language: no IN or BETWEEN.
    Wql,
    /// Command executors: string literals become commands to run.
    Command,
}

/// Which synthetic columns may be named in a pushed predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialColumns {
    None,
    /// Only the `TABID` special column, and no ordinary column.
    TabIdOnly,
    /// Any special column, by its special name.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    None,
    /// Index artifacts built and stored by the engine.
    Local,
    /// Indexes owned by the remote server.
    Remote,
}

/// What a backend kind can do with predicates and indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub kind: BackendKind,
    pub filter: FilterTarget,
    pub special_columns: SpecialColumns,
    pub index_kind: IndexKind,
    /// The host re-checks predicates the translator dropped.
    pub residual_filter: bool,
    /// Quote for identifiers that are not plain words; `None` emits them raw.
    pub identifier_quote: Option<char>,
}

impl Capability {
    pub fn supports_native_filter(&self) -> bool {
        self.filter == FilterTarget::Native
    }

    pub fn supports_text_pushdown(&self) -> bool {
        matches!(self.filter, FilterTarget::Text(_))
    }

    pub fn is_indexable(&self) -> bool {
        self.index_kind != IndexKind::None
    }

    pub fn without_residual_filter(mut self) -> Self {
        self.residual_filter = false;
        self
    }
}

/// Display name of the index type used by a table of `kind`.
pub fn index_type_name(kind: BackendKind, index: Option<&IndexDefinition>) -> &'static str {
    match kind.capability().index_kind {
        IndexKind::Local => match index {
            Some(def) if def.dynamic => "KINDEX",
            _ => "XINDEX",
        },
        IndexKind::Remote => "REMOTE",
        IndexKind::None => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Backend traits
// ---------------------------------------------------------------------------

/// Parameters of one backend open call.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub mode: AccessMode,
    pub projection: Projection,
}

/// Result of one `read_next` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// A full-width row aligned with the schema columns. Columns outside the
    /// projection are NULL.
    Row(Vec<Value>),
    EndOfData,
    /// The current position holds no row (deleted record, key miss).
    NotFound,
}

/// Planning statistics for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub records: u64,
    pub mean_row_length: u64,
    pub data_length: u64,
}

/// A concrete external data source implementation.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capability(&self) -> Capability {
        self.kind().capability()
    }

    /// Open the table. Fails with [`ConnectorError::BackendOpen`] when the
    /// underlying resource is missing, unreachable or malformed.
    fn open(&self, schema: &TableSchema, request: &OpenRequest) -> Result<Box<dyn BackendTable>>;

    /// Index definitions currently in effect for the table.
    fn index_info(&self, schema: &TableSchema) -> Result<Vec<IndexDefinition>> {
        Ok(schema.index_definitions())
    }

    /// Build the given index artifacts. `separate` selects one artifact per
    /// index instead of one shared artifact.
    fn build_index(
        &self,
        schema: &TableSchema,
        defs: &[IndexDefinition],
        separate: bool,
    ) -> Result<()> {
        let _ = (schema, defs, separate);
        Err(ConnectorError::IndexConflict(format!(
            "Table type {} is not indexable",
            self.kind()
        )))
    }

    /// Drop the given index artifacts, or every artifact when `defs` is `None`.
    fn drop_index(
        &self,
        schema: &TableSchema,
        defs: Option<&[IndexDefinition]>,
        separate: bool,
    ) -> Result<()> {
        let _ = (schema, defs, separate);
        Err(ConnectorError::IndexConflict(format!(
            "Table type {} is not indexable",
            self.kind()
        )))
    }
}

/// An opened backend table.
pub trait BackendTable: Send {
    fn read_next(&mut self) -> Result<ReadOutcome>;

    /// Install the translated predicate for subsequent reads.
    fn set_filter(&mut self, filter: &Translation) {
        let _ = filter;
    }

    fn statistics(&mut self) -> Result<TableStats>;

    /// Restart reading from the first row.
    fn rewind(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
