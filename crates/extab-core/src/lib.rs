//! extab Core - value, option and schema model
//!
//! This crate describes external tables independently of any backend: typed
//! scalar values, case-insensitive option bags for tables, columns and
//! indexes, and the table schema with its index definitions.

pub mod like;
pub mod options;
pub mod schema;
pub mod value;

pub use like::like_match;
pub use options::{FieldOptionSet, IndexOptionSet, OptionBag, OptionValue, TableOptionSet};
pub use schema::{ColumnDef, IndexDefinition, IndexSpec, KeyPart, TableSchema};
pub use value::{ColumnType, Decimal, Value, ValueClass};
