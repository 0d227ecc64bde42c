//! Table, column and index descriptions.

use serde::{Deserialize, Serialize};

use crate::options::{FieldOptionSet, IndexOptionSet, TableOptionSet};
use crate::value::ColumnType;

/// One column of an external table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Declared length (characters for strings, digits for numbers).
    #[serde(default)]
    pub length: u32,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Computed by the host, not stored by the backend.
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default)]
    pub options: FieldOptionSet,
}

fn default_true() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            length: 0,
            nullable: true,
            is_virtual: false,
            options: FieldOptionSet::default(),
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn with_option(mut self, key: &str, value: impl Into<crate::options::OptionValue>) -> Self {
        self.options.set(key, value);
        self
    }

    pub fn virtual_column(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Name of the synthetic column this one maps to, if any.
    pub fn special(&self) -> Option<String> {
        self.options.special()
    }
}

/// One key part of an index: a column and its key length (0 = whole column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPart {
    pub column: String,
    #[serde(default)]
    pub length: u32,
}

impl KeyPart {
    pub fn new(column: &str) -> Self {
        Self {
            column: column.to_string(),
            length: 0,
        }
    }
}

/// An index as declared in a table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    pub parts: Vec<KeyPart>,
    #[serde(default)]
    pub options: IndexOptionSet,
}

impl IndexSpec {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            unique: false,
            parts: columns.iter().map(|c| KeyPart::new(c)).collect(),
            options: IndexOptionSet::default(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A resolved index definition, the unit the reconciler compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    pub parts: Vec<KeyPart>,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub mapped: bool,
}

impl IndexDefinition {
    pub fn new(name: &str, unique: bool, parts: Vec<KeyPart>) -> Self {
        Self {
            name: name.to_string(),
            unique,
            parts,
            dynamic: false,
            mapped: false,
        }
    }

    /// Names and key-part columns match case-insensitively, key parts keep
    /// their order and length, and the uniqueness and storage flags agree.
    pub fn is_equivalent(&self, other: &IndexDefinition) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.unique == other.unique
            && self.dynamic == other.dynamic
            && self.mapped == other.mapped
            && self.parts.len() == other.parts.len()
            && self
                .parts
                .iter()
                .zip(&other.parts)
                .all(|(a, b)| a.column.eq_ignore_ascii_case(&b.column) && a.length == b.length)
    }
}

/// Full description of an external table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default)]
    pub options: TableOptionSet,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            indexes: Vec::new(),
            options: TableOptionSet::default(),
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_option(mut self, key: &str, value: impl Into<crate::options::OptionValue>) -> Self {
        self.options.set(key, value);
        self
    }

    /// Position of the column named `name` (case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Index definitions with key lengths resolved against column lengths
    /// and storage flags taken from the index options.
    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.indexes
            .iter()
            .map(|spec| IndexDefinition {
                name: spec.name.clone(),
                unique: spec.unique,
                parts: spec
                    .parts
                    .iter()
                    .map(|part| {
                        let length = match part.length {
                            0 => self.column(&part.column).map(|c| c.length).unwrap_or(0),
                            n => n,
                        };
                        KeyPart {
                            column: part.column.clone(),
                            length,
                        }
                    })
                    .collect(),
                dynamic: spec.options.dynamic(),
                mapped: spec.options.mapped() || self.options.mapped(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableSchema {
        TableSchema::new(
            "people",
            vec![
                ColumnDef::new("id", ColumnType::Integer).with_length(11),
                ColumnDef::new("name", ColumnType::String).with_length(32),
            ],
        )
        .with_index(IndexSpec::new("pk", &["id"]).unique())
    }

    #[test]
    fn test_column_lookup_case_insensitive() {
        let schema = sample();
        assert_eq!(schema.column_index("NAME"), Some(1));
        assert!(schema.column("missing").is_none());
    }

    #[test]
    fn test_index_definitions_resolve_lengths() {
        let defs = sample().index_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].parts[0].length, 11);
        assert!(defs[0].unique);
    }

    #[test]
    fn test_equivalence_rules() {
        let a = IndexDefinition::new("Idx", true, vec![KeyPart::new("a"), KeyPart::new("b")]);
        let same = IndexDefinition::new("idx", true, vec![KeyPart::new("a"), KeyPart::new("b")]);
        assert!(a.is_equivalent(&same));

        let reordered = IndexDefinition::new("idx", true, vec![KeyPart::new("b"), KeyPart::new("a")]);
        assert!(!a.is_equivalent(&reordered));

        let not_unique = IndexDefinition::new("idx", false, a.parts.clone());
        assert!(!a.is_equivalent(&not_unique));

        let mut dynamic = same.clone();
        dynamic.dynamic = true;
        assert!(!a.is_equivalent(&dynamic));

        let recased = IndexDefinition::new("IDX", true, vec![KeyPart::new("A"), KeyPart::new("b")]);
        assert!(a.is_equivalent(&recased));

        let mut longer = same;
        longer.parts[1].length = 8;
        assert!(!a.is_equivalent(&longer));
    }

    #[test]
    fn test_schema_from_json() {
        let json = r#"{
            "name": "t",
            "columns": [
                {"name": "a", "type": "integer"},
                {"name": "b", "type": "string", "length": 10, "options": {"Special": "TABID"}}
            ],
            "options": {"type": "csv", "filename": "t.csv"}
        }"#;
        let schema: TableSchema = serde_json::from_str(json).unwrap();
        assert!(schema.columns[0].nullable);
        assert_eq!(schema.columns[1].special().as_deref(), Some("TABID"));
        assert_eq!(schema.options.table_type(), "CSV");
    }
}
