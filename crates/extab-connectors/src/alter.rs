//! In-place ALTER compatibility check.
//!
//! Both table versions are passed explicitly; option comparisons are pure
//! functions of the two option sets.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use extab_core::{TableOptionSet, TableSchema};

use crate::backend::{BackendKind, IndexKind};
use crate::config::EngineConfig;
use crate::error::{ConnectorError, Result};
use crate::index::{reconcile, IndexCheck};
use crate::mode::SqlCommand;

/// What the host is about to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterRequest {
    pub command: SqlCommand,
    /// Some requested operation cannot be done in place (column type
    /// change, column reorder, ...).
    #[serde(default)]
    pub requires_copy: bool,
    /// Character set, row format or similar storage attributes change.
    #[serde(default)]
    pub storage_attributes_changed: bool,
}

impl AlterRequest {
    pub fn new(command: SqlCommand) -> Self {
        Self {
            command,
            requires_copy: false,
            storage_attributes_changed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlterMethod {
    InPlace,
    Copy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterPlan {
    pub method: AlterMethod,
    /// Index comparison to apply when the table is unlocked.
    pub index_check: Option<IndexCheck>,
    pub warnings: Vec<String>,
}

/// Null and empty strings are equal; otherwise compare case-insensitively.
pub fn check_string(a: Option<&str>, b: Option<&str>) -> bool {
    match (a.filter(|s| !s.is_empty()), b.filter(|s| !s.is_empty())) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

pub fn same_string(old: &TableOptionSet, new: &TableOptionSet, key: &str) -> bool {
    check_string(old.get_string(key).as_deref(), new.get_string(key).as_deref())
}

pub fn same_bool(old: &TableOptionSet, new: &TableOptionSet, key: &str) -> bool {
    old.get_bool(key, false) == new.get_bool(key, false)
}

/// Integer option equality. An unset or zero `lrecl`, and a non-positive
/// `ending`, match anything.
pub fn same_int(old: &TableOptionSet, new: &TableOptionSet, key: &str) -> bool {
    let a = old.get_int(key).unwrap_or(0);
    let b = new.get_int(key).unwrap_or(0);
    if key.eq_ignore_ascii_case("lrecl") {
        a == b || a == 0 || b == 0
    } else if key.eq_ignore_ascii_case("ending") {
        a == b || a <= 0 || b <= 0
    } else {
        a == b
    }
}

/// Whether every column keeps its external representation options.
/// Columns are compared by position up to the shorter column list.
pub fn no_field_option_change(old: &TableSchema, new: &TableSchema) -> bool {
    old.columns.iter().zip(&new.columns).all(|(a, b)| {
        let (fa, fb) = (&a.options, &b.options);
        fa.offset().unwrap_or(0) == fb.offset().unwrap_or(0)
            && fa.fldlen().unwrap_or(0) == fb.fldlen().unwrap_or(0)
            && check_string(fa.dateformat().as_deref(), fb.dateformat().as_deref())
            && check_string(fa.fieldformat().as_deref(), fb.fieldformat().as_deref())
            && check_string(fa.special().as_deref(), fb.special().as_deref())
    })
}

fn file_has_data(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

const COMPARED_INTEGERS: [&str; 6] = ["lrecl", "elements", "header", "quoted", "ending", "compressed"];

/// Decide how an ALTER (or CREATE/DROP INDEX) from `old` to `new` is carried out.
pub fn check_alter(
    old: &TableSchema,
    new: &TableSchema,
    request: &AlterRequest,
    config: &EngineConfig,
) -> Result<AlterPlan> {
    let kind = BackendKind::of_schema(old)?;
    let new_kind = BackendKind::of_schema(new)?;
    let (oldopt, newopt) = (&old.options, &new.options);

    // No copy algorithm for outward tables
    let outward = !kind.is_file() || oldopt.filename().is_some();

    let index_ops = matches!(request.command, SqlCommand::CreateIndex | SqlCommand::DropIndex)
        || !reconcile(&old.index_definitions(), &new.index_definitions()).is_empty();

    let mut idx = false;
    let mut index_check = None;

    if index_ops || !same_string(oldopt, newopt, "optname") || !same_bool(oldopt, newopt, "sepindex") {
        if newopt.multiple().unwrap_or(0) != 0 {
            return Err(ConnectorError::IndexConflict(
                "Multiple tables are not indexable".to_string(),
            ));
        }
        if newopt.compressed().unwrap_or(0) != 0 {
            return Err(ConnectorError::IndexConflict(
                "Compressed tables are not indexable".to_string(),
            ));
        }
        match kind.capability().index_kind {
            IndexKind::Local => {
                index_check = Some(IndexCheck::between(old, new));
                if request.command == SqlCommand::AlterTable {
                    idx = true;
                } else {
                    info!(table = %old.name, "index DDL done in place");
                    return Ok(AlterPlan {
                        method: AlterMethod::InPlace,
                        index_check,
                        warnings: Vec::new(),
                    });
                }
            }
            IndexKind::None => {
                return Err(ConnectorError::IndexConflict(format!(
                    "Table type {} is not indexable",
                    kind
                )));
            }
            IndexKind::Remote => {}
        }
    }

    let in_place = if !same_string(oldopt, newopt, "filename") {
        if !outward {
            // An inward table may only become outward if the new file has no data.
            if let Some(file) = newopt.filename() {
                if file_has_data(&config.resolve(&file)) {
                    return Err(ConnectorError::AlterRejected(
                        "Operation denied. Table data would be lost.".to_string(),
                    ));
                }
            }
        }
        false
    } else if request.requires_copy || request.storage_attributes_changed {
        false
    } else {
        no_field_option_change(old, new)
            && kind == new_kind
            && COMPARED_INTEGERS
                .iter()
                .all(|key| same_int(oldopt, newopt, key))
    };

    if in_place {
        return Ok(AlterPlan {
            method: AlterMethod::InPlace,
            index_check,
            warnings: Vec::new(),
        });
    }

    if idx {
        return Err(ConnectorError::IndexConflict(
            "Alter operations not supported together".to_string(),
        ));
    }

    if outward {
        let mut warnings = Vec::new();
        if kind.is_file() {
            let msg = "This is an outward table, table data were not modified.".to_string();
            warn!(table = %old.name, "{}", msg);
            warnings.push(msg);
        }
        return Ok(AlterPlan {
            method: AlterMethod::InPlace,
            index_check,
            warnings,
        });
    }

    Ok(AlterPlan {
        method: AlterMethod::Copy,
        index_check,
        warnings: Vec::new(),
    })
}
