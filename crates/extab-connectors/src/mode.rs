//! Access mode state machine: maps a statement category and lock request to
//! the mode a table handle must be in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    /// No materialized access (DDL, pure info requests).
    None,
    Read,
    ReadIndexed,
    Insert,
    Update,
    Delete,
    SchemaAlter,
    Error,
}

impl AccessMode {
    /// `NONE` and `ERROR` end table access for the current statement.
    pub fn is_terminal(self) -> bool {
        matches!(self, AccessMode::None | AccessMode::Error)
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessMode::Insert | AccessMode::Update | AccessMode::Delete
        )
    }

    /// Whether a handle opened in `self` may serve a request for `requested`.
    pub fn satisfies(self, requested: AccessMode) -> bool {
        self == requested || (self == AccessMode::Read && requested == AccessMode::ReadIndexed)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessMode::None => "NONE",
            AccessMode::Read => "READ",
            AccessMode::ReadIndexed => "READ_INDEXED",
            AccessMode::Insert => "INSERT",
            AccessMode::Update => "UPDATE",
            AccessMode::Delete => "DELETE",
            AccessMode::SchemaAlter => "SCHEMA_ALTER",
            AccessMode::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Category of the SQL statement being executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SqlCommand {
    Select,
    Insert,
    InsertSelect,
    Load,
    Update,
    UpdateMulti,
    Delete,
    DeleteMulti,
    Truncate,
    Optimize,
    CreateTable,
    AlterTable,
    DropTable,
    RenameTable,
    CreateView,
    DropView,
    CreateIndex,
    DropIndex,
    LockTables,
    UnlockTables,
    /// Any category without a mapping, by name.
    Other(String),
}

const NAMED_COMMANDS: [(&str, SqlCommand); 20] = [
    ("select", SqlCommand::Select),
    ("insert", SqlCommand::Insert),
    ("insert-select", SqlCommand::InsertSelect),
    ("load", SqlCommand::Load),
    ("update", SqlCommand::Update),
    ("update-multi", SqlCommand::UpdateMulti),
    ("delete", SqlCommand::Delete),
    ("delete-multi", SqlCommand::DeleteMulti),
    ("truncate", SqlCommand::Truncate),
    ("optimize", SqlCommand::Optimize),
    ("create-table", SqlCommand::CreateTable),
    ("alter-table", SqlCommand::AlterTable),
    ("drop-table", SqlCommand::DropTable),
    ("rename-table", SqlCommand::RenameTable),
    ("create-view", SqlCommand::CreateView),
    ("drop-view", SqlCommand::DropView),
    ("create-index", SqlCommand::CreateIndex),
    ("drop-index", SqlCommand::DropIndex),
    ("lock-tables", SqlCommand::LockTables),
    ("unlock-tables", SqlCommand::UnlockTables),
];

impl SqlCommand {
    pub fn name(&self) -> &str {
        match self {
            SqlCommand::Other(name) => name,
            known => NAMED_COMMANDS
                .iter()
                .find(|(_, c)| c == known)
                .map(|(n, _)| *n)
                .unwrap_or("unknown"),
        }
    }

    /// Lock bookkeeping statements that never change table state on unlock.
    pub fn is_lock_bookkeeping(&self) -> bool {
        matches!(self, SqlCommand::LockTables | SqlCommand::UnlockTables)
    }
}

impl fmt::Display for SqlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SqlCommand {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Ok(NAMED_COMMANDS
            .iter()
            .find(|(n, _)| *n == key)
            .map(|(_, c)| c.clone())
            .unwrap_or(SqlCommand::Other(key)))
    }
}

/// Kind of lock requested for the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Read,
    Write,
    Unlock,
}

impl FromStr for LockKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(LockKind::Read),
            "write" => Ok(LockKind::Write),
            "unlock" => Ok(LockKind::Unlock),
            other => Err(ConnectorError::Config(format!("unknown lock kind {}", other))),
        }
    }
}

/// Table-level lock held through `LOCK TABLES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TableLock {
    #[default]
    Unlocked,
    Read,
    Write,
}

/// Outcome of one [`decide`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeDecision {
    pub mode: AccessMode,
    /// Index definitions must be compared at the end of the statement.
    pub recheck_indexes: bool,
    /// The table is the target of `CREATE TABLE ... SELECT`.
    pub create_as_select: bool,
    /// New `LOCK TABLES` state, when the statement changes it.
    pub table_lock: Option<TableLock>,
    /// The cached handle must be released.
    pub release: bool,
    pub message: Option<String>,
}

impl ModeDecision {
    fn mode(mode: AccessMode) -> Self {
        Self {
            mode,
            recheck_indexes: false,
            create_as_select: false,
            table_lock: None,
            release: false,
            message: None,
        }
    }

    fn error(command: &SqlCommand) -> Self {
        Self {
            message: Some(format!("Unsupported command {}", command)),
            ..Self::mode(AccessMode::Error)
        }
    }

    /// Turn an `ERROR` decision into [`ConnectorError::UnsupportedCommand`].
    pub fn into_result(self) -> Result<Self> {
        if self.mode == AccessMode::Error {
            let message = self
                .message
                .unwrap_or_else(|| "Unsupported command".to_string());
            return Err(ConnectorError::UnsupportedCommand(message));
        }
        Ok(self)
    }
}

/// Decide the access mode for `command` under a `lock` request.
///
/// `current` is the mode the handle is already in; read-intent requests for
/// data statements keep it (or start at `READ` when there is none).
pub fn decide(command: &SqlCommand, lock: LockKind, current: AccessMode) -> ModeDecision {
    use SqlCommand::*;

    match lock {
        LockKind::Write => match command {
            LockTables => ModeDecision {
                table_lock: Some(TableLock::Write),
                ..ModeDecision::mode(AccessMode::Insert)
            },
            CreateTable | Insert | Load | InsertSelect => ModeDecision::mode(AccessMode::Insert),
            Delete | DeleteMulti | Truncate => ModeDecision::mode(AccessMode::Delete),
            Update | UpdateMulti => ModeDecision::mode(AccessMode::Update),
            Select | Optimize => ModeDecision::mode(AccessMode::Read),
            DropTable | RenameTable | CreateView | DropView | CreateIndex | DropIndex => {
                ModeDecision::mode(AccessMode::None)
            }
            AlterTable => ModeDecision::mode(AccessMode::SchemaAlter),
            UnlockTables | Other(_) => ModeDecision::error(command),
        },
        LockKind::Read => {
            let keep = if current.is_terminal() {
                AccessMode::Read
            } else {
                current
            };
            match command {
                CreateTable => ModeDecision {
                    recheck_indexes: true,
                    create_as_select: true,
                    ..ModeDecision::mode(keep)
                },
                Insert | Load | InsertSelect | Delete | DeleteMulti | Truncate | Update
                | UpdateMulti | Select | Optimize => ModeDecision::mode(keep),
                LockTables => ModeDecision {
                    table_lock: Some(TableLock::Read),
                    ..ModeDecision::mode(keep)
                },
                DropTable | RenameTable | CreateView | DropView => {
                    ModeDecision::mode(AccessMode::None)
                }
                AlterTable => ModeDecision {
                    recheck_indexes: true,
                    ..ModeDecision::mode(AccessMode::SchemaAlter)
                },
                CreateIndex | DropIndex => ModeDecision {
                    recheck_indexes: true,
                    ..ModeDecision::mode(AccessMode::None)
                },
                UnlockTables | Other(_) => ModeDecision::error(command),
            }
        }
        LockKind::Unlock => {
            if command.is_lock_bookkeeping() {
                ModeDecision::mode(current)
            } else {
                ModeDecision {
                    release: true,
                    table_lock: Some(TableLock::Unlocked),
                    ..ModeDecision::mode(AccessMode::None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(s: &str) -> SqlCommand {
        s.parse().unwrap()
    }

    #[test]
    fn test_write_lock_table() {
        let cases = [
            ("create-table", AccessMode::Insert),
            ("insert", AccessMode::Insert),
            ("load", AccessMode::Insert),
            ("insert-select", AccessMode::Insert),
            ("delete", AccessMode::Delete),
            ("delete-multi", AccessMode::Delete),
            ("truncate", AccessMode::Delete),
            ("update", AccessMode::Update),
            ("update-multi", AccessMode::Update),
            ("select", AccessMode::Read),
            ("optimize", AccessMode::Read),
            ("drop-table", AccessMode::None),
            ("rename-table", AccessMode::None),
            ("create-view", AccessMode::None),
            ("drop-view", AccessMode::None),
            ("create-index", AccessMode::None),
            ("drop-index", AccessMode::None),
            ("alter-table", AccessMode::SchemaAlter),
        ];
        for (name, expected) in cases {
            let d = decide(&cmd(name), LockKind::Write, AccessMode::None);
            assert_eq!(d.mode, expected, "{}", name);
            assert!(!d.recheck_indexes);
        }
    }

    #[test]
    fn test_unknown_command_is_error() {
        let d = decide(&cmd("grant"), LockKind::Write, AccessMode::None);
        assert_eq!(d.mode, AccessMode::Error);
        assert!(matches!(
            d.into_result(),
            Err(ConnectorError::UnsupportedCommand(_))
        ));
        let d = decide(&cmd("grant"), LockKind::Read, AccessMode::Read);
        assert_eq!(d.mode, AccessMode::Error);
    }

    #[test]
    fn test_read_lock_keeps_current_mode() {
        let d = decide(&cmd("update"), LockKind::Read, AccessMode::Update);
        assert_eq!(d.mode, AccessMode::Update);
        let d = decide(&cmd("select"), LockKind::Read, AccessMode::None);
        assert_eq!(d.mode, AccessMode::Read);
    }

    #[test]
    fn test_read_lock_index_ddl_sets_recheck() {
        let d = decide(&cmd("create-index"), LockKind::Read, AccessMode::Read);
        assert_eq!(d.mode, AccessMode::None);
        assert!(d.recheck_indexes);

        let d = decide(&cmd("alter-table"), LockKind::Read, AccessMode::Read);
        assert_eq!(d.mode, AccessMode::SchemaAlter);
        assert!(d.recheck_indexes);

        let d = decide(&cmd("create-table"), LockKind::Read, AccessMode::None);
        assert!(d.recheck_indexes);
        assert!(d.create_as_select);
    }

    #[test]
    fn test_lock_tables() {
        let d = decide(&cmd("lock-tables"), LockKind::Write, AccessMode::None);
        assert_eq!(d.mode, AccessMode::Insert);
        assert_eq!(d.table_lock, Some(TableLock::Write));

        let d = decide(&cmd("lock-tables"), LockKind::Read, AccessMode::Read);
        assert_eq!(d.mode, AccessMode::Read);
        assert_eq!(d.table_lock, Some(TableLock::Read));
    }

    #[test]
    fn test_unlock() {
        let d = decide(&cmd("select"), LockKind::Unlock, AccessMode::Read);
        assert_eq!(d.mode, AccessMode::None);
        assert!(d.release);

        let d = decide(&cmd("unlock-tables"), LockKind::Unlock, AccessMode::Insert);
        assert_eq!(d.mode, AccessMode::Insert);
        assert!(!d.release);
        assert_eq!(d.table_lock, None);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(cmd("INSERT_SELECT"), SqlCommand::InsertSelect);
        assert_eq!(cmd("alter table"), SqlCommand::AlterTable);
        assert_eq!(cmd("grant"), SqlCommand::Other("grant".into()));
        assert_eq!(SqlCommand::DropIndex.to_string(), "drop-index");
    }

    #[test]
    fn test_satisfies() {
        assert!(AccessMode::Read.satisfies(AccessMode::ReadIndexed));
        assert!(!AccessMode::ReadIndexed.satisfies(AccessMode::Read));
        assert!(!AccessMode::Read.satisfies(AccessMode::SchemaAlter));
    }
}
