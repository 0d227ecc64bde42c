//! extab Connectors - backend adaptation layer
//!
//! This crate sits between a host query engine and external table backends:
//! - predicate pushdown (native filters, SQL/WQL text, command lists)
//! - access mode decisions per statement and lock request
//! - per-session table handle caching with stale-handle detection
//! - index set reconciliation and ALTER compatibility checks
//! - a delimited-file backend, a remote SQL backend and a DataFusion bridge

pub mod alter;
pub mod backend;
pub mod config;
pub mod csv_backend;
pub mod datafusion_bridge;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod mode;
pub mod native;
pub mod predicate;
pub mod remote;
pub mod session;
pub mod translate;

pub use alter::{check_alter, AlterMethod, AlterPlan, AlterRequest};
pub use backend::{
    index_type_name, Backend, BackendKind, BackendTable, Capability, FilterTarget, IndexKind,
    OpenRequest, ReadOutcome, TableStats,
};
pub use config::EngineConfig;
pub use csv_backend::CsvBackend;
pub use error::{ConnectorError, Result};
pub use index::{plan_index_changes, reconcile, IndexCheck, IndexDelta, IndexLayout, IndexPlan};
pub use lifecycle::{ColumnUsage, ExternalTable, Projection, SessionId, TableHandle};
pub use mode::{decide, AccessMode, LockKind, ModeDecision, SqlCommand, TableLock};
pub use native::NativeFilter;
pub use predicate::{CompareOp, PredicateNode};
pub use remote::{RemoteExecutor, RemoteSqlBackend, RemoteTarget};
pub use session::{Session, SessionRegistry, UnlockReport};
pub use translate::{translate, Translation};
