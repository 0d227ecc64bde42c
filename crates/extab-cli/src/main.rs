//! extab CLI - inspect access modes, pushdown translations and index plans

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use extab_connectors::{
    decide, plan_index_changes, reconcile, translate, AccessMode, BackendKind, ColumnUsage,
    CsvBackend, EngineConfig, ExternalTable, IndexCheck, IndexLayout, LockKind, PredicateNode,
    Session, SqlCommand, Translation,
};
use extab_core::{IndexDefinition, TableSchema};

#[derive(Parser)]
#[command(name = "extab")]
#[command(about = "External table adaptation layer - pushdown, access modes and index plans")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the access mode decided for a statement category and lock
    Mode {
        /// Statement category (select, insert, alter-table, ...)
        #[arg(short, long)]
        command: String,

        /// Lock kind: read, write or unlock
        #[arg(short, long, default_value = "write")]
        lock: String,

        /// Mode the handle is currently in
        #[arg(long, default_value = "none")]
        current: String,
    },

    /// Translate a predicate tree for a backend
    Translate {
        /// Path to the table schema JSON file
        #[arg(short, long)]
        schema: PathBuf,

        /// Path to the predicate JSON file
        #[arg(short, long)]
        predicate: PathBuf,

        /// Backend kind; defaults to the schema's `type` option
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Print the index plan between two index definition lists
    Reconcile {
        /// Path to the old index definitions JSON file
        #[arg(long)]
        old: PathBuf,

        /// Path to the new index definitions JSON file
        #[arg(long)]
        new: PathBuf,

        /// Old indexes are stored one file per index
        #[arg(long)]
        old_sepindex: bool,

        /// New indexes are stored one file per index
        #[arg(long)]
        new_sepindex: bool,
    },

    /// Read a delimited-file table, pushing the predicate down
    Scan {
        /// Path to the table schema JSON file
        #[arg(short, long)]
        schema: PathBuf,

        /// Path to the predicate JSON file
        #[arg(short, long)]
        predicate: Option<PathBuf>,

        /// Base directory for relative file names
        #[arg(short, long, env = "EXTAB_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;

    // Set up logging
    let level = match (cli.verbose, config.trace) {
        (_, t) if t >= 2 => Level::TRACE,
        (true, _) | (_, 1) => Level::DEBUG,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Mode {
            command,
            lock,
            current,
        } => show_mode(&command, &lock, &current)?,
        Commands::Translate {
            schema,
            predicate,
            kind,
        } => show_translation(&schema, &predicate, kind.as_deref())?,
        Commands::Reconcile {
            old,
            new,
            old_sepindex,
            new_sepindex,
        } => show_index_plan(&old, &new, old_sepindex, new_sepindex)?,
        Commands::Scan {
            schema,
            predicate,
            data_dir,
        } => {
            let config = match data_dir {
                Some(dir) => config.with_data_dir(dir),
                None => config,
            };
            scan(&schema, predicate.as_deref(), config)?;
        }
    }

    Ok(())
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn parse_mode(text: &str) -> Result<AccessMode> {
    let quoted = format!("\"{}\"", text.trim().to_ascii_uppercase().replace('-', "_"));
    serde_json::from_str(&quoted).with_context(|| format!("Unknown access mode {}", text))
}

fn show_mode(command: &str, lock: &str, current: &str) -> Result<()> {
    let command: SqlCommand = command.parse()?;
    let lock: LockKind = lock.parse()?;
    let decision = decide(&command, lock, parse_mode(current)?);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    decision.into_result()?;
    Ok(())
}

fn show_translation(schema_path: &Path, predicate_path: &Path, kind: Option<&str>) -> Result<()> {
    let schema: TableSchema = load_json(schema_path)?;
    let predicate: PredicateNode = load_json(predicate_path)?;
    let kind = match kind {
        Some(k) => k.parse::<BackendKind>()?,
        None => BackendKind::of_schema(&schema)?,
    };

    let translation = translate(&predicate, &schema, &kind.capability());
    println!("{}", translation);
    match &translation {
        Translation::Text(text) if !text.params.is_empty() => {
            println!("params: {}", serde_json::to_string(&text.params)?);
        }
        Translation::NotPushable => {
            info!("Predicate is evaluated by the host for table {}", schema.name);
        }
        _ => {}
    }
    Ok(())
}

fn show_index_plan(old: &Path, new: &Path, old_sepindex: bool, new_sepindex: bool) -> Result<()> {
    let old: Vec<IndexDefinition> = load_json(old)?;
    let new: Vec<IndexDefinition> = load_json(new)?;

    let delta = reconcile(&old, &new);
    info!(
        "{} index(es) to drop, {} to add",
        delta.to_drop.len(),
        delta.to_add.len()
    );

    let plan = plan_index_changes(&IndexCheck {
        old,
        old_layout: IndexLayout {
            separate: old_sepindex,
        },
        new,
        new_layout: IndexLayout {
            separate: new_sepindex,
        },
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn scan(schema_path: &Path, predicate_path: Option<&Path>, config: EngineConfig) -> Result<()> {
    let schema: TableSchema = load_json(schema_path)?;
    let predicate: Option<PredicateNode> = predicate_path.map(load_json).transpose()?;
    let kind = BackendKind::of_schema(&schema)?;
    let backend = CsvBackend::with_kind(kind, config.clone())?;
    let table = ExternalTable::new(schema, Arc::new(backend));

    let mut session = Session::new(1, config);
    session.begin_statement(1, SqlCommand::Select);
    session.lock_table(&table, LockKind::Read)?;

    let usage = ColumnUsage::all(&table.schema);
    let handle = session.acquire(&table, AccessMode::Read, &usage)?;
    if let Some(predicate) = &predicate {
        let translation = handle.push_condition(predicate);
        info!("Pushed filter: {}", translation);
    }

    let mut matched = 0usize;
    while let Some(row) = handle.next_row()? {
        if let Some(predicate) = &predicate {
            if !predicate.matches(&table.schema, &row) {
                continue;
            }
        }
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        println!("{}", serde_json::to_string(&cells)?);
        matched += 1;
    }

    session.lock_table(&table, LockKind::Unlock)?;
    info!("{} row(s) from {}", matched, table.name());
    Ok(())
}
