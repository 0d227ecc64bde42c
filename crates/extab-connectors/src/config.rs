//! Engine configuration from environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base directory for relative data file names.
    pub data_dir: PathBuf,
    /// Read buffer capacity hint, in bytes.
    pub work_size: usize,
    /// Count rows exactly when computing statistics.
    pub exact_info: bool,
    /// Log verbosity, 0 to 2.
    pub trace: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            work_size: 67_108_864,
            exact_info: false,
            trace: 0,
        }
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {}", other),
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            data_dir: PathBuf::from(
                std::env::var("EXTAB_DATA_DIR").unwrap_or_else(|_| ".".to_string()),
            ),
            work_size: std::env::var("EXTAB_WORK_SIZE")
                .unwrap_or_else(|_| "67108864".to_string())
                .parse()
                .context("Invalid EXTAB_WORK_SIZE")?,
            exact_info: parse_flag(
                &std::env::var("EXTAB_EXACT_INFO").unwrap_or_else(|_| "false".to_string()),
            )
            .context("Invalid EXTAB_EXACT_INFO")?,
            trace: std::env::var("EXTAB_TRACE")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("Invalid EXTAB_TRACE")?,
        })
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Resolve a table file name against the data directory.
    pub fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}
