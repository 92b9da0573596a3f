//! Audit catalog schema definitions.
//!
//! Field names under `defaults` keep the legacy config contract
//! (`python_concurrency`, `jar_options`, `limits`) so existing catalogs load
//! unchanged; the Rust-side names are the meaningful ones.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use tally_core::{FileFormat, PeriodType};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value '{value}' for {what}")]
    Invalid { what: String, value: String },
}

/// The audit catalog: run-wide defaults plus one entry per warehouse task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub defaults: Defaults,
    pub schedules: Vec<ScheduleEntry>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let catalog: Catalog = serde_yaml::from_str(&raw).map_err(|e| CatalogError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(
            "Loaded {} schedule entries from {}",
            catalog.schedules.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Index entries by task name for completion matching.
    pub fn by_task_name(&self) -> HashMap<&str, &ScheduleEntry> {
        self.schedules
            .iter()
            .map(|s| (s.task_name.as_str(), s))
            .collect()
    }
}

/// Run-wide defaults and hard limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Orchestrator-level worker count (legacy key name).
    #[serde(rename = "python_concurrency", default = "default_concurrency")]
    pub concurrency: u32,
    #[serde(default)]
    pub jar_options: JarOptions,
    #[serde(default)]
    pub limits: Limits,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            concurrency: default_concurrency(),
            jar_options: JarOptions::default(),
            limits: Limits::default(),
        }
    }
}

/// Options passed to every counter subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JarOptions {
    #[serde(default = "default_threads")]
    pub threads: u32,
}

impl Default for JarOptions {
    fn default() -> Self {
        JarOptions {
            threads: default_threads(),
        }
    }
}

/// Hard caps on orchestration concurrency, per-subprocess threads, and
/// their product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(rename = "max_python_concurrency", default = "default_max_concurrency")]
    pub max_concurrency: u32,
    #[serde(default = "default_max_jar_threads")]
    pub max_jar_threads: u32,
    #[serde(default = "default_max_effective")]
    pub max_effective_parallelism: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_concurrency: default_max_concurrency(),
            max_jar_threads: default_max_jar_threads(),
            max_effective_parallelism: default_max_effective(),
        }
    }
}

fn default_concurrency() -> u32 {
    4
}
fn default_threads() -> u32 {
    4
}
fn default_max_concurrency() -> u32 {
    8
}
fn default_max_jar_threads() -> u32 {
    16
}
fn default_max_effective() -> u32 {
    32
}

/// One warehouse task and the physical tables it writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub task_name: String,
    pub interface_id: String,
    pub platform_id: String,
    pub partner_id: String,
    pub period_type: PeriodType,
    pub tables: Vec<TableSpec>,
}

/// A physical HDFS location to audit, with a partition template referencing
/// `${data_date}`, `${data_month}` and `${data_hour}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Logical `db.table` name.
    pub table_name: String,
    pub hdfs_base_path: String,
    pub format: FileFormat,
    #[serde(default)]
    pub delimiter: Option<String>,
    pub partition_template: String,
}
