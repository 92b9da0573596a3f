//! Audit catalog and runtime configuration for tally.
//!
//! The catalog is a YAML document listing warehouse tasks and the tables
//! they write; this crate parses it, validates it, and expands matched
//! entries into concrete audit jobs. The companion DB config document
//! carries MySQL / ClickHouse / watermark / counter settings.

pub mod dbconfig;
pub mod jobs;
pub mod schema;
pub mod validation;

pub use dbconfig::{
    ClickhouseConfig, CounterConfig, DbConfig, MysqlConfig, WatermarkOptions,
};
pub use jobs::{build_jobs, clamp_parallelism, BuiltJob};
pub use schema::{Catalog, CatalogError, Defaults, JarOptions, Limits, ScheduleEntry, TableSpec};
pub use validation::{validate_catalog, ValidationError};
