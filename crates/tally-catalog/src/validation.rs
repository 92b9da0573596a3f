//! Catalog validation.

use crate::schema::Catalog;
use std::collections::HashSet;
use tally_core::PeriodType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Task name cannot be empty")]
    EmptyTaskName,

    #[error("Duplicate task name '{0}'")]
    DuplicateTaskName(String),

    #[error("Task '{0}' has no tables")]
    NoTables(String),

    #[error("Task '{0}' table '{1}': hdfs_base_path cannot be empty")]
    EmptyBasePath(String, String),

    #[error("Task '{0}' table '{1}': {2} template must reference {3}")]
    MissingPlaceholder(String, String, PeriodType, &'static str),

    #[error("Task '{0}' table '{1}': {2} template must not reference {3}")]
    ForeignPlaceholder(String, String, PeriodType, &'static str),

    #[error("Limit '{0}' must be positive")]
    NonPositiveLimit(&'static str),
}

const DATA_DATE: &str = "${data_date}";
const DATA_MONTH: &str = "${data_month}";
const DATA_HOUR: &str = "${data_hour}";

/// Validate the catalog, accumulating every problem found.
pub fn validate_catalog(catalog: &Catalog) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if catalog.defaults.limits.max_concurrency == 0 {
        errors.push(ValidationError::NonPositiveLimit("max_python_concurrency"));
    }
    if catalog.defaults.limits.max_jar_threads == 0 {
        errors.push(ValidationError::NonPositiveLimit("max_jar_threads"));
    }
    if catalog.defaults.limits.max_effective_parallelism == 0 {
        errors.push(ValidationError::NonPositiveLimit("max_effective_parallelism"));
    }

    let mut seen = HashSet::new();
    for entry in &catalog.schedules {
        if entry.task_name.trim().is_empty() {
            errors.push(ValidationError::EmptyTaskName);
        } else if !seen.insert(entry.task_name.as_str()) {
            errors.push(ValidationError::DuplicateTaskName(entry.task_name.clone()));
        }

        if entry.tables.is_empty() {
            errors.push(ValidationError::NoTables(entry.task_name.clone()));
        }

        for table in &entry.tables {
            if table.hdfs_base_path.trim().is_empty() {
                errors.push(ValidationError::EmptyBasePath(
                    entry.task_name.clone(),
                    table.table_name.clone(),
                ));
            }

            // The template must reference exactly the placeholders its
            // period can supply.
            let (required, forbidden): (&[&'static str], &[&'static str]) =
                match entry.period_type {
                    PeriodType::Daily => (&[DATA_DATE], &[DATA_MONTH, DATA_HOUR]),
                    PeriodType::Monthly => (&[DATA_MONTH], &[DATA_DATE, DATA_HOUR]),
                    PeriodType::Hourly => (&[DATA_DATE, DATA_HOUR], &[DATA_MONTH]),
                };
            for placeholder in required {
                if !table.partition_template.contains(placeholder) {
                    errors.push(ValidationError::MissingPlaceholder(
                        entry.task_name.clone(),
                        table.table_name.clone(),
                        entry.period_type,
                        placeholder,
                    ));
                }
            }
            for placeholder in forbidden {
                if table.partition_template.contains(placeholder) {
                    errors.push(ValidationError::ForeignPlaceholder(
                        entry.task_name.clone(),
                        table.table_name.clone(),
                        entry.period_type,
                        placeholder,
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
