//! Expansion of schedule entries into concrete audit jobs, and the
//! parallelism clamp.

use crate::schema::{Limits, ScheduleEntry, TableSpec};
use tally_core::{AuditJob, Period};

/// Outcome of expanding one table spec against a resolved period.
#[derive(Debug, Clone)]
pub enum BuiltJob {
    Ready(AuditJob),
    /// The template referenced a placeholder the period cannot supply. The
    /// job identity is kept so it can be reported as a failed result; it is
    /// never executed.
    Unresolved { job: AuditJob, placeholder: String },
}

impl BuiltJob {
    pub fn job(&self) -> &AuditJob {
        match self {
            BuiltJob::Ready(job) => job,
            BuiltJob::Unresolved { job, .. } => job,
        }
    }
}

/// Expand a schedule entry into one audit job per table spec.
///
/// Substitution is purely textual. A placeholder left unresolved marks that
/// job `Unresolved` without affecting its siblings.
pub fn build_jobs(
    entry: &ScheduleEntry,
    period: Period,
    batch_no: &str,
    jar_threads: u32,
) -> Vec<BuiltJob> {
    entry
        .tables
        .iter()
        .map(|table| build_one(entry, table, period, batch_no, jar_threads))
        .collect()
}

fn build_one(
    entry: &ScheduleEntry,
    table: &TableSpec,
    period: Period,
    batch_no: &str,
    jar_threads: u32,
) -> BuiltJob {
    let partition = substitute(&table.partition_template, &period);
    let hdfs_path = join_path(&table.hdfs_base_path, &partition);

    let job = AuditJob {
        task_name: entry.task_name.clone(),
        interface_id: entry.interface_id.clone(),
        platform_id: entry.platform_id.clone(),
        partner_id: entry.partner_id.clone(),
        table_name: table.table_name.clone(),
        hdfs_path,
        format: table.format,
        delimiter: table.delimiter.clone(),
        period,
        batch_no: batch_no.to_string(),
        jar_threads,
    };

    match find_placeholder(&job.hdfs_path) {
        Some(placeholder) => BuiltJob::Unresolved { job, placeholder },
        None => BuiltJob::Ready(job),
    }
}

fn substitute(template: &str, period: &Period) -> String {
    let mut out = template.to_string();
    if let Some(d) = period.data_date() {
        out = out.replace("${data_date}", &d);
    }
    if let Some(m) = period.data_month() {
        out = out.replace("${data_month}", &m);
    }
    if let Some(h) = period.data_hour() {
        out = out.replace("${data_hour}", &h);
    }
    out
}

fn join_path(base: &str, partition: &str) -> String {
    if partition.is_empty() {
        return base.trim_end_matches('/').to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        partition.trim_start_matches('/')
    )
}

/// First `${...}` occurrence left in a resolved path, if any.
fn find_placeholder(s: &str) -> Option<String> {
    let start = s.find("${")?;
    let end = s[start..]
        .find('}')
        .map(|i| start + i + 1)
        .unwrap_or(s.len());
    Some(s[start..end].to_string())
}

/// Clamp orchestration concurrency `n` and per-subprocess threads `t` to the
/// configured limits, reducing concurrency before threads when the product
/// exceeds `max_effective_parallelism`. Deterministic.
pub fn clamp_parallelism(concurrency: u32, threads: u32, limits: &Limits) -> (u32, u32) {
    let mut n = concurrency.clamp(1, limits.max_concurrency.max(1));
    let mut t = threads.clamp(1, limits.max_jar_threads.max(1));
    let cap = limits.max_effective_parallelism.max(1);

    if n * t > cap {
        n = (cap / t).max(1);
    }
    if n * t > cap {
        // n is already 1; the thread count alone exceeds the cap.
        t = cap;
    }
    (n, t)
}
