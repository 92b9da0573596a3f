//! The flat ledger record built from a job and its count report.

use chrono::NaiveDate;
use tally_core::{AuditJob, CountReport};

/// Upper bound on the JSON error payload stored per row.
const MAX_ERROR_BYTES: usize = 4096;

/// One append record for the audit ledger. `created_at` is left to the
/// server default.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub task_name: String,
    pub interface_id: String,
    pub platform_id: String,
    pub partner_id: String,
    pub table_name: String,
    pub hdfs_path: String,
    pub period_type: String,
    pub batch_no: String,
    pub data_date: Option<NaiveDate>,
    pub data_month: Option<String>,
    pub data_hour: Option<String>,
    pub row_count: i64,
    pub file_count: i64,
    pub total_size_bytes: i64,
    pub status: String,
    pub error_msg: Option<String>,
    pub duration_ms: i64,
}

impl AuditRow {
    /// Flatten one job outcome. The tagged period becomes the nullable
    /// (data_date, data_month, data_hour) column set; the per-file error
    /// list becomes a JSON string capped at 4 KiB.
    pub fn from_outcome(job: &AuditJob, report: &CountReport) -> Self {
        AuditRow {
            task_name: job.task_name.clone(),
            interface_id: job.interface_id.clone(),
            platform_id: job.platform_id.clone(),
            partner_id: job.partner_id.clone(),
            table_name: job.table_name.clone(),
            hdfs_path: job.hdfs_path.clone(),
            period_type: job.period.period_type().as_str().to_string(),
            batch_no: job.batch_no.clone(),
            data_date: job.period.date(),
            data_month: job.period.data_month(),
            data_hour: job.period.data_hour(),
            row_count: report.row_count,
            file_count: report.file_count,
            total_size_bytes: report.total_size_bytes,
            status: report.status.as_str().to_string(),
            error_msg: encode_errors(report),
            duration_ms: report.duration_ms as i64,
        }
    }
}

fn encode_errors(report: &CountReport) -> Option<String> {
    if report.errors.is_empty() {
        return None;
    }
    let json = serde_json::to_string(&report.errors).unwrap_or_else(|_| "[]".to_string());
    Some(truncate(json, MAX_ERROR_BYTES))
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}
