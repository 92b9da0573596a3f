//! Domain types shared across the tally crates.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// Temporal granularity a task's partitions are keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Hourly,
    Daily,
    Monthly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Hourly => "hourly",
            PeriodType::Daily => "daily",
            PeriodType::Monthly => "monthly",
        }
    }

    /// Parse the upstream's string form. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Some(PeriodType::Hourly),
            "daily" => Some(PeriodType::Daily),
            "monthly" => Some(PeriodType::Monthly),
            _ => None,
        }
    }
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved business period for one audit job.
///
/// The ledger receives the flat (data_date, data_month, data_hour) column
/// set; only the fields applicable to the variant are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily(NaiveDate),
    /// The month containing the given date, rendered as `YYYYMM`.
    Monthly(NaiveDate),
    /// Date plus hour-of-day (0..=23).
    Hourly(NaiveDate, u32),
}

impl Period {
    pub fn period_type(&self) -> PeriodType {
        match self {
            Period::Daily(_) => PeriodType::Daily,
            Period::Monthly(_) => PeriodType::Monthly,
            Period::Hourly(_, _) => PeriodType::Hourly,
        }
    }

    /// `YYYYMMDD`, unset for monthly periods.
    pub fn data_date(&self) -> Option<String> {
        match self {
            Period::Daily(d) | Period::Hourly(d, _) => Some(d.format("%Y%m%d").to_string()),
            Period::Monthly(_) => None,
        }
    }

    /// `YYYYMM`, set only for monthly periods.
    pub fn data_month(&self) -> Option<String> {
        match self {
            Period::Monthly(d) => Some(format!("{:04}{:02}", d.year(), d.month())),
            _ => None,
        }
    }

    /// `HH`, set only for hourly periods.
    pub fn data_hour(&self) -> Option<String> {
        match self {
            Period::Hourly(_, h) => Some(format!("{:02}", h)),
            _ => None,
        }
    }

    /// The calendar date backing this period, for SQL `DATE` columns.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Period::Daily(d) | Period::Hourly(d, _) => Some(*d),
            Period::Monthly(_) => None,
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Daily(d) => write!(f, "{}", d.format("%Y%m%d")),
            Period::Monthly(d) => write!(f, "{:04}{:02}", d.year(), d.month()),
            Period::Hourly(d, h) => write!(f, "{}/{:02}", d.format("%Y%m%d"), h),
        }
    }
}

/// An upstream scheduler's report that a named task finished.
///
/// `complete_dt` is absent when the record was synthesized locally
/// (explicit task list or skip-upstream mode) rather than fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub task_name: String,
    pub period_type: PeriodType,
    pub batch_no: String,
    pub complete_dt: Option<DateTime<FixedOffset>>,
}

/// On-disk layout of the warehouse files behind a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Orc,
    Parquet,
    Textfile,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Orc => "orc",
            FileFormat::Parquet => "parquet",
            FileFormat::Textfile => "textfile",
        }
    }
}

/// The unit of work handed to the counter driver: one fully resolved
/// HDFS location to measure. Built just-in-time before fan-out and
/// consumed once; never persisted.
#[derive(Debug, Clone)]
pub struct AuditJob {
    pub task_name: String,
    pub interface_id: String,
    pub platform_id: String,
    pub partner_id: String,
    pub table_name: String,
    pub hdfs_path: String,
    pub format: FileFormat,
    pub delimiter: Option<String>,
    pub period: Period,
    pub batch_no: String,
    pub jar_threads: u32,
}

/// Outcome status of one count, as reported by the counter subprocess.
///
/// Anything the subprocess emits outside the known set normalizes to
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountStatus {
    Success,
    Partial,
    #[serde(other)]
    Failed,
}

impl CountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountStatus::Success => "success",
            CountStatus::Partial => "partial",
            CountStatus::Failed => "failed",
        }
    }
}

/// A per-file failure inside a count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

/// Normalized result of measuring one audit job; mirrors the counter
/// subprocess JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountReport {
    pub status: CountStatus,
    pub row_count: i64,
    #[serde(default)]
    pub file_count: i64,
    #[serde(default)]
    pub success_file_count: i64,
    #[serde(default)]
    pub total_size_bytes: i64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<FileError>,
}

impl CountReport {
    /// A synthesized total-failure report, used when the subprocess never
    /// produced a parseable result.
    pub fn failed(path: &str, message: impl Into<String>) -> Self {
        CountReport {
            status: CountStatus::Failed,
            row_count: -1,
            file_count: 0,
            success_file_count: 0,
            total_size_bytes: 0,
            duration_ms: 0,
            errors: vec![FileError {
                path: path.to_string(),
                message: message.into(),
            }],
        }
    }
}
