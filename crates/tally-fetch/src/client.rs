//! ClickHouse completion-log client with ordered host fallback.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use clickhouse_rs::Pool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::window::Window;
use tally_catalog::ClickhouseConfig;
use tally_core::{CompletionRecord, PeriodType};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no completion-log hosts configured")]
    NoHosts,
    #[error("all completion-log hosts unreachable; last error: {0}")]
    AllHostsFailed(String),
    #[error("completion query failed on {host}: {message}")]
    Query { host: String, message: String },
}

/// Queryable source of completed task records.
pub struct CompletionLog {
    hosts: Vec<String>,
    urls: Vec<String>,
    query_template: String,
    tz: FixedOffset,
}

impl CompletionLog {
    pub fn new(cfg: &ClickhouseConfig, tz: FixedOffset) -> Self {
        CompletionLog {
            hosts: cfg.hosts.clone(),
            urls: cfg.urls(),
            query_template: cfg.completed_query.clone(),
            tz,
        }
    }

    /// Render the user query template for a window. All instants are
    /// formatted in the configured timezone.
    pub fn render_query(&self, window: &Window, data_date: NaiveDate) -> String {
        self.query_template
            .replace(
                "{start_time}",
                &window
                    .start
                    .with_timezone(&self.tz)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
            )
            .replace(
                "{end_time}",
                &window
                    .end
                    .with_timezone(&self.tz)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
            )
            .replace("{data_date}", &data_date.format("%Y%m%d").to_string())
    }

    /// Pull completion records for the window. Hosts are attempted in
    /// order; a host that cannot be reached falls through to the next one.
    /// A host that answers but rejects the query fails the fetch outright.
    pub async fn fetch(
        &self,
        window: &Window,
        data_date: NaiveDate,
    ) -> Result<Vec<CompletionRecord>, FetchError> {
        if self.urls.is_empty() {
            return Err(FetchError::NoHosts);
        }
        let sql = self.render_query(window, data_date);
        debug!("Completion query: {}", sql);

        let mut last_error = String::new();
        for (host, url) in self.hosts.iter().zip(&self.urls) {
            let pool = Pool::new(url.as_str());
            let mut client = match pool.get_handle().await {
                Ok(client) => client,
                Err(e) => {
                    warn!("Completion-log host {} unreachable: {}", host, e);
                    last_error = e.to_string();
                    continue;
                }
            };

            let block = client
                .query(sql.as_str())
                .fetch_all()
                .await
                .map_err(|e| FetchError::Query {
                    host: host.clone(),
                    message: e.to_string(),
                })?;

            let mut records = Vec::new();
            for row in block.rows() {
                let task_name: String = row.get("task_name").map_err(|e| FetchError::Query {
                    host: host.clone(),
                    message: e.to_string(),
                })?;
                let period_type: String =
                    row.get("period_type").map_err(|e| FetchError::Query {
                        host: host.clone(),
                        message: e.to_string(),
                    })?;
                let batch_no: String = row.get("batch_no").map_err(|e| FetchError::Query {
                    host: host.clone(),
                    message: e.to_string(),
                })?;
                let complete_dt: String =
                    row.get("complete_dt").map_err(|e| FetchError::Query {
                        host: host.clone(),
                        message: e.to_string(),
                    })?;

                match record_from_parts(&task_name, &period_type, &batch_no, &complete_dt, self.tz)
                {
                    Some(record) => records.push(record),
                    None => warn!(
                        "Skipping completion row with unknown period_type '{}' (task {})",
                        period_type, task_name
                    ),
                }
            }
            info!(
                "Fetched {} completion record(s) from {}",
                records.len(),
                host
            );
            return Ok(records);
        }

        Err(FetchError::AllHostsFailed(last_error))
    }
}

/// Build a completion record from the projected row values. Returns `None`
/// when the period type is unknown; a timestamp that fails to parse degrades
/// to an absent `complete_dt` with a diagnostic.
fn record_from_parts(
    task_name: &str,
    period_type: &str,
    batch_no: &str,
    complete_dt: &str,
    tz: FixedOffset,
) -> Option<CompletionRecord> {
    let period_type = PeriodType::parse(period_type)?;
    let complete_dt = parse_complete_dt(complete_dt, tz);
    if complete_dt.is_none() {
        warn!(
            "Unparseable complete_dt for task {}; record kept without timestamp",
            task_name
        );
    }
    Some(CompletionRecord {
        task_name: task_name.to_string(),
        period_type,
        batch_no: batch_no.to_string(),
        complete_dt,
    })
}

fn parse_complete_dt(s: &str, tz: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return tz.from_local_datetime(&naive).single();
    }
    DateTime::parse_from_rfc3339(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Window;
    use chrono::TimeZone;

    fn cst() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn config() -> ClickhouseConfig {
        serde_yaml_config(
            r#"
hosts: [ch1, ch2]
database: scheduler
completed_query: "SELECT task_name, period_type, batch_no, toString(complete_dt) AS complete_dt FROM completions WHERE complete_dt >= '{start_time}' AND complete_dt < '{end_time}' AND dt = '{data_date}'"
"#,
        )
    }

    fn serde_yaml_config(yaml: &str) -> ClickhouseConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_render_query_substitutes_all_placeholders() {
        let log = CompletionLog::new(&config(), cst());
        let window = Window {
            start: cst().with_ymd_and_hms(2026, 1, 17, 11, 50, 0).unwrap(),
            end: cst().with_ymd_and_hms(2026, 1, 17, 13, 5, 0).unwrap(),
        };
        let sql = log.render_query(&window, NaiveDate::from_ymd_opt(2026, 1, 16).unwrap());
        assert!(sql.contains("'2026-01-17 11:50:00'"));
        assert!(sql.contains("'2026-01-17 13:05:00'"));
        assert!(sql.contains("'20260116'"));
        assert!(!sql.contains('{'));
    }

    #[test]
    fn test_render_query_converts_to_configured_timezone() {
        let log = CompletionLog::new(&config(), cst());
        // Window carried in UTC; the rendered literals must be +08:00 local.
        let utc = FixedOffset::east_opt(0).unwrap();
        let window = Window {
            start: utc.with_ymd_and_hms(2026, 1, 17, 3, 50, 0).unwrap(),
            end: utc.with_ymd_and_hms(2026, 1, 17, 5, 5, 0).unwrap(),
        };
        let sql = log.render_query(&window, NaiveDate::from_ymd_opt(2026, 1, 17).unwrap());
        assert!(sql.contains("'2026-01-17 11:50:00'"));
        assert!(sql.contains("'2026-01-17 13:05:00'"));
    }

    #[test]
    fn test_record_from_parts() {
        let record =
            record_from_parts("t1", "daily", "20260116", "2026-01-17 13:02:00", cst()).unwrap();
        assert_eq!(record.period_type, PeriodType::Daily);
        assert_eq!(
            record.complete_dt,
            Some(cst().with_ymd_and_hms(2026, 1, 17, 13, 2, 0).unwrap())
        );
    }

    #[test]
    fn test_record_from_parts_unknown_period() {
        assert!(record_from_parts("t1", "weekly", "b", "2026-01-17 13:02:00", cst()).is_none());
    }

    #[test]
    fn test_record_from_parts_bad_timestamp_degrades() {
        let record = record_from_parts("t1", "hourly", "b", "not-a-time", cst()).unwrap();
        assert!(record.complete_dt.is_none());
    }

    #[test]
    fn test_parse_complete_dt_rfc3339() {
        let dt = parse_complete_dt("2026-01-17T13:02:00+08:00", cst()).unwrap();
        assert_eq!(dt, cst().with_ymd_and_hms(2026, 1, 17, 13, 2, 0).unwrap());
    }

    #[tokio::test]
    async fn test_fetch_with_no_hosts() {
        let cfg = serde_yaml_config(
            r#"
hosts: []
database: scheduler
"#,
        );
        let log = CompletionLog::new(&cfg, cst());
        let window = Window {
            start: cst().with_ymd_and_hms(2026, 1, 17, 11, 0, 0).unwrap(),
            end: cst().with_ymd_and_hms(2026, 1, 17, 13, 0, 0).unwrap(),
        };
        let err = log
            .fetch(&window, NaiveDate::from_ymd_opt(2026, 1, 16).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NoHosts));
    }
}
