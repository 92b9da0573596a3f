//! Completion-log access: window planning, the ClickHouse client, and
//! completion-record dedup.

pub mod client;
pub mod window;

pub use client::{CompletionLog, FetchError};
pub use window::{plan_window, Window, WindowOptions, WindowPlan};

use chrono::{FixedOffset, NaiveDate, Timelike};
use std::collections::HashMap;
use tally_core::{CompletionRecord, Period, PeriodType};

/// Collapse duplicates on (task_name, period_type, batch_no), keeping the
/// record with the latest `complete_dt`. First-seen order is preserved so
/// job construction stays deterministic.
pub fn dedup_completions(records: Vec<CompletionRecord>) -> Vec<CompletionRecord> {
    let mut out: Vec<CompletionRecord> = Vec::with_capacity(records.len());
    let mut index: HashMap<(String, PeriodType, String), usize> = HashMap::new();

    for record in records {
        let key = (
            record.task_name.clone(),
            record.period_type,
            record.batch_no.clone(),
        );
        match index.get(&key) {
            Some(&i) => {
                if record.complete_dt > out[i].complete_dt {
                    out[i] = record;
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Resolve the business periods a completion record covers.
///
/// Daily and monthly records key on the run's resolved date. Hourly records
/// take date and hour from the completion timestamp in the configured
/// timezone; a record synthesized without a timestamp covers every hour of
/// the resolved date.
pub fn resolve_periods(
    record: &CompletionRecord,
    resolved_date: NaiveDate,
    tz: FixedOffset,
) -> Vec<Period> {
    match record.period_type {
        PeriodType::Daily => vec![Period::Daily(resolved_date)],
        PeriodType::Monthly => vec![Period::Monthly(resolved_date)],
        PeriodType::Hourly => match record.complete_dt {
            Some(dt) => {
                let local = dt.with_timezone(&tz);
                vec![Period::Hourly(local.date_naive(), local.hour())]
            }
            None => (0..24).map(|h| Period::Hourly(resolved_date, h)).collect(),
        },
    }
}
