//! Core domain types and watermark persistence for tally.

pub mod types;
pub mod watermark;

pub use types::{
    AuditJob, CompletionRecord, CountReport, CountStatus, FileError, FileFormat, Period,
    PeriodType,
};
pub use watermark::{Watermark, WatermarkError, WatermarkStore};
