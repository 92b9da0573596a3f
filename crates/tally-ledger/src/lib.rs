//! Append-only audit ledger backed by MySQL.

pub mod row;
pub mod sink;

pub use row::AuditRow;
pub use sink::{Ledger, SinkError};
