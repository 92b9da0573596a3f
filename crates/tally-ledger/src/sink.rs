//! Pooled MySQL writer for audit rows.
//!
//! The table is append-only with no uniqueness constraint, so every row is
//! a single INSERT with no transactional grouping; a failed write is
//! attached to its job's outcome and never blocks the rest of the run.

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use thiserror::Error;
use tracing::{debug, info};

use crate::row::AuditRow;
use tally_catalog::MysqlConfig;

const POOL_SIZE: u32 = 5;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("ledger connection failed: {0}")]
    Connect(sqlx::Error),
    #[error("audit insert failed for {path}: {source}")]
    Insert {
        path: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Append-only handle on the audit ledger.
pub struct Ledger {
    pool: MySqlPool,
    insert_sql: String,
}

impl Ledger {
    pub async fn connect(cfg: &MysqlConfig) -> Result<Self, SinkError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect(&cfg.url())
            .await
            .map_err(SinkError::Connect)?;
        info!(
            "Connected to audit ledger {}:{}/{}",
            cfg.host, cfg.port, cfg.database
        );
        Ok(Self::with_pool(pool, &cfg.table))
    }

    pub fn with_pool(pool: MySqlPool, table: &str) -> Self {
        Ledger {
            pool,
            insert_sql: insert_sql(table),
        }
    }

    /// Insert one row. Errors identify the row's path so the caller can
    /// attach them to the right job outcome.
    pub async fn append(&self, row: &AuditRow) -> Result<(), SinkError> {
        sqlx::query(&self.insert_sql)
            .bind(&row.task_name)
            .bind(&row.interface_id)
            .bind(&row.platform_id)
            .bind(&row.partner_id)
            .bind(&row.table_name)
            .bind(&row.hdfs_path)
            .bind(&row.period_type)
            .bind(&row.batch_no)
            .bind(row.data_date)
            .bind(&row.data_month)
            .bind(&row.data_hour)
            .bind(row.row_count)
            .bind(row.file_count)
            .bind(row.total_size_bytes)
            .bind(&row.status)
            .bind(&row.error_msg)
            .bind(row.duration_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| SinkError::Insert {
                path: row.hdfs_path.clone(),
                source: e,
            })?;
        debug!("Appended audit row for {}", row.hdfs_path);
        Ok(())
    }

    /// Insert a batch, isolating per-row failures. Returns the failures
    /// paired with the offending row's index.
    pub async fn append_many(&self, rows: &[AuditRow]) -> Vec<(usize, SinkError)> {
        let mut failures = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if let Err(e) = self.append(row).await {
                failures.push((i, e));
            }
        }
        failures
    }
}

fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} \
         (task_name, interface_id, platform_id, partner_id, table_name, hdfs_path, \
          period_type, batch_no, data_date, data_month, data_hour, \
          row_count, file_count, total_size_bytes, status, error_msg, duration_ms) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        table
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql_shape() {
        let sql = insert_sql("hdfs_data_audit");
        assert!(sql.starts_with("INSERT INTO hdfs_data_audit"));
        assert_eq!(sql.matches('?').count(), 17);
        // Append-only: created_at is the server's business.
        assert!(!sql.contains("created_at"));
        assert!(!sql.to_uppercase().contains("UPDATE"));
    }

    #[test]
    fn test_insert_sql_column_order_matches_binds() {
        let sql = insert_sql("t");
        let columns = [
            "task_name",
            "interface_id",
            "platform_id",
            "partner_id",
            "table_name",
            "hdfs_path",
            "period_type",
            "batch_no",
            "data_date",
            "data_month",
            "data_hour",
            "row_count",
            "file_count",
            "total_size_bytes",
            "status",
            "error_msg",
            "duration_ms",
        ];
        let mut last = 0;
        for col in columns {
            let at = sql.find(col).unwrap();
            assert!(at >= last, "column {} out of order", col);
            last = at;
        }
    }
}
