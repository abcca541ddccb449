//! SQLite spend ledger.
//!
//! Every charged provider call is appended to `spend_records`. At startup
//! the ledger's totals for the current day and month are fed back into the
//! budget guard, so a restart never forgets what was already spent.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings
//! (`2025-03-10T12:00:00.000000Z`), so string comparison is time order.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ideaforge_types::accounting::SpendRecord;
use ideaforge_types::error::RepositoryError;

use super::pool::DatabasePool;

/// Spend since the start of the current day and month.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpendTotals {
    pub daily: f64,
    pub monthly: f64,
}

/// Per-provider aggregate over a period.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpend {
    pub provider: String,
    pub calls: u64,
    pub tokens: u64,
    pub cost: f64,
}

/// SQLite-backed spend ledger.
#[derive(Clone)]
pub struct SqliteSpendLedger {
    pool: DatabasePool,
}

impl SqliteSpendLedger {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Append one record.
    pub async fn record(&self, record: &SpendRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO spend_records (request_id, user_id, provider, model, tokens_used, cost, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.request_id)
        .bind(&record.user_id)
        .bind(record.provider.to_string())
        .bind(&record.model)
        .bind(i64::from(record.tokens_used))
        .bind(record.cost)
        .bind(format_datetime(&record.recorded_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    /// Total spend recorded at or after `day_start` and `month_start`.
    pub async fn totals(
        &self,
        day_start: DateTime<Utc>,
        month_start: DateTime<Utc>,
    ) -> Result<SpendTotals, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT
                   COALESCE(SUM(CASE WHEN recorded_at >= ?1 THEN cost END), 0.0) AS daily,
                   COALESCE(SUM(CASE WHEN recorded_at >= ?2 THEN cost END), 0.0) AS monthly
               FROM spend_records"#,
        )
        .bind(format_datetime(&day_start))
        .bind(format_datetime(&month_start))
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(SpendTotals {
            daily: row
                .try_get("daily")
                .map_err(|e| RepositoryError::Query(e.to_string()))?,
            monthly: row
                .try_get("monthly")
                .map_err(|e| RepositoryError::Query(e.to_string()))?,
        })
    }

    /// Calls, tokens and cost per provider since `since`, costliest first.
    pub async fn by_provider(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProviderSpend>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT provider,
                      COUNT(*) AS calls,
                      COALESCE(SUM(tokens_used), 0) AS tokens,
                      COALESCE(SUM(cost), 0.0) AS cost
               FROM spend_records
               WHERE recorded_at >= ?
               GROUP BY provider
               ORDER BY cost DESC, provider"#,
        )
        .bind(format_datetime(&since))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let calls: i64 = row.try_get("calls")?;
                let tokens: i64 = row.try_get("tokens")?;
                Ok(ProviderSpend {
                    provider: row.try_get("provider")?,
                    calls: u64::try_from(calls).unwrap_or(0),
                    tokens: u64::try_from(tokens).unwrap_or(0),
                    cost: row.try_get("cost")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    /// Drain `rx` into the ledger on a background task.
    ///
    /// Write failures are logged and dropped; they never reach the caller
    /// whose request produced the record. The task ends when every sender
    /// is gone.
    pub fn spawn_writer(self, mut rx: mpsc::UnboundedReceiver<SpendRecord>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match self.record(&record).await {
                    Ok(()) => debug!(request_id = %record.request_id, cost = record.cost, "spend recorded"),
                    Err(e) => warn!(request_id = %record.request_id, error = %e, "failed to write spend record"),
                }
            }
        })
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
