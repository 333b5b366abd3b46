use crate::domain::model::{CleanBatch, RunMetadata};
use crate::domain::ports::Destination;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_identifier;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_TABLE: &str = "vendas";
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A row as persisted, including run metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSale {
    pub sale_id: i64,
    pub product: String,
    pub category: Option<String>,
    pub region: Option<String>,
    pub quantity: i64,
    pub price: String,
    pub sale_date: String,
    pub total: String,
    pub run_id: String,
    pub loaded_at: String,
}

/// SQLite-backed destination table.
///
/// Every batch is written in one transaction and upserted by `sale_id`, so a
/// repeated run overwrites its own rows instead of duplicating them. The load
/// lock keeps two runs in this process from interleaving their write windows;
/// the transaction covers other processes.
#[derive(Debug, Clone)]
pub struct SqliteDestination {
    pool: SqlitePool,
    table: String,
    load_lock: Arc<Mutex<()>>,
}

impl SqliteDestination {
    pub async fn connect(url: &str, max_connections: u32, table: &str) -> Result<Self> {
        Self::connect_with_busy_timeout(url, max_connections, table, DEFAULT_BUSY_TIMEOUT).await
    }

    /// `busy_timeout` bounds how long a write waits for another writer's lock
    /// before failing with a retryable ConnectionLost.
    pub async fn connect_with_busy_timeout(
        url: &str,
        max_connections: u32,
        table: &str,
        busy_timeout: Duration,
    ) -> Result<Self> {
        validate_identifier("load.table", table)?;

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| EtlError::ConfigError {
                message: format!("invalid database url '{}': {}", url, e),
            })?
            .create_if_missing(true)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| EtlError::ConnectionLost {
                message: format!("cannot open {}: {}", url, e),
            })?;

        tracing::debug!("Connected to {} (max {} connections)", url, max_connections);
        Self::from_pool(pool, table)
    }

    /// Wraps a pool the caller already manages.
    pub fn from_pool(pool: SqlitePool, table: &str) -> Result<Self> {
        validate_identifier("load.table", table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            load_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the destination table if it does not exist yet. Provisioning
    /// is normally done outside the pipeline; the CLI calls this on request.
    pub async fn ensure_schema(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                sale_id   INTEGER PRIMARY KEY,
                product   TEXT NOT NULL,
                category  TEXT,
                region    TEXT,
                quantity  INTEGER NOT NULL,
                price     TEXT NOT NULL,
                sale_date TEXT NOT NULL,
                total     TEXT NOT NULL,
                run_id    TEXT NOT NULL,
                loaded_at TEXT NOT NULL
            )",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        tracing::info!("Table {} created/verified", self.table);
        Ok(())
    }

    pub async fn fetch_all(&self) -> Result<Vec<StoredSale>> {
        let sql = format!(
            "SELECT sale_id, product, category, region, quantity, price, sale_date, total, run_id, loaded_at
             FROM {} ORDER BY sale_id",
            self.table
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<StoredSale> {
                Ok(StoredSale {
                    sale_id: row.try_get("sale_id")?,
                    product: row.try_get("product")?,
                    category: row.try_get("category")?,
                    region: row.try_get("region")?,
                    quantity: row.try_get("quantity")?,
                    price: row.try_get("price")?,
                    sale_date: row.try_get("sale_date")?,
                    total: row.try_get("total")?,
                    run_id: row.try_get("run_id")?,
                    loaded_at: row.try_get("loaded_at")?,
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (sale_id, product, category, region, quantity, price, sale_date, total, run_id, loaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(sale_id) DO UPDATE SET
                product = excluded.product,
                category = excluded.category,
                region = excluded.region,
                quantity = excluded.quantity,
                price = excluded.price,
                sale_date = excluded.sale_date,
                total = excluded.total,
                run_id = excluded.run_id,
                loaded_at = excluded.loaded_at",
            self.table
        )
    }
}

#[async_trait]
impl Destination for SqliteDestination {
    async fn write_batch(&self, batch: &CleanBatch, meta: &RunMetadata) -> Result<u64> {
        let _window = self.load_lock.lock().await;

        let sql = self.upsert_sql();
        let run_id = meta.run_id.to_string();
        let loaded_at = meta.loaded_at.to_rfc3339();

        // 任何一筆失敗時 tx 被丟棄即回滾
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for record in &batch.records {
            sqlx::query(&sql)
                .bind(record.sale_id)
                .bind(&record.product)
                .bind(record.category.as_deref())
                .bind(record.region.as_deref())
                .bind(record.quantity)
                .bind(record.unit_price.to_string())
                .bind(record.sale_date.format("%Y-%m-%d").to_string())
                .bind(record.line_total.to_string())
                .bind(&run_id)
                .bind(&loaded_at)
                .execute(&mut *tx)
                .await?;
            written += 1;
        }
        tx.commit().await?;

        tracing::debug!("Committed {} rows to {}", written, self.table);
        Ok(written)
    }

    async fn row_count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    fn describe(&self) -> String {
        format!("sqlite table '{}'", self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::CleanRecord;
    use crate::utils::error::ErrorKind;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    async fn destination(dir: &TempDir) -> SqliteDestination {
        let url = format!("sqlite://{}", dir.path().join("vendas.db").display());
        let destination = SqliteDestination::connect(&url, 2, DEFAULT_TABLE).await.unwrap();
        destination.ensure_schema().await.unwrap();
        destination
    }

    fn record(sale_id: i64, quantity: i64, price: &str) -> CleanRecord {
        let unit_price = Decimal::from_str(price).unwrap();
        CleanRecord {
            sale_id,
            product: format!("Produto {}", sale_id),
            category: Some("Roupas".to_string()),
            region: None,
            quantity,
            unit_price,
            sale_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            line_total: crate::core::transform::line_total(quantity, unit_price, 2).unwrap(),
        }
    }

    fn batch(ids: std::ops::RangeInclusive<i64>) -> CleanBatch {
        CleanBatch {
            records: ids.map(|id| record(id, 2, "10.50")).collect(),
            precision: 2,
        }
    }

    #[tokio::test]
    async fn test_write_batch_persists_rows_and_metadata() {
        let dir = TempDir::new().unwrap();
        let destination = destination(&dir).await;
        let meta = RunMetadata::new();

        let written = destination.write_batch(&batch(1..=3), &meta).await.unwrap();

        assert_eq!(written, 3);
        let rows = destination.fetch_all().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].total, "21.00");
        assert_eq!(rows[0].price, "10.50");
        assert_eq!(rows[0].sale_date, "2025-01-15");
        assert_eq!(rows[0].category.as_deref(), Some("Roupas"));
        assert_eq!(rows[0].region, None);
        assert_eq!(rows[0].run_id, meta.run_id.to_string());
    }

    #[tokio::test]
    async fn test_rerun_upserts_instead_of_duplicating() {
        let dir = TempDir::new().unwrap();
        let destination = destination(&dir).await;

        destination.write_batch(&batch(1..=4), &RunMetadata::new()).await.unwrap();
        let second = RunMetadata::new();
        destination.write_batch(&batch(1..=4), &second).await.unwrap();

        assert_eq!(destination.row_count().await.unwrap(), 4);
        let rows = destination.fetch_all().await.unwrap();
        assert!(rows.iter().all(|r| r.run_id == second.run_id.to_string()));
    }

    #[tokio::test]
    async fn test_failure_mid_batch_rolls_back_everything() {
        let dir = TempDir::new().unwrap();
        let destination = destination(&dir).await;

        // 第 7 筆觸發錯誤，前 6 筆必須一起回滾
        sqlx::query(
            "CREATE TRIGGER fail_on_seven BEFORE INSERT ON vendas
             WHEN NEW.sale_id = 7
             BEGIN SELECT RAISE(ABORT, 'simulated failure'); END",
        )
        .execute(destination.pool())
        .await
        .unwrap();

        let err = destination
            .write_batch(&batch(1..=10), &RunMetadata::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LoadRejected);
        assert!(err.to_string().contains("simulated failure"));
        assert_eq!(destination.row_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let destination = destination(&dir).await;
        let first = batch(1..=200);
        let second = batch(101..=300);
        let (meta_a, meta_b) = (RunMetadata::new(), RunMetadata::new());

        let (a, b) = tokio::join!(
            destination.write_batch(&first, &meta_a),
            destination.write_batch(&second, &meta_b)
        );

        assert_eq!(a.unwrap(), 200);
        assert_eq!(b.unwrap(), 200);
        assert_eq!(destination.row_count().await.unwrap(), 300);

        // 重疊區間整段屬於同一次執行
        let rows = destination.fetch_all().await.unwrap();
        let overlap: Vec<&StoredSale> = rows.iter().filter(|r| (101..=200).contains(&r.sale_id)).collect();
        let winner = &overlap[0].run_id;
        assert!(overlap.iter().all(|r| &r.run_id == winner));
    }

    #[tokio::test]
    async fn test_lock_held_by_other_writer_is_retryable() {
        let dir = TempDir::new().unwrap();
        let holder = destination(&dir).await;
        let url = format!("sqlite://{}", dir.path().join("vendas.db").display());
        let contender = SqliteDestination::connect_with_busy_timeout(&url, 1, DEFAULT_TABLE, Duration::ZERO)
            .await
            .unwrap();

        // 另一個寫入者持有未提交的交易
        let mut tx = holder.pool().begin().await.unwrap();
        sqlx::query(
            "INSERT INTO vendas (sale_id, product, quantity, price, sale_date, total, run_id, loaded_at)
             VALUES (999, 'Bloqueio', 1, '1.00', '2025-01-01', '1.00', 'other', 'now')",
        )
        .execute(&mut *tx)
        .await
        .unwrap();

        let err = contender
            .write_batch(&batch(1..=3), &RunMetadata::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
        assert!(err.is_retryable());

        tx.rollback().await.unwrap();
        assert_eq!(contender.row_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_rejected() {
        let dir = TempDir::new().unwrap();
        let destination = destination(&dir).await;

        let err: EtlError = sqlx::query("INSERT INTO vendas (sale_id) VALUES (1)")
            .execute(destination.pool())
            .await
            .unwrap_err()
            .into();

        assert_eq!(err.kind(), ErrorKind::LoadRejected);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_table_name() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("x.db").display());

        let err = SqliteDestination::connect(&url, 1, "vendas; DROP TABLE vendas")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
