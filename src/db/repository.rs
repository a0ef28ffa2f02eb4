use crate::db::models::SinkRow;
use crate::db::BatchSink;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

/// Postgres sink. Each batch is one multi-row `INSERT`.
pub struct Repository {
    pool: PgPool,
    table: String,
}

impl Repository {
    /// `table` must already be validated as a plain identifier; it is
    /// interpolated into the statement.
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    pub async fn count_rows(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl BatchSink for Repository {
    async fn insert_batch(&self, rows: &[SinkRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        debug!("Inserting {} rows into {}", rows.len(), self.table);

        let mut query_builder = sqlx::QueryBuilder::new(format!(
            "INSERT INTO {} (
                city, time, hour,
                pm10, pm2_5, nitrogen_dioxide, sulphur_dioxide, ozone, carbon_monoxide, uv_index,
                aqi_category, severity_score, risk_flag
            ) ",
            self.table
        ));

        query_builder.push_values(rows, |mut b, row| {
            b.push_bind(&row.city)
                .push_bind(&row.time)
                .push_unseparated("::timestamp")
                .push_bind(row.hour)
                .push_bind(row.pm10)
                .push_bind(row.pm2_5)
                .push_bind(row.nitrogen_dioxide)
                .push_bind(row.sulphur_dioxide)
                .push_bind(row.ozone)
                .push_bind(row.carbon_monoxide)
                .push_bind(row.uv_index)
                .push_bind(&row.aqi_category)
                .push_bind(row.severity_score)
                .push_bind(&row.risk_flag);
        });

        let result = query_builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(sink_error)?;

        let affected = result.rows_affected() as usize;
        if affected == 0 {
            return Err(AppError::SinkRejected(format!(
                "{} acknowledged no rows",
                self.table
            )));
        }

        Ok(affected)
    }

    fn describe(&self) -> String {
        format!("postgres table {}", self.table)
    }
}

/// Statement-level rejections become sink rejections; connection-class
/// failures keep their database classification.
fn sink_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(db) => AppError::SinkRejected(db.to_string()),
        other => AppError::Database(other),
    }
}
