//! Query backend - the runner's view of the database
//!
//! The runner only needs four things from PostgreSQL: run a statement, run it
//! under EXPLAIN ANALYZE, fetch the normalised result tuples, and describe the
//! table state. Keeping that behind a trait lets the runner be exercised
//! without a server.

use crate::execution::result::ResultRow;
use crate::schema::TableDef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

/// Snapshot of the table state a measurement depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFingerprint {
    pub row_count: i64,

    /// Index names, sorted
    pub indexes: Vec<String>,

    /// `name:type` pairs in ordinal order
    pub columns: Vec<String>,
}

impl StateFingerprint {
    /// Describe how `other` differs from `self`, or `None` when identical.
    pub fn diff(&self, other: &StateFingerprint) -> Option<String> {
        let mut changes = Vec::new();

        if self.row_count != other.row_count {
            changes.push(format!("row count {} -> {}", self.row_count, other.row_count));
        }
        for index in self.indexes.iter().filter(|i| !other.indexes.contains(i)) {
            changes.push(format!("index {} dropped", index));
        }
        for index in other.indexes.iter().filter(|i| !self.indexes.contains(i)) {
            changes.push(format!("index {} added", index));
        }
        if self.columns != other.columns {
            changes.push(format!(
                "columns [{}] -> [{}]",
                self.columns.join(", "),
                other.columns.join(", ")
            ));
        }

        if changes.is_empty() {
            None
        } else {
            Some(changes.join("; "))
        }
    }
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run a statement and return how many rows it produced.
    async fn execute(&self, sql: &str) -> Result<u64, sqlx::Error>;

    /// Run `EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON)` and return the plan document.
    async fn explain_analyze(&self, sql: &str) -> Result<serde_json::Value, sqlx::Error>;

    /// Fetch `(department, total_light, avg_heavy_imd)` tuples ordered by department.
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<ResultRow>, sqlx::Error>;

    async fn fingerprint(&self, table: &TableDef) -> Result<StateFingerprint, sqlx::Error>;
}

/// PostgreSQL implementation over the shared pool
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryBackend for PgBackend {
    async fn execute(&self, sql: &str) -> Result<u64, sqlx::Error> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.len() as u64)
    }

    async fn explain_analyze(&self, sql: &str) -> Result<serde_json::Value, sqlx::Error> {
        let explain = format!("EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON) {}", sql);
        let row = sqlx::query(&explain).fetch_one(&self.pool).await?;
        row.try_get::<serde_json::Value, _>(0)
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<ResultRow>, sqlx::Error> {
        let wrapped = format!(
            "SELECT department::text, total_light::text, round(avg_heavy_imd, 4)::text \
             FROM ({}) AS variant_result ORDER BY 1",
            sql
        );
        let rows = sqlx::query(&wrapped).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<ResultRow, sqlx::Error> {
                Ok(ResultRow {
                    department: row.try_get(0)?,
                    total_light: row.try_get::<Option<String>, _>(1)?.unwrap_or_default(),
                    avg_heavy_imd: row.try_get::<Option<String>, _>(2)?.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn fingerprint(&self, table: &TableDef) -> Result<StateFingerprint, sqlx::Error> {
        let (row_count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table.qualified_name()))
                .fetch_one(&self.pool)
                .await?;

        let indexes: Vec<(String,)> = sqlx::query_as(
            "SELECT indexname::text FROM pg_indexes \
             WHERE schemaname = $1 AND tablename = $2 ORDER BY indexname",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await?;

        let columns: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await?;

        Ok(StateFingerprint {
            row_count,
            indexes: indexes.into_iter().map(|(name,)| name).collect(),
            columns: columns
                .into_iter()
                .map(|(name, data_type)| format!("{}:{}", name, data_type))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(rows: i64, indexes: &[&str]) -> StateFingerprint {
        StateFingerprint {
            row_count: rows,
            indexes: indexes.iter().map(|s| s.to_string()).collect(),
            columns: vec!["id:numeric".to_string()],
        }
    }

    #[test]
    fn test_identical_fingerprints_have_no_diff() {
        let a = fingerprint(10, &["toll_flow_pkey"]);
        assert_eq!(a.diff(&a.clone()), None);
    }

    #[test]
    fn test_fingerprint_diff_reports_rows_and_indexes() {
        let a = fingerprint(10, &["toll_flow_pkey", "idx_a"]);
        let b = fingerprint(12, &["toll_flow_pkey", "idx_b"]);
        let diff = a.diff(&b).unwrap();
        assert!(diff.contains("row count 10 -> 12"));
        assert!(diff.contains("index idx_a dropped"));
        assert!(diff.contains("index idx_b added"));
    }
}
