//! Persistent storage for performance history, reports and registry state
//!
//! [`MetricsStore`] is the seam between the registry/router and durable
//! storage. It owns no routing logic: it appends samples and reports, answers
//! history queries, and keeps the registry configuration and rotation
//! counters across restarts.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::config::RegistryConfig;
use super::rotation::{RotationMode, TaskCounter};
use super::types::{ComparisonReport, EvaluationRecord, ModelIdentifier, PerformanceMetrics, TaskType};
use crate::error::{Error, Result};
use crate::storage::Database;

/// Durable store of performance samples and registry state
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// History for a task type, optionally restricted to one model
    ///
    /// Records come back in insertion order.
    async fn query(
        &self,
        model_id: Option<&ModelIdentifier>,
        task_type: &TaskType,
    ) -> Result<Vec<EvaluationRecord>>;

    /// Append one performance sample
    async fn append_record(&self, record: &EvaluationRecord) -> Result<()>;

    /// Append one comparison report
    async fn append_report(&self, report: &ComparisonReport) -> Result<()>;

    /// Most recent reports for a task type, newest first
    async fn reports(&self, task_type: &TaskType, limit: usize) -> Result<Vec<ComparisonReport>>;

    /// Persisted registry configuration, if one was ever stored
    async fn get_config(&self) -> Result<Option<RegistryConfig>>;

    /// Replace the persisted registry configuration
    async fn put_config(&self, config: &RegistryConfig) -> Result<()>;

    /// Every persisted rotation counter
    async fn load_task_counters(&self) -> Result<HashMap<TaskType, TaskCounter>>;

    /// Persist one rotation counter
    async fn save_task_counter(&self, task_type: &TaskType, counter: &TaskCounter) -> Result<()>;
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> Error {
    Error::Other(format!("Corrupt '{}' value in metrics store: {}", column, detail))
}

/// SQLite-backed metrics store
#[derive(Debug, Clone)]
pub struct SqliteMetricsStore {
    pool: SqlitePool,
}

impl SqliteMetricsStore {
    /// Create a store from an existing, migrated connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a store on top of a [`Database`]
    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    fn record_from_row(row: &SqliteRow) -> Result<EvaluationRecord> {
        let id: String = row.get("id");
        let provider: String = row.get("provider");
        let model_name: String = row.get("model_name");
        let custom: String = row.get("custom_metrics");

        let custom_metrics: BTreeMap<String, f64> =
            serde_json::from_str(&custom).map_err(|e| corrupt("custom_metrics", e))?;

        let metrics = PerformanceMetrics {
            accuracy: row.get("accuracy"),
            latency_ms: row.get("latency_ms"),
            cost_per_unit: row.get("cost_per_unit"),
            unit_count: row.get::<Option<i64>, _>("unit_count").map(|n| n.max(0) as u64),
            user_rating: row.get("user_rating"),
            custom_metrics,
        };

        Ok(EvaluationRecord {
            id: Uuid::parse_str(&id).map_err(|e| corrupt("id", e))?,
            model_id: ModelIdentifier::new(
                provider.parse().map_err(|e: String| corrupt("provider", e))?,
                model_name,
            ),
            task_type: TaskType::new(row.get::<String, _>("task_type")),
            metrics,
            timestamp: row.get::<DateTime<Utc>, _>("recorded_at"),
            input_hash: row.get("input_hash"),
            context_size: row.get::<Option<i64>, _>("context_size").map(|n| n.max(0) as u64),
        })
    }
}

#[async_trait]
impl MetricsStore for SqliteMetricsStore {
    async fn query(
        &self,
        model_id: Option<&ModelIdentifier>,
        task_type: &TaskType,
    ) -> Result<Vec<EvaluationRecord>> {
        const COLUMNS: &str = r#"
            SELECT id, provider, model_name, task_type, accuracy, latency_ms,
                   cost_per_unit, unit_count, user_rating, custom_metrics,
                   input_hash, context_size, recorded_at
            FROM evaluation_records
        "#;

        let rows = match model_id {
            Some(model) => {
                sqlx::query(&format!(
                    "{} WHERE task_type = ? AND provider = ? AND model_name = ? ORDER BY rowid",
                    COLUMNS
                ))
                .bind(task_type.as_str())
                .bind(model.provider.as_str())
                .bind(&model.model_name)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{} WHERE task_type = ? ORDER BY rowid", COLUMNS))
                    .bind(task_type.as_str())
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(Error::DatabaseError)?;

        let records = rows
            .iter()
            .map(Self::record_from_row)
            .collect::<Result<Vec<_>>>()?;

        debug!(task_type = %task_type, count = records.len(), "Loaded evaluation records");
        Ok(records)
    }

    async fn append_record(&self, record: &EvaluationRecord) -> Result<()> {
        let custom = serde_json::to_string(&record.metrics.custom_metrics)?;

        sqlx::query(
            r#"
            INSERT INTO evaluation_records (
                id, provider, model_name, task_type, accuracy, latency_ms,
                cost_per_unit, unit_count, user_rating, custom_metrics,
                input_hash, context_size, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.model_id.provider.as_str())
        .bind(&record.model_id.model_name)
        .bind(record.task_type.as_str())
        .bind(record.metrics.accuracy)
        .bind(record.metrics.latency_ms)
        .bind(record.metrics.cost_per_unit)
        .bind(record.metrics.unit_count.map(|n| n as i64))
        .bind(record.metrics.user_rating)
        .bind(custom)
        .bind(&record.input_hash)
        .bind(record.context_size.map(|n| n as i64))
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        debug!(
            model_id = %record.model_id,
            task_type = %record.task_type,
            "Appended evaluation record"
        );
        Ok(())
    }

    async fn append_report(&self, report: &ComparisonReport) -> Result<()> {
        let body = serde_json::to_string(report)?;

        sqlx::query(
            r#"
            INSERT INTO comparison_reports (
                id, task_type, best_provider, best_model_name, candidate_count, body, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.id.to_string())
        .bind(report.task_type.as_str())
        .bind(report.best_model_id.provider.as_str())
        .bind(&report.best_model_id.model_name)
        .bind(report.results.len() as i64)
        .bind(body)
        .bind(report.timestamp)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        debug!(
            task_type = %report.task_type,
            best_model = %report.best_model_id,
            "Appended comparison report"
        );
        Ok(())
    }

    async fn reports(&self, task_type: &TaskType, limit: usize) -> Result<Vec<ComparisonReport>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM comparison_reports
            WHERE task_type = ?
            ORDER BY rowid DESC
            LIMIT ?
            "#,
        )
        .bind(task_type.as_str())
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.iter()
            .map(|row| {
                let body: String = row.get("body");
                serde_json::from_str(&body).map_err(Error::from)
            })
            .collect()
    }

    async fn get_config(&self) -> Result<Option<RegistryConfig>> {
        let row = sqlx::query("SELECT body FROM registry_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn put_config(&self, config: &RegistryConfig) -> Result<()> {
        let body = serde_json::to_string(config)?;

        sqlx::query(
            r#"
            INSERT INTO registry_config (id, body, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        debug!("Stored registry configuration");
        Ok(())
    }

    async fn load_task_counters(&self) -> Result<HashMap<TaskType, TaskCounter>> {
        let rows = sqlx::query(
            r#"
            SELECT task_type, count, mode, evaluation_tasks_remaining, last_evaluation_at
            FROM task_counters
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        let mut counters = HashMap::new();
        for row in rows {
            let mode: String = row.get("mode");
            let counter = TaskCounter {
                count: row.get::<i64, _>("count").clamp(0, u32::MAX as i64) as u32,
                last_evaluation_at: row.get("last_evaluation_at"),
                mode: mode.parse::<RotationMode>().map_err(|e| corrupt("mode", e))?,
                evaluation_tasks_remaining: row
                    .get::<i64, _>("evaluation_tasks_remaining")
                    .clamp(0, u32::MAX as i64) as u32,
            };
            counters.insert(TaskType::new(row.get::<String, _>("task_type")), counter);
        }

        debug!(count = counters.len(), "Loaded rotation counters");
        Ok(counters)
    }

    async fn save_task_counter(&self, task_type: &TaskType, counter: &TaskCounter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_counters (
                task_type, count, mode, evaluation_tasks_remaining, last_evaluation_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_type) DO UPDATE SET
                count = excluded.count,
                mode = excluded.mode,
                evaluation_tasks_remaining = excluded.evaluation_tasks_remaining,
                last_evaluation_at = excluded.last_evaluation_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task_type.as_str())
        .bind(counter.count as i64)
        .bind(counter.mode.to_string())
        .bind(counter.evaluation_tasks_remaining as i64)
        .bind(counter.last_evaluation_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        Ok(())
    }
}

/// Process-local metrics store, for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct InMemoryMetricsStore {
    records: RwLock<Vec<EvaluationRecord>>,
    reports: RwLock<Vec<ComparisonReport>>,
    config: RwLock<Option<RegistryConfig>>,
    counters: RwLock<HashMap<TaskType, TaskCounter>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with history
    pub fn with_records(records: Vec<EvaluationRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Default::default()
        }
    }

    /// Number of stored records across all task types
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Number of stored reports across all task types
    pub async fn report_count(&self) -> usize {
        self.reports.read().await.len()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn query(
        &self,
        model_id: Option<&ModelIdentifier>,
        task_type: &TaskType,
    ) -> Result<Vec<EvaluationRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| &r.task_type == task_type)
            .filter(|r| model_id.is_none_or(|m| &r.model_id == m))
            .cloned()
            .collect())
    }

    async fn append_record(&self, record: &EvaluationRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn append_report(&self, report: &ComparisonReport) -> Result<()> {
        self.reports.write().await.push(report.clone());
        Ok(())
    }

    async fn reports(&self, task_type: &TaskType, limit: usize) -> Result<Vec<ComparisonReport>> {
        let reports = self.reports.read().await;
        Ok(reports
            .iter()
            .rev()
            .filter(|r| &r.task_type == task_type)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_config(&self) -> Result<Option<RegistryConfig>> {
        Ok(self.config.read().await.clone())
    }

    async fn put_config(&self, config: &RegistryConfig) -> Result<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }

    async fn load_task_counters(&self) -> Result<HashMap<TaskType, TaskCounter>> {
        Ok(self.counters.read().await.clone())
    }

    async fn save_task_counter(&self, task_type: &TaskType, counter: &TaskCounter) -> Result<()> {
        self.counters
            .write()
            .await
            .insert(task_type.clone(), counter.clone());
        Ok(())
    }
}
