//! Metrics database schema
//!
//! v1 holds evaluation records and comparison reports, v2 adds the registry
//! configuration row and rotation counters. [`Database::new`] applies
//! whatever is pending.
//!
//! [`Database::new`]: super::Database::new

use sqlx::SqlitePool;

/// Latest schema version
pub const CURRENT_VERSION: i32 = 2;

/// Applied versions, one row each
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Performance samples and comparison reports
const MIGRATION_V1: &str = r#"
    -- One row per executed task, append-only
    CREATE TABLE IF NOT EXISTS evaluation_records (
        id TEXT PRIMARY KEY NOT NULL,
        provider TEXT NOT NULL,
        model_name TEXT NOT NULL,
        task_type TEXT NOT NULL,
        accuracy REAL,
        latency_ms REAL,
        cost_per_unit REAL,
        unit_count INTEGER,
        user_rating REAL,
        custom_metrics TEXT NOT NULL DEFAULT '{}',
        input_hash TEXT,
        context_size INTEGER,
        recorded_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_evaluation_records_task ON evaluation_records(task_type);
    CREATE INDEX IF NOT EXISTS idx_evaluation_records_model
        ON evaluation_records(task_type, provider, model_name);

    -- One row per evaluation batch; the full report is kept as JSON
    CREATE TABLE IF NOT EXISTS comparison_reports (
        id TEXT PRIMARY KEY NOT NULL,
        task_type TEXT NOT NULL,
        best_provider TEXT NOT NULL,
        best_model_name TEXT NOT NULL,
        candidate_count INTEGER NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_comparison_reports_task
        ON comparison_reports(task_type, created_at);
"#;

/// Migration 2: Registry configuration and rotation counters
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS registry_config (
        id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS task_counters (
        task_type TEXT PRIMARY KEY NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        mode TEXT NOT NULL DEFAULT 'standard' CHECK (mode IN ('standard', 'evaluation')),
        evaluation_tasks_remaining INTEGER NOT NULL DEFAULT 0,
        last_evaluation_at TEXT,
        updated_at TEXT NOT NULL
    );
"#;

/// Highest applied version, 0 for a fresh file
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let (version,): (i32,) =
        sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(pool)
            .await?;

    Ok(version)
}

async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Apply every version above the stored one, in order
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Evaluation records and comparison reports");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Registry config and rotation counters");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Schema version report shown by `modelmux doctor`
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
}
