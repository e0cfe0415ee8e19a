//! SQLite implementation of the stores.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use super::models::{
    AlertDbModel, EventDbModel, MetricDbModel, PipelineDbModel, PlatformDbModel, RecoveryDbModel,
};
use super::{
    PipelineEvent, PipelineRepository, RecoveryStats, StoredPipeline, TelemetryRepository,
};
use crate::domain::{PipelineConfig, PipelineConfigPatch, PipelineState};
use crate::metrics::{Alert, HealthReport, MetricSample};
use crate::platforms::PlatformInfo;
use crate::recovery::RecoveryAttempt;
use crate::{Error, Result};

const DEFAULT_POOL_SIZE: u32 = 5;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

async fn apply_per_connection_pragmas(
    conn: &mut sqlx::SqliteConnection,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Open a pool with WAL, a busy timeout and foreign keys enabled.
///
/// In-memory databases are per connection, so they always get a single one.
pub async fn init_pool_with_size(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .foreign_keys(true)
        .create_if_missing(true);

    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        max_connections.max(1)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
        })
        .connect_with(connect_options)
        .await?;

    info!(max_connections, "Database pool initialized");
    Ok(pool)
}

pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    init_pool_with_size(database_url, DEFAULT_POOL_SIZE).await
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Both repositories over one SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open `database_url`, migrate it and wrap it.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_row(&self, id: &str) -> Result<PipelineDbModel> {
        sqlx::query_as::<_, PipelineDbModel>("SELECT * FROM pipelines WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Pipeline", id))
    }
}

fn ensure_affected(rows: u64, id: &str) -> Result<()> {
    if rows == 0 {
        Err(Error::not_found("Pipeline", id))
    } else {
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl PipelineRepository for SqliteStore {
    async fn get(&self, id: &str) -> Result<PipelineConfig> {
        self.fetch_row(id).await?.into_config()
    }

    async fn get_stored(&self, id: &str) -> Result<StoredPipeline> {
        self.fetch_row(id).await?.into_stored()
    }

    async fn create(&self, config: &PipelineConfig) -> Result<()> {
        let row = PipelineDbModel::from_config(config)?;
        sqlx::query(
            r#"
            INSERT INTO pipelines (
                id, name, content_type, source, platform, stream_key, rtmp_url,
                quality, orientation, audio, output_targets, status, total_uptime_secs,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.content_type)
        .bind(&row.source)
        .bind(&row.platform)
        .bind(&row.stream_key)
        .bind(&row.rtmp_url)
        .bind(&row.quality)
        .bind(&row.orientation)
        .bind(&row.audio)
        .bind(&row.output_targets)
        .bind(&row.status)
        .bind(row.total_uptime_secs)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, id: &str, patch: &PipelineConfigPatch) -> Result<PipelineConfig> {
        let mut config = self.fetch_row(id).await?.into_config()?;
        config.apply(patch.clone());
        let row = PipelineDbModel::from_config(&config)?;

        sqlx::query(
            r#"
            UPDATE pipelines SET
                name = ?,
                source = ?,
                stream_key = ?,
                rtmp_url = ?,
                quality = ?,
                orientation = ?,
                audio = ?,
                output_targets = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&row.name)
        .bind(&row.source)
        .bind(&row.stream_key)
        .bind(&row.rtmp_url)
        .bind(&row.quality)
        .bind(&row.orientation)
        .bind(&row.audio)
        .bind(&row.output_targets)
        .bind(row.updated_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(config)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        ensure_affected(result.rows_affected(), id)
    }

    async fn list(&self) -> Result<Vec<StoredPipeline>> {
        let rows = sqlx::query_as::<_, PipelineDbModel>(
            "SELECT * FROM pipelines ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PipelineDbModel::into_stored).collect()
    }

    async fn update_status(&self, id: &str, status: PipelineState) -> Result<()> {
        let result = sqlx::query("UPDATE pipelines SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        ensure_affected(result.rows_affected(), id)
    }

    async fn add_uptime(&self, id: &str, secs: u64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipelines SET total_uptime_secs = total_uptime_secs + ? WHERE id = ?",
        )
        .bind(to_i64(secs))
        .bind(id)
        .execute(&self.pool)
        .await?;
        ensure_affected(result.rows_affected(), id)
    }

    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>> {
        let rows = sqlx::query_as::<_, PlatformDbModel>(
            "SELECT name, rtmp_url, max_bitrate_kbps, vertical, enabled \
             FROM platform_configs ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PlatformInfo::from).collect())
    }
}

#[async_trait]
impl TelemetryRepository for SqliteStore {
    async fn record_metrics(&self, pipeline_id: &str, sample: &MetricSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_metrics (
                pipeline_id, fps, bitrate_kbps, frame_drops, cpu_percent,
                memory_mb, bandwidth_mbps, elapsed_secs, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(pipeline_id)
        .bind(sample.fps)
        .bind(sample.bitrate_kbps)
        .bind(to_i64(sample.frame_drops))
        .bind(sample.cpu_percent)
        .bind(sample.memory_mb)
        .bind(sample.bandwidth_mbps)
        .bind(to_i64(sample.elapsed_secs))
        .bind(sample.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_health(&self, pipeline_id: &str, report: &HealthReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_health (
                pipeline_id, health_score, performance_score, connection_score,
                stability_score, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(pipeline_id)
        .bind(report.health)
        .bind(report.performance)
        .bind(report.connection)
        .bind(report.stability)
        .bind(report.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_alerts (
                pipeline_id, alert_type, severity, message, acknowledged, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.pipeline_id)
        .bind(&alert.alert_type)
        .bind(alert.severity.to_string())
        .bind(&alert.message)
        .bind(alert.acknowledged)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_recovery_attempt(&self, attempt: &RecoveryAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_recovery (
                id, pipeline_id, failure_type, strategy, retry_count, success,
                duration_secs, reason, started_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                retry_count = excluded.retry_count,
                success = excluded.success,
                duration_secs = excluded.duration_secs,
                reason = excluded.reason,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&attempt.id)
        .bind(&attempt.pipeline_id)
        .bind(attempt.failure_type.to_string())
        .bind(attempt.strategy.as_ref())
        .bind(i64::from(attempt.retry_count))
        .bind(attempt.success)
        .bind(attempt.duration_secs)
        .bind(&attempt.reason)
        .bind(attempt.started_at)
        .bind(attempt.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_event(&self, event: &PipelineEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO pipeline_events (pipeline_id, event_type, data, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&event.pipeline_id)
        .bind(event.kind.as_ref())
        .bind(serde_json::to_string(&event.data)?)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_metrics(&self, pipeline_id: &str, limit: usize) -> Result<Vec<MetricSample>> {
        let rows = sqlx::query_as::<_, MetricDbModel>(
            r#"
            SELECT fps, bitrate_kbps, frame_drops, cpu_percent, memory_mb,
                   bandwidth_mbps, elapsed_secs, timestamp
            FROM pipeline_metrics
            WHERE pipeline_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(pipeline_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MetricSample::from).collect())
    }

    async fn unacked_alerts(&self, pipeline_id: Option<&str>) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertDbModel>(
            r#"
            SELECT pipeline_id, alert_type, severity, message, acknowledged, created_at
            FROM pipeline_alerts
            WHERE acknowledged = 0 AND (? IS NULL OR pipeline_id = ?)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(pipeline_id)
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn acknowledge_alerts(&self, pipeline_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE pipeline_alerts SET acknowledged = 1 \
             WHERE pipeline_id = ? AND acknowledged = 0",
        )
        .bind(pipeline_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn recovery_attempts(&self, pipeline_id: &str) -> Result<Vec<RecoveryAttempt>> {
        let rows = sqlx::query_as::<_, RecoveryDbModel>(
            "SELECT * FROM pipeline_recovery WHERE pipeline_id = ? ORDER BY started_at, rowid",
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RecoveryAttempt::try_from).collect()
    }

    async fn recovery_stats(&self, pipeline_id: &str) -> Result<RecoveryStats> {
        type StatsRow = (i64, Option<i64>, Option<f64>, Option<f64>);
        let (total, successful, mean_duration, mean_retries): StatsRow =
            sqlx::query_as(
                r#"
                SELECT COUNT(*), SUM(success), AVG(duration_secs), AVG(retry_count)
                FROM pipeline_recovery
                WHERE pipeline_id = ? AND success IS NOT NULL
                "#,
            )
            .bind(pipeline_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(RecoveryStats {
            total: total.max(0) as u64,
            successful: successful.unwrap_or_default().max(0) as u64,
            mean_duration_secs: mean_duration.unwrap_or_default(),
            mean_retries: mean_retries.unwrap_or_default(),
        })
    }

    async fn events(&self, pipeline_id: &str, limit: usize) -> Result<Vec<PipelineEvent>> {
        let rows = sqlx::query_as::<_, EventDbModel>(
            r#"
            SELECT pipeline_id, event_type, data, created_at
            FROM pipeline_events
            WHERE pipeline_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(pipeline_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PipelineEvent::try_from).collect()
    }
}
