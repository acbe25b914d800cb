//! Snapshot Repository - Database operations

use super::types::*;
use crate::error::{Error, Result};
use crate::models::SnapshotKind;
use crate::sensor_reader::SensorSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;
use uuid::Uuid;

/// Document-store operations the snapshot store relies on
///
/// Inserts are append-only; records change only by deletion.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert a record, returning its new id
    async fn insert(&self, snapshot: NewSnapshot) -> Result<Uuid>;

    /// All records of a kind, newest first, without image bytes
    async fn list(&self, kind: SnapshotKind) -> Result<Vec<SnapshotSummary>>;

    /// One record including its image
    async fn get(&self, kind: SnapshotKind, id: Uuid) -> Result<Option<SnapshotRecord>>;

    /// Delete one record; false if it did not exist
    async fn delete(&self, kind: SnapshotKind, id: Uuid) -> Result<bool>;
}

/// Database row for {wssv,healthy}_snaps
#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    pub id: String,
    pub label: String,
    pub confidence: f64,
    pub camera_index: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub image_bytes: Vec<u8>,
    pub image_format: String,
    pub sensor_at_capture: Option<String>,
}

/// Database row for gallery listing (no image column)
#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    pub id: String,
    pub label: String,
    pub confidence: f64,
    pub camera_index: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub sensor_at_capture: Option<String>,
}

fn parse_row_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|e| Error::Database(format!("Corrupt snapshot id {}: {}", id, e)))
}

fn parse_sensor(raw: Option<String>) -> Option<SensorSnapshot> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(sensor) => Some(sensor),
        Err(e) => {
            tracing::warn!(error = %e, "Stored sensor_at_capture is not valid JSON");
            None
        }
    }
}

/// MySQL-backed repository, one table per kind
pub struct MySqlSnapshotRepository {
    pool: MySqlPool,
}

impl MySqlSnapshotRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create the per-kind tables if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        for kind in SnapshotKind::ALL {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id CHAR(36) NOT NULL PRIMARY KEY,
                    kind VARCHAR(16) NOT NULL,
                    label VARCHAR(32) NOT NULL,
                    confidence DOUBLE NOT NULL,
                    camera_index INT NULL,
                    created_at DATETIME(6) NOT NULL,
                    image_bytes LONGBLOB NOT NULL,
                    image_format VARCHAR(8) NOT NULL,
                    sensor_at_capture TEXT NULL,
                    INDEX idx_created_at (created_at)
                )
                "#,
                kind.table()
            );

            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
        }

        tracing::info!("Snapshot tables ready");
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for MySqlSnapshotRepository {
    async fn insert(&self, snapshot: NewSnapshot) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let sensor_json = snapshot
            .sensor_at_capture
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let sql = format!(
            r#"
            INSERT INTO {} (
                id, kind, label, confidence, camera_index,
                created_at, image_bytes, image_format, sensor_at_capture
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            snapshot.kind.table()
        );

        sqlx::query(&sql)
            .bind(id.to_string())
            .bind(snapshot.kind.as_str())
            .bind(snapshot.label.as_str())
            .bind(f64::from(snapshot.confidence))
            .bind(snapshot.camera_index.and_then(|i| i32::try_from(i).ok()))
            .bind(snapshot.created_at)
            .bind(snapshot.image_bytes)
            .bind(snapshot.image_format)
            .bind(sensor_json)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(id)
    }

    async fn list(&self, kind: SnapshotKind) -> Result<Vec<SnapshotSummary>> {
        let sql = format!(
            r#"
            SELECT id, label, confidence, camera_index, created_at, sensor_at_capture
            FROM {}
            ORDER BY created_at DESC
            "#,
            kind.table()
        );

        let rows: Vec<SummaryRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        rows.into_iter()
            .map(|r| {
                Ok(SnapshotSummary {
                    id: parse_row_id(&r.id)?,
                    label: r.label,
                    confidence: r.confidence,
                    camera_index: r.camera_index,
                    created_at: r.created_at,
                    sensor_at_capture: parse_sensor(r.sensor_at_capture),
                })
            })
            .collect()
    }

    async fn get(&self, kind: SnapshotKind, id: Uuid) -> Result<Option<SnapshotRecord>> {
        let sql = format!(
            r#"
            SELECT id, label, confidence, camera_index, created_at,
                   image_bytes, image_format, sensor_at_capture
            FROM {}
            WHERE id = ?
            "#,
            kind.table()
        );

        let row: Option<SnapshotRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.map(|r| {
            Ok(SnapshotRecord {
                id: parse_row_id(&r.id)?,
                kind,
                label: r.label,
                confidence: r.confidence,
                camera_index: r.camera_index,
                created_at: r.created_at,
                image_bytes: r.image_bytes,
                image_format: r.image_format,
                sensor_at_capture: parse_sensor(r.sensor_at_capture),
            })
        })
        .transpose()
    }

    async fn delete(&self, kind: SnapshotKind, id: Uuid) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", kind.table());

        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
