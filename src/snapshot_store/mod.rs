//! SnapshotStore - Cooldown-Gated Persistence of Classified Frames
//!
//! ## Responsibilities
//!
//! - Decide whether a classified frame is persisted (label + global cooldown)
//! - Attach the latest sensor reading to each record
//! - Gallery reads and deletes per kind
//!
//! ## Cooldown
//!
//! One clock for the whole store, shared by both kinds. It only advances on
//! a successful insert, so a failed write never blocks the next attempt.
//!
//! Without a configured repository the store runs in no-persist mode:
//! `maybe_persist` is always false and gallery listings are empty.

mod repository;
mod types;

pub use repository::{MySqlSnapshotRepository, SnapshotRepository};
pub use types::*;

use crate::error::{Error, Result};
use crate::image_codec;
use crate::models::{Label, SnapshotKind};
use crate::sensor_reader::SensorReader;
use chrono::Utc;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default cooldown between persisted snapshots
pub const DEFAULT_COOLDOWN_SECS: f64 = 10.0;

/// Last-persisted timestamp and the minimum spacing
#[derive(Debug)]
struct CooldownGate {
    cooldown: Duration,
    last_persisted_at: Option<Instant>,
}

impl CooldownGate {
    fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_persisted_at: None,
        }
    }

    fn is_open(&self, now: Instant) -> bool {
        match self.last_persisted_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
        }
    }

    fn record(&mut self, at: Instant) {
        self.last_persisted_at = Some(at);
    }
}

/// SnapshotStore instance
pub struct SnapshotStore {
    repository: Option<Arc<dyn SnapshotRepository>>,
    sensor_reader: Arc<SensorReader>,
    gate: Mutex<CooldownGate>,
    jpeg_quality: u8,
}

impl SnapshotStore {
    /// Create new SnapshotStore
    ///
    /// `repository` is None when no database was configured at startup.
    pub fn new(
        repository: Option<Arc<dyn SnapshotRepository>>,
        sensor_reader: Arc<SensorReader>,
        cooldown: Duration,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            repository,
            sensor_reader,
            gate: Mutex::new(CooldownGate::new(cooldown)),
            jpeg_quality,
        }
    }

    /// Whether a repository is configured
    pub fn is_configured(&self) -> bool {
        self.repository.is_some()
    }

    /// Persist the frame if the label has a kind and the cooldown has elapsed
    ///
    /// Returns true only when a record was written. Failures are logged and
    /// reported as false.
    pub async fn maybe_persist(
        &self,
        label: Label,
        confidence: f32,
        frame: &RgbImage,
        camera_index: Option<u32>,
    ) -> bool {
        let Some(kind) = label.kind() else {
            return false;
        };

        let Some(repository) = self.repository.as_ref() else {
            tracing::debug!(label = %label, "Snapshot storage not configured, not persisting");
            return false;
        };

        // Held through the insert so concurrent callers see one consistent clock
        let mut gate = self.gate.lock().await;
        if !gate.is_open(Instant::now()) {
            tracing::trace!(label = %label, "Snapshot cooldown active");
            return false;
        }

        let image_bytes = match image_codec::encode_jpeg(frame, self.jpeg_quality) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Could not encode frame as JPEG, snapshot not saved");
                return false;
            }
        };

        let sensor_at_capture = self.sensor_reader.read_latest().await;

        let persisted_at = Instant::now();
        let snapshot = NewSnapshot {
            kind,
            label,
            confidence,
            camera_index,
            created_at: Utc::now(),
            image_bytes,
            image_format: IMAGE_FORMAT_JPG.to_string(),
            sensor_at_capture,
        };

        match repository.insert(snapshot).await {
            Ok(id) => {
                gate.record(persisted_at);
                tracing::info!(
                    snapshot_id = %id,
                    kind = %kind,
                    label = %label,
                    confidence = confidence,
                    "Saved snapshot with sensor data"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    kind = %kind,
                    error = %e,
                    "Error saving snapshot, cooldown not advanced"
                );
                false
            }
        }
    }

    fn require_repository(&self) -> Result<&Arc<dyn SnapshotRepository>> {
        self.repository
            .as_ref()
            .ok_or_else(|| Error::StorageUnavailable("Snapshot storage not configured".to_string()))
    }

    /// Gallery list for a kind, newest first
    pub async fn list(&self, kind: SnapshotKind) -> Result<Vec<SnapshotSummary>> {
        match self.repository.as_ref() {
            Some(repository) => repository.list(kind).await,
            None => Ok(Vec::new()),
        }
    }

    /// One record including its image
    pub async fn get(&self, kind: SnapshotKind, id: &str) -> Result<SnapshotRecord> {
        let id = parse_snapshot_id(id)?;
        let repository = self.require_repository()?;

        repository
            .get(kind, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Snapshot {} not found", id)))
    }

    /// Image bytes for download, re-encoded when the requested format differs
    pub async fn render(
        &self,
        kind: SnapshotKind,
        id: &str,
        format: DownloadFormat,
    ) -> Result<Vec<u8>> {
        let record = self.get(kind, id).await?;

        if record.image_bytes.is_empty() {
            return Err(Error::Internal(format!("Image missing for snapshot {}", record.id)));
        }

        match format {
            DownloadFormat::Jpg | DownloadFormat::Jpeg if record.image_format == IMAGE_FORMAT_JPG => {
                Ok(record.image_bytes)
            }
            DownloadFormat::Jpg | DownloadFormat::Jpeg => {
                let frame = image_codec::decode_rgb(&record.image_bytes)?;
                image_codec::encode_jpeg(&frame, self.jpeg_quality)
            }
            DownloadFormat::Png => {
                let frame = image_codec::decode_rgb(&record.image_bytes)?;
                image_codec::encode_png(&frame)
            }
        }
    }

    /// Delete one record
    pub async fn delete(&self, kind: SnapshotKind, id: &str) -> Result<()> {
        let id = parse_snapshot_id(id)?;
        let repository = self.require_repository()?;

        if !repository.delete(kind, id).await? {
            return Err(Error::NotFound(format!("Snapshot {} not found", id)));
        }

        tracing::info!(snapshot_id = %id, kind = %kind, "Snapshot deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_frame, MemorySnapshotRepository};

    fn store_with(repo: Arc<MemorySnapshotRepository>, cooldown_secs: u64) -> SnapshotStore {
        SnapshotStore::new(
            Some(repo),
            Arc::new(SensorReader::new("/nonexistent/latest_sensor.json")),
            Duration::from_secs(cooldown_secs),
            80,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_wssv_persisted_with_kind() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 10);

        assert!(store.maybe_persist(Label::Wssv, 0.85, &sample_frame(), Some(0)).await);

        let records = repo.records(SnapshotKind::Wssv);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, SnapshotKind::Wssv);
        assert_eq!(records[0].label, "WSSV DETECTED");
        assert_eq!(records[0].camera_index, Some(0));
        assert_eq!(records[0].image_format, "jpg");
        assert!(records[0].sensor_at_capture.is_none());
        assert!(repo.records(SnapshotKind::Healthy).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_subject_never_persisted() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 0);

        assert!(!store.maybe_persist(Label::NoSubject, 0.5, &sample_frame(), None).await);
        assert_eq!(repo.insert_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_second_frame() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 10);

        assert!(store.maybe_persist(Label::Wssv, 0.9, &sample_frame(), None).await);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.maybe_persist(Label::Wssv, 0.9, &sample_frame(), None).await);

        assert_eq!(repo.records(SnapshotKind::Wssv).len(), 1);
        assert_eq!(repo.insert_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_shared_across_kinds() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 10);

        assert!(store.maybe_persist(Label::Wssv, 0.9, &sample_frame(), None).await);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!store.maybe_persist(Label::Healthy, 0.1, &sample_frame(), None).await);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.maybe_persist(Label::Healthy, 0.1, &sample_frame(), None).await);

        assert_eq!(repo.records(SnapshotKind::Wssv).len(), 1);
        assert_eq!(repo.records(SnapshotKind::Healthy).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_insert_does_not_advance_cooldown() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 10);

        assert!(store.maybe_persist(Label::Wssv, 0.9, &sample_frame(), None).await);

        // Failure after the window: the clock stays at the last success
        tokio::time::advance(Duration::from_secs(11)).await;
        repo.set_failing(true);
        assert!(!store.maybe_persist(Label::Wssv, 0.9, &sample_frame(), None).await);

        // Still measured from the success at t=0, so the retry is allowed
        tokio::time::advance(Duration::from_secs(1)).await;
        repo.set_failing(false);
        assert!(store.maybe_persist(Label::Wssv, 0.9, &sample_frame(), None).await);

        assert_eq!(repo.records(SnapshotKind::Wssv).len(), 2);
        assert_eq!(repo.insert_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_insert_inside_window_still_gated() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 10);

        assert!(store.maybe_persist(Label::Healthy, 0.2, &sample_frame(), None).await);
        repo.set_failing(true);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!store.maybe_persist(Label::Healthy, 0.2, &sample_frame(), None).await);
        assert_eq!(repo.insert_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisted_records_spaced_by_cooldown() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 10);
        let labels = [Label::Wssv, Label::Healthy];

        let mut persisted_at = Vec::new();
        for step in 0..60u64 {
            let label = labels[(step % 2) as usize];
            if store.maybe_persist(label, 0.9, &sample_frame(), None).await {
                persisted_at.push(step);
            }
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(persisted_at, vec![0, 10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn test_unconfigured_store() {
        let store = SnapshotStore::new(
            None,
            Arc::new(SensorReader::new("/nonexistent/latest_sensor.json")),
            Duration::from_secs(0),
            80,
        );

        assert!(!store.is_configured());
        assert!(!store.maybe_persist(Label::Wssv, 0.95, &sample_frame(), None).await);
        assert!(store.list(SnapshotKind::Wssv).await.unwrap().is_empty());
        assert!(matches!(
            store.delete(SnapshotKind::Wssv, &uuid::Uuid::new_v4().to_string()).await,
            Err(Error::StorageUnavailable(_))
        ));

        // A malformed id is rejected before storage is consulted
        assert!(matches!(
            store.get(SnapshotKind::Wssv, "not-an-id").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.delete(SnapshotKind::Healthy, "not-an-id").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_then_list() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 0);

        assert!(store.maybe_persist(Label::Healthy, 0.1, &sample_frame(), None).await);
        assert!(store.maybe_persist(Label::Healthy, 0.2, &sample_frame(), None).await);

        let listed = store.list(SnapshotKind::Healthy).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);

        let id = listed[0].id.to_string();
        store.delete(SnapshotKind::Healthy, &id).await.unwrap();

        let listed = store.list(SnapshotKind::Healthy).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.iter().all(|s| s.id.to_string() != id));

        assert!(matches!(
            store.delete(SnapshotKind::Healthy, &id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_gallery_validation() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo, 0);

        assert!(matches!(
            store.get(SnapshotKind::Wssv, "not-an-id").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.get(SnapshotKind::Wssv, &uuid::Uuid::new_v4().to_string()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_render_formats() {
        let repo = Arc::new(MemorySnapshotRepository::new());
        let store = store_with(repo.clone(), 0);

        assert!(store.maybe_persist(Label::Wssv, 0.8, &sample_frame(), None).await);
        let id = repo.records(SnapshotKind::Wssv)[0].id.to_string();

        let jpg = store.render(SnapshotKind::Wssv, &id, DownloadFormat::Jpg).await.unwrap();
        assert_eq!(&jpg[..2], &[0xFF, 0xD8]);

        let png = store.render(SnapshotKind::Wssv, &id, DownloadFormat::Png).await.unwrap();
        assert_eq!(&png[..4], b"\x89PNG");

        // Records are kind-scoped
        assert!(matches!(
            store.render(SnapshotKind::Healthy, &id, DownloadFormat::Jpg).await,
            Err(Error::NotFound(_))
        ));
    }
}
