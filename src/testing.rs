//! Test doubles shared by unit tests

use crate::camera_device::{CameraOpener, FrameSource};
use crate::classifier::{InferenceEngine, ModelInput};
use crate::error::{Error, Result};
use crate::models::SnapshotKind;
use crate::snapshot_store::{NewSnapshot, SnapshotRecord, SnapshotRepository, SnapshotSummary};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Small frame with some structure so JPEG encoding is realistic
pub fn sample_frame() -> RgbImage {
    RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 90]))
}

/// Inference engine returning scripted scores, cycling
pub struct FixedEngine {
    scores: Vec<f32>,
    next: AtomicUsize,
}

impl FixedEngine {
    pub fn new(scores: Vec<f32>) -> Self {
        Self {
            scores,
            next: AtomicUsize::new(0),
        }
    }

    /// Engine whose every call fails
    pub fn failing() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl InferenceEngine for FixedEngine {
    async fn infer(&self, _input: &ModelInput) -> Result<f32> {
        if self.scores.is_empty() {
            return Err(Error::Inference("engine offline".to_string()));
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(self.scores[i % self.scores.len()])
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.scores.is_empty())
    }
}

/// In-memory snapshot repository
#[derive(Default)]
pub struct MemorySnapshotRepository {
    records: Mutex<Vec<SnapshotRecord>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of a kind, in insertion order
    pub fn records(&self, kind: SnapshotKind) -> Vec<SnapshotRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn insert_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotRepository for MemorySnapshotRepository {
    async fn insert(&self, snapshot: NewSnapshot) -> Result<Uuid> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Database("connection refused".to_string()));
        }

        let id = Uuid::new_v4();
        self.records.lock().unwrap().push(SnapshotRecord {
            id,
            kind: snapshot.kind,
            label: snapshot.label.as_str().to_string(),
            confidence: f64::from(snapshot.confidence),
            camera_index: snapshot.camera_index.map(|i| i as i32),
            created_at: snapshot.created_at,
            image_bytes: snapshot.image_bytes,
            image_format: snapshot.image_format,
            sensor_at_capture: snapshot.sensor_at_capture,
        });
        Ok(id)
    }

    async fn list(&self, kind: SnapshotKind) -> Result<Vec<SnapshotSummary>> {
        let mut items: Vec<SnapshotSummary> = self
            .records(kind)
            .into_iter()
            .map(|r| SnapshotSummary {
                id: r.id,
                label: r.label,
                confidence: r.confidence,
                camera_index: r.camera_index,
                created_at: r.created_at,
                sensor_at_capture: r.sensor_at_capture,
            })
            .collect();
        // Newest first; equal timestamps keep the later insert first
        items.reverse();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn get(&self, kind: SnapshotKind, id: Uuid) -> Result<Option<SnapshotRecord>> {
        Ok(self.records(kind).into_iter().find(|r| r.id == id))
    }

    async fn delete(&self, kind: SnapshotKind, id: Uuid) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| !(r.kind == kind && r.id == id));
        Ok(records.len() != before)
    }
}

/// Counters observed by tests
#[derive(Default)]
pub struct CameraProbe {
    reads: AtomicUsize,
    releases: AtomicUsize,
}

impl CameraProbe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Camera yielding `sample_frame` a few ms apart
pub struct ScriptedCamera {
    /// None: never fails
    frames_left: Option<usize>,
    released: bool,
    probe: Arc<CameraProbe>,
}

impl ScriptedCamera {
    /// Yields `frames` frames, then every read fails
    pub fn failing_after(frames: usize) -> (Self, Arc<CameraProbe>) {
        Self::build(Some(frames))
    }

    pub fn endless() -> (Self, Arc<CameraProbe>) {
        Self::build(None)
    }

    fn build(frames_left: Option<usize>) -> (Self, Arc<CameraProbe>) {
        let probe = Arc::new(CameraProbe::default());
        let camera = Self {
            frames_left,
            released: false,
            probe: probe.clone(),
        };
        (camera, probe)
    }
}

#[async_trait]
impl FrameSource for ScriptedCamera {
    async fn read_frame(&mut self) -> Result<RgbImage> {
        if self.released {
            return Err(Error::DeviceUnavailable("released".to_string()));
        }

        match self.frames_left.as_mut() {
            Some(0) => return Err(Error::DeviceUnavailable("camera unplugged".to_string())),
            Some(n) => *n -= 1,
            None => {}
        }

        tokio::time::sleep(Duration::from_millis(2)).await;
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        Ok(sample_frame())
    }

    async fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Opener handing out scripted cameras
pub struct FakeOpener {
    frames: Option<usize>,
    fail: HashSet<u32>,
    opens: AtomicUsize,
    max_open: AtomicUsize,
    probes: Mutex<Vec<Arc<CameraProbe>>>,
}

impl FakeOpener {
    pub fn endless() -> Self {
        Self::build(None)
    }

    /// Every opened camera fails after `frames` frames
    pub fn failing_after(frames: usize) -> Self {
        Self::build(Some(frames))
    }

    fn build(frames: Option<usize>) -> Self {
        Self {
            frames,
            fail: HashSet::new(),
            opens: AtomicUsize::new(0),
            max_open: AtomicUsize::new(0),
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Opening this index fails
    pub fn fail_index(mut self, index: u32) -> Self {
        self.fail.insert(index);
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Releases across every camera opened so far
    pub fn releases(&self) -> usize {
        self.probes.lock().unwrap().iter().map(|p| p.releases()).sum()
    }

    /// Highest number of cameras held open at the same moment
    pub fn max_open_at_once(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraOpener for FakeOpener {
    async fn open(&self, index: u32) -> Result<Box<dyn FrameSource>> {
        if self.fail.contains(&index) {
            return Err(Error::DeviceUnavailable(format!("Camera {} not found", index)));
        }

        let (camera, probe) = ScriptedCamera::build(self.frames);
        let live = {
            let mut probes = self.probes.lock().unwrap();
            let released: usize = probes.iter().map(|p| p.releases()).sum();
            let live = probes.len() + 1 - released;
            probes.push(probe);
            live
        };
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.max_open.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(camera))
    }

    async fn probe(&self) -> Vec<u32> {
        (0..3).filter(|i| !self.fail.contains(i)).collect()
    }
}
