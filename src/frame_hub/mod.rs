//! FrameHub - Live Frame Distribution
//!
//! ## Responsibilities
//!
//! - Subscriber management for the MJPEG stream
//! - Fan-out of encoded frames from the capture loop
//! - End every stream when the session closes
//!
//! Each subscriber gets a small bounded queue. A subscriber that falls behind
//! is dropped; it never slows the capture loop. One hub exists per
//! monitoring session, so a stream never outlives the session it joined.

use axum::body::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default per-subscriber queue length
pub const DEFAULT_BUFFER_FRAMES: usize = 4;

/// multipart/x-mixed-replace boundary
pub const BOUNDARY: &str = "frame";

/// Frame one part of the MJPEG response
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

#[derive(Default)]
struct HubInner {
    subscribers: HashMap<Uuid, mpsc::Sender<Bytes>>,
    closed: bool,
}

/// FrameHub instance
pub struct FrameHub {
    inner: Mutex<HubInner>,
    buffer_frames: usize,
}

impl FrameHub {
    /// Create new FrameHub
    pub fn new(buffer_frames: usize) -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
            buffer_frames: buffer_frames.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a subscriber; None once the hub is closed
    ///
    /// The receiver yields JPEG frames and ends when the hub closes.
    pub fn subscribe(&self) -> Option<(Uuid, mpsc::Receiver<Bytes>)> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer_frames);
        inner.subscribers.insert(id, tx);

        tracing::info!(subscriber_id = %id, subscribers = inner.subscribers.len(), "Stream subscriber connected");
        Some((id, rx))
    }

    /// Offer a frame to every subscriber without waiting
    ///
    /// Subscribers whose queue is full or whose receiver is gone are removed,
    /// which ends their stream.
    pub fn publish(&self, jpeg: Bytes) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }

        inner.subscribers.retain(|id, tx| match tx.try_send(jpeg.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscriber_id = %id, "Stream subscriber too slow, dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::info!(subscriber_id = %id, "Stream subscriber disconnected");
                false
            }
        });
    }

    /// Close the hub; all subscriber streams end after draining
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let dropped = inner.subscribers.len();
        inner.subscribers.clear();

        tracing::debug!(subscribers = dropped, "Frame hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Get subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
