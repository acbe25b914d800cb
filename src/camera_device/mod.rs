//! CameraDevice - Local Camera Frame Acquisition
//!
//! ## Responsibilities
//!
//! - Open a camera by index (ffmpeg reading the V4L2 device as MJPEG)
//! - Blocking-style frame reads with open/read timeouts
//! - Idempotent release of the device
//! - Probe which device indices exist
//!
//! The capture loop only sees [`FrameSource`]; the monitoring controller only
//! sees [`CameraOpener`].

mod mjpeg;

pub use mjpeg::JpegFrameSplitter;

use crate::error::{Error, Result};
use crate::image_codec;
use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::{timeout, timeout_at, Instant};

/// Read buffer size for the ffmpeg pipe
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Upper bound on chunks pulled per non-blocking drain
const MAX_DRAIN_CHUNKS: usize = 8;

/// How long release waits for ffmpeg to exit after the kill
const RELEASE_WAIT: Duration = Duration::from_secs(2);

/// An open camera
#[async_trait]
pub trait FrameSource: Send {
    /// Block until the next frame; any error means the device is gone
    async fn read_frame(&mut self) -> Result<RgbImage>;

    /// Release the device. Safe to call more than once.
    async fn release(&mut self);
}

/// Opens cameras by index
#[async_trait]
pub trait CameraOpener: Send + Sync {
    async fn open(&self, index: u32) -> Result<Box<dyn FrameSource>>;

    /// Indices that look available
    async fn probe(&self) -> Vec<u32>;
}

/// ffmpeg camera configuration
#[derive(Debug, Clone)]
pub struct FfmpegCameraConfig {
    /// ffmpeg input format (`-f`), e.g. v4l2
    pub input_format: String,
    /// Device path template, `{index}` is substituted
    pub input_template: String,
    /// Time allowed for the first frame
    pub open_timeout: Duration,
    /// Time allowed for each later frame
    pub read_timeout: Duration,
    /// Indices checked by `probe`
    pub probe_max: u32,
}

impl Default for FfmpegCameraConfig {
    fn default() -> Self {
        Self {
            input_format: "v4l2".to_string(),
            input_template: "/dev/video{index}".to_string(),
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            probe_max: 5,
        }
    }
}

impl FfmpegCameraConfig {
    pub fn device_path(&self, index: u32) -> String {
        self.input_template.replace("{index}", &index.to_string())
    }

    /// Whether the device path can be checked on the filesystem
    fn is_filesystem_path(&self) -> bool {
        self.input_template.starts_with('/')
    }
}

/// Opens cameras through an ffmpeg subprocess
pub struct FfmpegCameraOpener {
    config: FfmpegCameraConfig,
}

impl FfmpegCameraOpener {
    pub fn new(config: FfmpegCameraConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CameraOpener for FfmpegCameraOpener {
    async fn open(&self, index: u32) -> Result<Box<dyn FrameSource>> {
        let camera = FfmpegCamera::open(index, &self.config).await?;
        Ok(Box::new(camera))
    }

    async fn probe(&self) -> Vec<u32> {
        if !self.config.is_filesystem_path() {
            return (0..self.config.probe_max).collect();
        }

        let mut available = Vec::new();
        for index in 0..self.config.probe_max {
            let path = self.config.device_path(index);
            if tokio::fs::metadata(&path).await.is_ok() {
                available.push(index);
            }
        }
        available
    }
}

/// Camera backed by a running ffmpeg process
pub struct FfmpegCamera {
    index: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    splitter: JpegFrameSplitter,
    chunk: Vec<u8>,
    /// First frame, read while opening
    pending: Option<RgbImage>,
    read_timeout: Duration,
}

impl FfmpegCamera {
    /// Spawn ffmpeg on the device and wait for the first frame
    ///
    /// Uses kill_on_drop(true) so a dropped camera never leaves ffmpeg
    /// holding the device.
    pub async fn open(index: u32, config: &FfmpegCameraConfig) -> Result<Self> {
        let device = config.device_path(index);

        if config.is_filesystem_path() && !Path::new(&device).exists() {
            return Err(Error::DeviceUnavailable(format!(
                "Camera {} not found at {}",
                index, device
            )));
        }

        // -an: no audio
        // -f image2pipe -vcodec mjpeg: concatenated JPEGs on stdout
        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel", "error",
                "-f", config.input_format.as_str(),
                "-i", device.as_str(),
                "-an",
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-q:v", "5",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::DeviceUnavailable(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::DeviceUnavailable("ffmpeg stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(index, stderr));
        }

        let mut camera = Self {
            index,
            child: Some(child),
            stdout: Some(stdout),
            splitter: JpegFrameSplitter::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES],
            pending: None,
            read_timeout: config.read_timeout,
        };

        match camera.next_frame(config.open_timeout).await {
            Ok(frame) => {
                tracing::info!(
                    camera_index = index,
                    device = %device,
                    width = frame.width(),
                    height = frame.height(),
                    "Camera opened"
                );
                camera.pending = Some(frame);
                Ok(camera)
            }
            Err(e) => {
                camera.release().await;
                Err(Error::DeviceUnavailable(format!(
                    "Unable to open camera {}: {}",
                    index, e
                )))
            }
        }
    }

    /// Pull whatever the pipe already holds without waiting
    async fn drain_ready(&mut self) {
        let Some(stdout) = self.stdout.as_mut() else {
            return;
        };

        for _ in 0..MAX_DRAIN_CHUNKS {
            // Timeout polls the read once before checking the zero deadline
            match timeout(Duration::ZERO, stdout.read(&mut self.chunk)).await {
                Ok(Ok(n)) if n > 0 => self.splitter.push(&self.chunk[..n]),
                _ => break,
            }
        }
    }

    /// Newest decodable frame, reading until the deadline passes
    ///
    /// Older complete frames already buffered are dropped so a slow consumer
    /// always gets the most recent capture.
    async fn next_frame(&mut self, limit: Duration) -> Result<RgbImage> {
        let deadline = Instant::now() + limit;

        loop {
            self.drain_ready().await;

            if let Some(jpeg) = self.splitter.latest_frame() {
                match image_codec::decode_rgb(&jpeg) {
                    Ok(frame) => return Ok(frame),
                    Err(e) => {
                        tracing::debug!(
                            camera_index = self.index,
                            size = jpeg.len(),
                            error = %e,
                            "Skipping undecodable frame"
                        );
                    }
                }
            }

            let stdout = self
                .stdout
                .as_mut()
                .ok_or_else(|| Error::DeviceUnavailable("Camera released".to_string()))?;

            let n = match timeout_at(deadline, stdout.read(&mut self.chunk)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    return Err(Error::DeviceUnavailable(format!("Camera read failed: {}", e)))
                }
                Err(_) => {
                    return Err(Error::DeviceUnavailable(format!(
                        "No frame within {}ms",
                        limit.as_millis()
                    )))
                }
            };

            if n == 0 {
                return Err(Error::DeviceUnavailable("Camera stream ended".to_string()));
            }

            self.splitter.push(&self.chunk[..n]);
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegCamera {
    async fn read_frame(&mut self) -> Result<RgbImage> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.next_frame(self.read_timeout).await
    }

    async fn release(&mut self) {
        self.stdout = None;
        self.pending = None;

        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Err(e) = child.start_kill() {
            tracing::debug!(camera_index = self.index, error = %e, "ffmpeg already exited");
        }

        match timeout(RELEASE_WAIT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(camera_index = self.index, status = %status, "Camera released");
            }
            Ok(Err(e)) => {
                tracing::warn!(camera_index = self.index, error = %e, "Failed to reap ffmpeg");
            }
            Err(_) => {
                tracing::warn!(
                    camera_index = self.index,
                    "ffmpeg did not exit after kill, left to kill_on_drop"
                );
            }
        }
    }
}

/// Forward ffmpeg stderr lines to the log
async fn forward_stderr(index: u32, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(camera_index = index, "ffmpeg: {}", line);
    }
}
