//! MJPEG byte-stream splitter
//!
//! ffmpeg's image2pipe output is a plain concatenation of JPEG images.
//! Frames are cut on the SOI (FFD8) and EOI (FFD9) markers.

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on buffered bytes without a complete frame
const MAX_BUFFERED_BYTES: usize = 16 * 1024 * 1024;

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + 2 {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Incremental JPEG frame splitter
#[derive(Debug, Default)]
pub struct JpegFrameSplitter {
    buf: Vec<u8>,
}

impl JpegFrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);

        if self.buf.len() > MAX_BUFFERED_BYTES {
            tracing::warn!(
                buffered = self.buf.len(),
                "No complete JPEG frame in buffered stream data, discarding"
            );
            self.buf.clear();
        }
    }

    /// Next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find(&self.buf, &SOI, 0) else {
            // Keep a trailing 0xFF, it may be the first half of the next SOI
            let keep_last = self.buf.last() == Some(&0xFF);
            self.buf.clear();
            if keep_last {
                self.buf.push(0xFF);
            }
            return None;
        };

        if start > 0 {
            self.buf.drain(..start);
        }

        let end = find(&self.buf, &EOI, 2)? + 2;
        let frame: Vec<u8> = self.buf.drain(..end).collect();
        Some(frame)
    }

    /// Newest complete frame, discarding older complete ones
    pub fn latest_frame(&mut self) -> Option<Vec<u8>> {
        let mut latest = self.next_frame()?;
        let mut skipped = 0usize;
        while let Some(frame) = self.next_frame() {
            latest = frame;
            skipped += 1;
        }
        if skipped > 0 {
            tracing::trace!(skipped = skipped, "Dropped stale buffered frames");
        }
        Some(latest)
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
