//! Incremental JPEG frame extraction from a tagged chunk stream.
//!
//! Chunks arrive in order on one stream and carry an analysis tag; the tag
//! applies to every frame extracted after it until the stream declares a new
//! one. Bytes are appended to a retained accumulator and scanned repeatedly
//! for an SOI marker (`FF D8`) followed by an EOI marker (`FF D9`); each
//! well-bounded range is decoded and yielded as one [`Frame`]. Frames may
//! span any number of chunks, so an incomplete trailing fragment stays in
//! the accumulator for the next call.
//!
//! A frame that fails to decode is dropped with a warning and extraction
//! continues. Input that never produces a frame boundary cannot grow the
//! accumulator forever: crossing `max_pending_bytes` fails the stream.

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::AnalysisKind;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Default ceiling on bytes buffered while waiting for a frame boundary.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

/// Reassembles discrete JPEG frames from one connection's chunk stream.
pub struct FrameDemuxer {
    pending: Vec<u8>,
    kind: Option<AnalysisKind>,
    max_pending_bytes: usize,
    frames_extracted: u64,
    frames_dropped: u64,
}

impl FrameDemuxer {
    pub fn new(max_pending_bytes: usize) -> Self {
        Self {
            pending: Vec::with_capacity(64 * 1024),
            kind: None,
            max_pending_bytes,
            frames_extracted: 0,
            frames_dropped: 0,
        }
    }

    /// Consume one chunk and return every frame it completed.
    ///
    /// `kind` is the chunk's parsed tag; it replaces the active tag for this
    /// and all later frames until a subsequent chunk changes it again.
    pub fn ingest(&mut self, data: &[u8], kind: Option<AnalysisKind>) -> Result<Vec<Frame>> {
        self.kind = kind;
        self.pending.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            // Everything before the first SOI is inter-frame garbage.
            let Some(start) = find_marker(&self.pending, &SOI) else {
                self.discard_garbage();
                break;
            };
            if start > 0 {
                self.pending.drain(..start);
            }

            let Some(end) = find_marker(&self.pending[SOI.len()..], &EOI) else {
                break;
            };
            let frame_len = SOI.len() + end + EOI.len();
            let encoded: Vec<u8> = self.pending.drain(..frame_len).collect();

            match image::load_from_memory(&encoded) {
                Ok(decoded) => {
                    self.frames_extracted += 1;
                    frames.push(Frame::new(decoded.into_rgb8(), self.kind));
                }
                Err(err) => {
                    self.frames_dropped += 1;
                    log::warn!(
                        "dropping undecodable frame ({} bytes): {}",
                        encoded.len(),
                        err
                    );
                }
            }
        }

        if self.pending.len() > self.max_pending_bytes {
            return Err(anyhow!(
                "frame accumulator exceeded {} bytes without a frame boundary",
                self.max_pending_bytes
            ));
        }
        Ok(frames)
    }

    /// Bytes currently buffered while waiting for a frame boundary.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Total frames decoded so far on this stream.
    pub fn frames_extracted(&self) -> u64 {
        self.frames_extracted
    }

    /// Total well-bounded ranges that failed to decode.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    // No SOI anywhere in the accumulator. Only a trailing 0xFF could be the
    // first half of a marker split across chunks; nothing else can matter.
    fn discard_garbage(&mut self) {
        if self.pending.last() == Some(&0xFF) {
            let keep_from = self.pending.len() - 1;
            self.pending.drain(..keep_from);
        } else {
            self.pending.clear();
        }
    }
}

impl Default for FrameDemuxer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_BYTES)
    }
}

fn find_marker(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(2).position(|window| window == marker)
}
