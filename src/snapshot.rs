//! Retained processed-frame snapshots.
//!
//! Every frame that produced a non-empty result is re-encoded to JPEG and
//! appended here together with an ISO-8601 timestamp. The buffer keeps the
//! most recent `capacity` entries, evicting oldest-first, and is appended to
//! only by the single pipeline worker. Readers take a cloned snapshot.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, PixelWithColorType};

/// One retained processed frame.
#[derive(Clone, Debug)]
pub struct ProcessedSnapshot {
    /// Re-encoded (possibly annotated) JPEG bytes.
    pub jpeg: Vec<u8>,
    /// ISO-8601 timestamp taken when the frame finished processing.
    pub timestamp: String,
}

/// Bounded ordered sequence of the most recent processed snapshots.
pub struct ResultBuffer {
    entries: VecDeque<ProcessedSnapshot>,
    capacity: usize,
}

impl ResultBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, evicting at the head once past capacity.
    pub fn push(&mut self, snapshot: ProcessedSnapshot) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest-first copy of the retained snapshots.
    pub fn to_vec(&self) -> Vec<ProcessedSnapshot> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessedSnapshot> {
        self.entries.iter()
    }
}

/// Encode an image buffer as JPEG at the default quality.
pub fn encode_jpeg<I>(image: &I) -> Result<Vec<u8>>
where
    I: GenericImageView,
    I::Pixel: PixelWithColorType,
{
    let mut bytes = Vec::new();
    JpegEncoder::new(&mut bytes)
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tag: usize) -> ProcessedSnapshot {
        ProcessedSnapshot {
            jpeg: vec![0xFF, 0xD8, tag as u8],
            timestamp: format!("2026-01-01T00:00:{:02}+00:00", tag % 60),
        }
    }

    #[test]
    fn buffer_never_exceeds_capacity() {
        let mut buffer = ResultBuffer::new(50);
        for i in 0..60 {
            buffer.push(snapshot(i));
        }
        assert_eq!(buffer.len(), 50);
    }

    #[test]
    fn eviction_is_oldest_first() {
        let mut buffer = ResultBuffer::new(3);
        for i in 0..5 {
            buffer.push(snapshot(i));
        }
        let kept: Vec<u8> = buffer.iter().map(|s| s.jpeg[2]).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn encodes_gray_and_rgb() {
        let gray = image::GrayImage::from_pixel(8, 8, image::Luma([127u8]));
        let rgb = image::RgbImage::from_pixel(8, 8, image::Rgb([10u8, 20, 30]));
        let gray_bytes = encode_jpeg(&gray).unwrap();
        let rgb_bytes = encode_jpeg(&rgb).unwrap();
        // SOI marker opens both encodings.
        assert_eq!(&gray_bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&rgb_bytes[..2], &[0xFF, 0xD8]);
        assert!(image::load_from_memory(&rgb_bytes).is_ok());
    }
}
