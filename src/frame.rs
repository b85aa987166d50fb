//! Decoded frames in flight between extraction and dispatch.

use image::RgbImage;

use crate::AnalysisKind;

/// One fully reassembled, decoded frame plus the analysis tag that was
/// active when it was extracted.
///
/// Frames are ephemeral: they exist only between demuxing and dispatch.
/// A `None` kind means the stream declared a tag no handler matches; the
/// frame still travels the queue and dispatch yields an empty result.
#[derive(Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub kind: Option<AnalysisKind>,
}

impl Frame {
    pub fn new(image: RgbImage, kind: Option<AnalysisKind>) -> Self {
        Self { image, kind }
    }
}
