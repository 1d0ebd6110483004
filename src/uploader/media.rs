use std::path::Path;

use bytes::Bytes;

#[derive(Clone, Debug)]
pub struct ExtractedThumbnail {
    pub data: Bytes,
}

#[derive(Clone, Debug)]
pub struct ExtractedSubtitle {
    pub data: Bytes,
    pub language: String,
    pub is_forced: bool,
}

/// Seam for the video tooling that lives outside the engine.
///
/// The prepare worker consults the probe only for paths whose extension is
/// in the config's recognized video set; whatever comes back is encrypted
/// and attached ahead of the file's own chunks.
pub trait MediaProbe: Send + Sync {
    fn extract_thumbnail(&self, _path: &Path) -> Option<ExtractedThumbnail> {
        None
    }

    fn extract_subtitles(&self, _path: &Path) -> Vec<ExtractedSubtitle> {
        Vec::new()
    }
}

/// Default probe: no thumbnails, no subtitles.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMediaProbe;

impl MediaProbe for NoMediaProbe {}
