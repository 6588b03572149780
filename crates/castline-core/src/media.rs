//! Media references handed to provider adapters.

use serde::{Deserialize, Serialize};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "m4v", "avi", "mkv"];

/// Coarse media kind, derived from the file extension of the stored reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    pub fn classify(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or(path);
        let Some((_, ext)) = file.rsplit_once('.') else {
            return MediaKind::Other;
        };
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }
}

/// A server-local media reference, optionally resolved to a public URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Stored path, e.g. `/media/3f2a/clip.mp4`.
    pub path: String,
    /// Public URL for providers that fetch media themselves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn new(path: impl Into<String>, url: Option<String>) -> Self {
        let path = path.into();
        let kind = MediaKind::classify(&path);
        Self { path, url, kind }
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::Image
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}
