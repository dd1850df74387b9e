//! Binary image payloads for multimodal completions.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// One image attached to a vision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// MIME type used in the data URL (e.g. `image/png`).
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            bytes,
        }
    }

    /// Read an image from disk, inferring its media type from the extension.
    ///
    /// I/O errors are returned as-is so callers can tell a missing file apart.
    pub async fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(media_type_for(path), bytes))
    }

    /// `data:<media-type>;base64,<payload>` form accepted by `image_url` parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.bytes))
    }
}

/// Unknown extensions fall back to JPEG, which is what upload clients send.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
