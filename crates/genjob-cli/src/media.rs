//! Local media inputs, inlined as `data:` URIs.

use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
}

impl MediaKind {
    fn label(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
        }
    }

    /// MIME type by file extension, with a per-kind default.
    pub fn mime_type(&self, path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match (self, ext.as_str()) {
            (MediaKind::Audio, "wav") => "audio/wav",
            (MediaKind::Audio, "m4a") => "audio/mp4",
            (MediaKind::Audio, "ogg") => "audio/ogg",
            (MediaKind::Audio, "flac") => "audio/flac",
            (MediaKind::Audio, _) => "audio/mpeg",
            (MediaKind::Image, "jpg" | "jpeg") => "image/jpeg",
            (MediaKind::Image, "webp") => "image/webp",
            (MediaKind::Image, _) => "image/png",
        }
    }
}

pub fn data_uri(path: &Path, kind: MediaKind) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {} file {}", kind.label(), path.display()))?;
    Ok(format!(
        "data:{};base64,{}",
        kind.mime_type(path),
        STANDARD.encode(bytes)
    ))
}

/// Input reference for a job: the URL when given, else the inlined file.
pub fn resolve_source(file: Option<&Path>, url: Option<&str>, kind: MediaKind) -> Result<String> {
    if let Some(url) = url {
        return Ok(url.to_string());
    }
    match file {
        Some(path) if !path.exists() => {
            bail!("{} file not found: {}", kind.label(), path.display())
        }
        Some(path) => data_uri(path, kind),
        None => bail!("Either {} file or URL required", kind.label()),
    }
}
