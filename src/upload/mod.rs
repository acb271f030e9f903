//! Checks applied to an upload before any bytes reach blob storage.

use image::ImageFormat;

use crate::config::UploadConfig;
use crate::error::{EngineError, EngineResult};

/// Outcome of a successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedUpload {
    pub format: ImageFormat,
    pub size_bytes: u64,
}

/// Canonical config name for a sniffed format.
fn format_name(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        ImageFormat::Bmp => Some("bmp"),
        ImageFormat::Tiff => Some("tiff"),
        _ => None,
    }
}

fn is_allowed(config: &UploadConfig, name: &str) -> bool {
    config.allowed_formats.iter().any(|allowed| {
        let allowed = allowed.to_ascii_lowercase();
        allowed == name || (name == "jpeg" && allowed == "jpg")
    })
}

/// Reject empty, oversized or non-image payloads. The format is decided from
/// the leading magic bytes, never from the file name.
pub fn validate(config: &UploadConfig, bytes: &[u8]) -> EngineResult<AcceptedUpload> {
    if bytes.is_empty() {
        return Err(EngineError::validation("no file uploaded"));
    }

    let size_bytes = bytes.len() as u64;
    if size_bytes > config.max_bytes {
        return Err(EngineError::validation(format!(
            "file size must be below {} bytes",
            config.max_bytes
        )));
    }

    let format = image::guess_format(bytes)
        .map_err(|_| EngineError::validation("file is not a recognised image"))?;
    match format_name(format) {
        Some(name) if is_allowed(config, name) => Ok(AcceptedUpload { format, size_bytes }),
        _ => Err(EngineError::validation(format!(
            "only {} files are allowed",
            config.allowed_formats.join(", ")
        ))),
    }
}
