//! Image loading for image content blocks.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

use crate::content::ImageSource;
use crate::errors::HarnessError;

/// Media type assumed when nothing better is known.
pub const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

/// Loads an image from a local path or an `http(s)` URL and base64-encodes it.
pub async fn load_image(source: &str) -> Result<ImageSource, HarnessError> {
    let source = source.trim();
    if source.is_empty() {
        return Err(HarnessError::Image("image source must not be empty".into()));
    }
    if is_url(source) {
        fetch_image(source).await
    } else {
        read_image(Path::new(source)).await
    }
}

fn is_url(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

async fn fetch_image(url: &str) -> Result<ImageSource, HarnessError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| HarnessError::Image(format!("failed to fetch {url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(HarnessError::Image(format!(
            "fetching {url} failed with status {status}"
        )));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| HarnessError::Image(format!("failed to read body of {url}: {e}")))?;
    let path = url.split(['?', '#']).next().unwrap_or(url);
    encode_image(&bytes, content_type.as_deref(), Some(path))
}

async fn read_image(path: &Path) -> Result<ImageSource, HarnessError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| HarnessError::Image(format!("failed to read {}: {e}", path.display())))?;
    encode_image(&bytes, None, path.to_str())
}

/// Base64-encodes raw image bytes into an inline image source.
pub fn encode_image(
    bytes: &[u8],
    content_type: Option<&str>,
    path: Option<&str>,
) -> Result<ImageSource, HarnessError> {
    if bytes.is_empty() {
        return Err(HarnessError::Image("image is empty".into()));
    }
    let media_type = detect_media_type(bytes, content_type, path);
    debug!(media_type = %media_type, size = bytes.len(), "encoded image");
    Ok(ImageSource::base64(media_type, BASE64.encode(bytes)))
}

/// Picks a media type from, in order: an `image/*` content type, the magic
/// bytes, the file extension, then [`DEFAULT_MEDIA_TYPE`].
pub fn detect_media_type(bytes: &[u8], content_type: Option<&str>, path: Option<&str>) -> String {
    if let Some(declared) = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| ct.starts_with("image/"))
    {
        return declared;
    }
    if let Some(sniffed) = sniff(bytes) {
        return sniffed.to_string();
    }
    if let Some(by_ext) = path.and_then(from_extension) {
        return by_ext.to_string();
    }
    DEFAULT_MEDIA_TYPE.to_string()
}

fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

fn from_extension(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
