//! Image uploads served back to clients (tournament banners, qualifier art).

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{dto::validation::validate_file_name, error::AppError};

/// Smallest accepted upload.
pub const MIN_UPLOAD_BYTES: usize = 512;
/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 10_000;

const SNIFF_WINDOW: usize = 512;
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];
const HTML_MARKERS: [&[u8]; 6] = [b"<html", b"<script", b"<!doctype", b"<body", b"<svg", b"<iframe"];

/// Reasons an upload or download is refused.
#[derive(Debug, Error)]
pub enum FileError {
    /// Body outside the accepted size range.
    #[error("file size of {0} bytes is outside the accepted range")]
    Size(usize),
    /// Declared content type is not an image.
    #[error("content type {0:?} is not an image")]
    ContentType(String),
    /// File name does not carry an image extension.
    #[error("file name {0:?} does not have an image extension")]
    Extension(String),
    /// Body does not start like a PNG, JPEG or GIF.
    #[error("file content is not a supported image")]
    Signature,
    /// Body looks like markup.
    #[error("file content contains markup")]
    Markup,
    /// Name would leave the content directory.
    #[error("invalid file name {0:?}")]
    Name(String),
    /// No file stored under that name.
    #[error("file {0} not found")]
    NotFound(String),
    /// Disk access failed.
    #[error("file storage failure: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::Size(len) if len > MAX_UPLOAD_BYTES => AppError::PayloadTooLarge(err.to_string()),
            FileError::Size(_)
            | FileError::ContentType(_)
            | FileError::Extension(_)
            | FileError::Signature
            | FileError::Markup
            | FileError::Name(_) => AppError::BadRequest(err.to_string()),
            FileError::NotFound(_) => AppError::NotFound(err.to_string()),
            FileError::Io(source) => AppError::Internal(source.to_string()),
        }
    }
}

fn has_image_signature(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
}

fn contains_markup(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    let lowered = window.to_ascii_lowercase();
    HTML_MARKERS
        .iter()
        .any(|marker| lowered.windows(marker.len()).any(|chunk| chunk == *marker))
}

/// Run every upload guard without touching the disk.
pub fn check_upload(content_type: &str, file_name: &str, bytes: &[u8]) -> Result<(), FileError> {
    if !(MIN_UPLOAD_BYTES..=MAX_UPLOAD_BYTES).contains(&bytes.len()) {
        return Err(FileError::Size(bytes.len()));
    }
    if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(FileError::ContentType(content_type.to_string()));
    }
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    if !extension.is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str())) {
        return Err(FileError::Extension(file_name.to_string()));
    }
    if !has_image_signature(bytes) {
        return Err(FileError::Signature);
    }
    if contains_markup(bytes) {
        return Err(FileError::Markup);
    }
    Ok(())
}

/// Validate and store an upload under a fresh name. Returns that name.
pub async fn store_upload(
    files_dir: &Path,
    content_type: &str,
    file_name: &str,
    bytes: &[u8],
) -> Result<String, FileError> {
    check_upload(content_type, file_name, bytes)?;

    fs::create_dir_all(files_dir).await?;
    let file_id = Uuid::new_v4().to_string();
    fs::write(files_dir.join(&file_id), bytes).await?;

    info!(file = %file_id, size = bytes.len(), original = %file_name, "stored upload");
    Ok(file_id)
}

fn resolve(files_dir: &Path, name: &str) -> Result<PathBuf, FileError> {
    validate_file_name(name).map_err(|_| FileError::Name(name.to_string()))?;
    Ok(files_dir.join(name))
}

/// Read a stored file back.
pub async fn load_file(files_dir: &Path, name: &str) -> Result<Vec<u8>, FileError> {
    let path = resolve(files_dir, name)?;
    match fs::read(&path).await {
        Ok(bytes) => {
            debug!(file = %name, size = bytes.len(), "serving file");
            Ok(bytes)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(FileError::NotFound(name.to_string()))
        }
        Err(err) => Err(FileError::Io(err)),
    }
}

/// Content type to serve a stored file with, sniffed from its first bytes.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}
