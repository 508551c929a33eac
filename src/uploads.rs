//! Content-addressed file storage for uploaded documents and images.
//!
//! Files land at `<media root>/<kind>/<sha256>.<ext>` so identical uploads
//! share one file and a stored path never changes meaning.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Resources,
    Aids,
    Promotions,
}

impl UploadKind {
    pub fn dir(self) -> &'static str {
        match self {
            UploadKind::Resources => "resources",
            UploadKind::Aids => "aids",
            UploadKind::Promotions => "promotions",
        }
    }

    fn accepts(self, mime: &mime::Mime) -> bool {
        match self {
            UploadKind::Promotions => mime.type_() == mime::IMAGE,
            UploadKind::Resources | UploadKind::Aids => true,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum UploadError {
    Empty,
    TooLarge,
    Unsupported(String),
}

impl UploadError {
    pub fn message(&self) -> String {
        match self {
            UploadError::Empty => "the uploaded file is empty".to_string(),
            UploadError::TooLarge => {
                format!("uploads are limited to {} MiB", MAX_UPLOAD_BYTES / 1024 / 1024)
            }
            UploadError::Unsupported(mime) => format!("files of type {mime} are not accepted here"),
        }
    }
}

/// Where an accepted upload goes, relative to the media root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredName {
    pub relative_path: String,
    pub mime: mime::Mime,
}

/// Sniffs the bytes and derives the stored name. Unknown formats are kept
/// as `application/octet-stream` with a `.bin` extension.
pub fn name_for(kind: UploadKind, data: &[u8]) -> Result<StoredName, UploadError> {
    if data.is_empty() {
        return Err(UploadError::Empty);
    }
    if data.len() > MAX_UPLOAD_BYTES {
        return Err(UploadError::TooLarge);
    }

    let (mime, extension) = match infer::get(data) {
        Some(t) => (
            t.mime_type()
                .parse::<mime::Mime>()
                .unwrap_or(mime::APPLICATION_OCTET_STREAM),
            t.extension(),
        ),
        None => (mime::APPLICATION_OCTET_STREAM, "bin"),
    };
    if !kind.accepts(&mime) {
        return Err(UploadError::Unsupported(mime.to_string()));
    }

    let digest = Sha256::digest(data);
    Ok(StoredName {
        relative_path: format!("{}/{:x}.{}", kind.dir(), digest, extension),
        mime,
    })
}

/// Public URL of a stored file.
pub fn media_url(relative_path: &str) -> String {
    format!("/media/{relative_path}")
}

/// Whether `path` looks like something [`name_for`] produced for `kind`.
pub fn is_stored_path(kind: UploadKind, path: &str) -> bool {
    path.strip_prefix(kind.dir())
        .and_then(|rest| rest.strip_prefix('/'))
        .map_or(false, |file| {
            !file.is_empty() && !file.contains('/') && !file.contains("..")
        })
}

pub async fn store(media_root: &Path, name: &StoredName, data: &[u8]) -> std::io::Result<PathBuf> {
    let path = media_root.join(&name.relative_path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::metadata(&path).await.is_err() {
        tokio::fs::write(&path, data).await?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn images_are_named_by_content() {
        let a = name_for(UploadKind::Promotions, PNG_SIGNATURE).unwrap();
        let b = name_for(UploadKind::Promotions, PNG_SIGNATURE).unwrap();
        assert_eq!(a, b);
        assert!(a.relative_path.starts_with("promotions/"));
        assert!(a.relative_path.ends_with(".png"));
        assert_eq!(a.mime.type_(), mime::IMAGE);
    }

    #[test]
    fn promotions_must_be_images() {
        let err = name_for(UploadKind::Promotions, b"just some text").unwrap_err();
        assert_eq!(
            err,
            UploadError::Unsupported("application/octet-stream".to_string())
        );
        let doc = name_for(UploadKind::Resources, b"just some text").unwrap();
        assert!(doc.relative_path.ends_with(".bin"));
    }

    #[test]
    fn references_must_point_into_the_kind_directory() {
        assert!(is_stored_path(UploadKind::Resources, "resources/ab12.pdf"));
        assert!(!is_stored_path(UploadKind::Resources, "aids/ab12.pdf"));
        assert!(!is_stored_path(UploadKind::Resources, "resources/../secret"));
        assert!(!is_stored_path(UploadKind::Resources, "resources/"));
        assert_eq!(media_url("aids/x.pdf"), "/media/aids/x.pdf");
    }

    #[test]
    fn empty_files_are_rejected() {
        assert_eq!(name_for(UploadKind::Aids, &[]), Err(UploadError::Empty));
    }
}
