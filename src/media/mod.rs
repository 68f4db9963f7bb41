// Asset storage lives on a remote media host. Calls here are outside any
// local database transaction; callers must not assume the two commit together.

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use memory::InMemoryMediaStore;
pub use remote::RemoteMediaStore;

/// Formats the host accepts, mirrored locally so obviously bad uploads are
/// rejected before any bytes leave the process.
pub const ALLOWED_FORMATS: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/heic"];

/// Upload size cap in bytes.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Upload rejected: {0}")]
    Rejected(String),

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Media host transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAsset {
    pub public_id: String,
    pub url: String,
}

/// Handle to the remote media host.
///
/// `remove` is idempotent: removing an asset the host no longer has is a
/// success, not an error.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        folder: &str,
        transform: bool,
    ) -> Result<StoredAsset, MediaError>;

    async fn remove(&self, public_id: &str) -> Result<(), MediaError>;
}

pub type DynMediaStore = Arc<dyn MediaStore>;

/// Shared validation for both backends.
pub(crate) fn validate_upload(bytes: &[u8], mime: &str) -> Result<(), MediaError> {
    if !ALLOWED_FORMATS.contains(&mime) {
        return Err(MediaError::Rejected(format!("unsupported format {mime}")));
    }
    if bytes.is_empty() {
        return Err(MediaError::Rejected("empty upload".into()));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(MediaError::Rejected(format!(
            "upload of {} bytes exceeds the {} byte limit",
            bytes.len(),
            MAX_UPLOAD_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_format() {
        let err = validate_upload(b"GIF89a", "image/gif").unwrap_err();
        assert!(matches!(err, MediaError::Rejected(_)));
    }

    #[test]
    fn rejects_empty_and_oversize() {
        assert!(validate_upload(b"", "image/png").is_err());
        let big = vec![0u8; MAX_UPLOAD_BYTES + 1];
        assert!(validate_upload(&big, "image/png").is_err());
    }

    #[test]
    fn accepts_allowed_formats() {
        for mime in ALLOWED_FORMATS {
            assert!(validate_upload(b"\x89PNG", mime).is_ok());
        }
    }
}
