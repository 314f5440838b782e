/// Document intake: validates uploaded images and hands them to object
/// storage. Nothing is stored unless both the MIME type and the size pass.

use crate::db::models::{DocumentDescriptor, UploadResponse};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_SLOT: &str = "document";
pub const MAX_SLOT_LEN: usize = 64;
const KEY_PREFIX: &str = "admission-documents";

/// MIME type -> file extension for every accepted upload.
const ALLOWED_TYPES: [(&str, &str); 4] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

pub const KNOWN_SLOTS: [&str; 9] = [
    "passportPhoto",
    "aadhaarFront",
    "aadhaarBack",
    "tenthMarksheet",
    "twelfthMarksheet",
    "graduationMarksheets",
    "tcMigrationCertificate",
    "casteCertificate",
    "domicileCertificate",
];

pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let content_type = content_type.trim().to_ascii_lowercase();
    ALLOWED_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}

/// Content type to serve a stored object with, from its key's extension.
pub fn content_type_for_key(key: &str) -> Option<&'static str> {
    let ext = Path::new(key).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_TYPES
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(mime, _)| *mime)
}

pub fn check_content_type(content_type: &str) -> Result<&'static str> {
    extension_for(content_type).ok_or(AppError::UnsupportedFormat)
}

pub fn check_size(size: usize) -> Result<()> {
    if size > MAX_UPLOAD_BYTES {
        Err(AppError::FileTooLarge {
            limit_mb: MAX_UPLOAD_BYTES / (1024 * 1024),
        })
    } else {
        Ok(())
    }
}

pub fn normalize_slot(slot: Option<&str>) -> Result<String> {
    let slot = slot.map(str::trim).filter(|s| !s.is_empty());
    let Some(slot) = slot else {
        return Ok(DEFAULT_SLOT.to_string());
    };

    let valid = slot.len() <= MAX_SLOT_LEN
        && slot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(AppError::Validation(format!("Invalid document slot: {}", slot)));
    }
    if !KNOWN_SLOTS.contains(&slot) && slot != DEFAULT_SLOT {
        log::debug!("Accepting upload for unrecognized slot {}", slot);
    }
    Ok(slot.to_string())
}

/// A file as received from the client, before validation.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` and return its durable URL.
    async fn put(&self, key: &str, content_type: &str, data: Bytes) -> Result<String>;
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    /// Inverse of the URL returned by `put`; `None` for foreign URLs.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

/// Objects on the local filesystem, served back through `/uploads/{key}`.
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        LocalObjectStore {
            root: root.into(),
            base_url: format!("{}/uploads", public_base_url.trim_end_matches('/')),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
            return Err(AppError::Validation(format!("Invalid object key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, _content_type: &str, data: Bytes) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to create {:?}: {}", parent, e)))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write {:?}: {}", path, e)))?;
        Ok(format!("{}/{}", self.base_url, key))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Internal(format!("Failed to read {:?}: {}", path, e))),
        }
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        let key = url.strip_prefix(&self.base_url)?.strip_prefix('/')?;
        self.path_for(key).ok()?;
        Some(key.to_string())
    }
}

pub struct DocumentIntake {
    store: Arc<dyn ObjectStore>,
}

impl DocumentIntake {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        DocumentIntake { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Check a client-supplied descriptor before it is attached to an
    /// application: it must name an image this store issued under the
    /// owner's prefix, within the upload limit.
    pub fn check_descriptor(&self, owner_id: &str, descriptor: &DocumentDescriptor) -> Result<()> {
        check_size(usize::try_from(descriptor.size_bytes).unwrap_or(usize::MAX))?;

        let key = self
            .store
            .key_for_url(descriptor.url.trim())
            .ok_or_else(|| {
                AppError::Validation("Document URL was not issued by this server".to_string())
            })?;
        content_type_for_key(&key).ok_or(AppError::UnsupportedFormat)?;

        if !key.starts_with(&format!("{}/{}/", KEY_PREFIX, owner_id)) {
            log::warn!("Rejected document {} for applicant {}", key, owner_id);
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    /// Validate and store one file under
    /// `admission-documents/<owner>/<slot>-<millis>.<ext>`.
    /// Earlier uploads to the same slot are left in place.
    pub async fn upload_document(
        &self,
        file: IncomingFile,
        slot: Option<&str>,
        owner_id: &str,
    ) -> Result<UploadResponse> {
        let ext = check_content_type(&file.content_type)?;
        check_size(file.data.len())?;
        let slot = normalize_slot(slot)?;

        let key = format!(
            "{}/{}/{}-{}.{}",
            KEY_PREFIX,
            owner_id,
            slot,
            Utc::now().timestamp_millis(),
            ext
        );
        let size = file.data.len() as u64;
        let url = self
            .store
            .put(&key, &file.content_type, file.data)
            .await
            .map_err(|e| {
                log::error!("Object storage rejected {}: {}", key, e);
                e
            })?;

        log::info!("Stored {} ({} bytes) for {}", key, size, owner_id);
        Ok(UploadResponse {
            url,
            file_name: file.file_name,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake(dir: &Path) -> DocumentIntake {
        DocumentIntake::new(Arc::new(LocalObjectStore::new(dir, "http://localhost/")))
    }

    fn file(content_type: &str, size: usize) -> IncomingFile {
        IncomingFile {
            file_name: "scan.jpg".to_string(),
            content_type: content_type.to_string(),
            data: Bytes::from(vec![0u8; size]),
        }
    }

    #[test]
    fn test_allow_list() {
        assert_eq!(check_content_type("image/jpeg").unwrap(), "jpg");
        assert_eq!(check_content_type("IMAGE/PNG").unwrap(), "png");
        assert!(matches!(
            check_content_type("application/x-msdownload"),
            Err(AppError::UnsupportedFormat)
        ));
        assert!(matches!(
            check_content_type("application/pdf"),
            Err(AppError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        assert!(check_size(MAX_UPLOAD_BYTES).is_ok());
        assert!(matches!(
            check_size(MAX_UPLOAD_BYTES + 1),
            Err(AppError::FileTooLarge { limit_mb: 10 })
        ));
    }

    #[test]
    fn test_slot_names() {
        assert_eq!(normalize_slot(None).unwrap(), DEFAULT_SLOT);
        assert_eq!(normalize_slot(Some("  ")).unwrap(), DEFAULT_SLOT);
        assert_eq!(normalize_slot(Some("passportPhoto")).unwrap(), "passportPhoto");
        assert_eq!(normalize_slot(Some("extra_doc-2")).unwrap(), "extra_doc-2");
        assert!(normalize_slot(Some("../etc")).is_err());
        assert!(normalize_slot(Some(&"x".repeat(MAX_SLOT_LEN + 1))).is_err());
    }

    #[test]
    fn test_content_type_for_key() {
        assert_eq!(content_type_for_key("a/b/photo-1.webp"), Some("image/webp"));
        assert_eq!(content_type_for_key("a/b/photo"), None);
    }

    #[tokio::test]
    async fn test_upload_stores_under_owner_and_slot() {
        let dir = tempfile::tempdir().unwrap();
        let intake = intake(dir.path());

        let response = intake
            .upload_document(file("image/jpeg", 5 * 1024 * 1024), Some("passportPhoto"), "s1")
            .await
            .expect("Upload failed");

        assert!(response
            .url
            .starts_with("http://localhost/uploads/admission-documents/s1/passportPhoto-"));
        assert!(response.url.ends_with(".jpg"));
        assert_eq!(response.size, 5 * 1024 * 1024);
        assert_eq!(response.file_name, "scan.jpg");

        let key = response.url.trim_start_matches("http://localhost/uploads/");
        let stored = intake.store().get(key).await.unwrap().expect("Object missing");
        assert_eq!(stored.len(), 5 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_rejected_uploads_store_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let intake = intake(dir.path());

        let exe = intake
            .upload_document(file("application/x-msdownload", 50 * 1024), None, "s1")
            .await;
        assert!(matches!(exe, Err(AppError::UnsupportedFormat)));

        let huge = intake
            .upload_document(file("image/png", 11 * 1024 * 1024), None, "s1")
            .await;
        assert!(matches!(huge, Err(AppError::FileTooLarge { .. })));

        assert!(!dir.path().join(KEY_PREFIX).exists());
    }

    fn issued(url: &str, size_bytes: u64) -> DocumentDescriptor {
        DocumentDescriptor {
            file_name: "scan.png".to_string(),
            size_bytes,
            url: url.to_string(),
        }
    }

    #[test]
    fn test_descriptor_checks() {
        let dir = tempfile::tempdir().unwrap();
        let intake = intake(dir.path());
        let own = "http://localhost/uploads/admission-documents/s1/passportPhoto-1.png";

        assert!(intake.check_descriptor("s1", &issued(own, 2048)).is_ok());
        assert!(matches!(
            intake.check_descriptor("s1", &issued(own, 50 * 1024 * 1024)),
            Err(AppError::FileTooLarge { .. })
        ));
        assert!(matches!(
            intake.check_descriptor("s1", &issued("http://evil.example/payload.exe", 10)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            intake.check_descriptor(
                "s1",
                &issued("http://localhost/uploads/admission-documents/s1/payload.exe", 10)
            ),
            Err(AppError::UnsupportedFormat)
        ));
        assert!(matches!(
            intake.check_descriptor(
                "s1",
                &issued("http://localhost/uploads/admission-documents/../s2/photo-1.png", 10)
            ),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            intake.check_descriptor("s2", &issued(own, 10)),
            Err(AppError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "http://localhost");
        assert!(store.get("../secret").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
        assert!(store.get("missing/file.png").await.unwrap().is_none());
    }
}
