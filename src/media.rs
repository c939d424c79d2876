use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::AppError;

pub const PROFILE_PICTURE_DIR: &str = "uploads/profile_pictures";
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    url_prefix: String,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        let mut url_prefix = url_prefix.to_string();
        if !url_prefix.ends_with('/') {
            url_prefix.push('/');
        }
        Self {
            root: root.into(),
            url_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores an uploaded profile picture and returns its path relative to
    /// the media root.
    pub async fn save_profile_picture(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<String, AppError> {
        if bytes.is_empty() {
            return Err(AppError::Upload("The submitted file is empty.".to_string()));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::Upload(format!(
                "The file is too large. Maximum size is {} MB.",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            )));
        }

        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| {
                AppError::Upload(format!(
                    "Unsupported file type. Allowed: {}.",
                    ALLOWED_EXTENSIONS.join(", ")
                ))
            })?;

        if !content_type.is_some_and(|ct| ct.starts_with("image/")) {
            return Err(AppError::Upload("Upload a valid image.".to_string()));
        }

        let relative = format!("{}/{}.{}", PROFILE_PICTURE_DIR, Uuid::new_v4(), extension);
        let destination = self.root.join(&relative);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&destination, bytes).await?;

        tracing::info!("Stored profile picture at {}", destination.display());
        Ok(relative)
    }

    // Missing files are not an error
    pub async fn delete(&self, relative: &str) -> Result<(), AppError> {
        if relative.contains("..") {
            return Err(AppError::Upload("Invalid media path.".to_string()));
        }

        match tokio::fs::remove_file(self.root.join(relative)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn url(&self, relative: &str) -> String {
        format!("{}{}", self.url_prefix, relative.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[tokio::test]
    async fn test_save_profile_picture() {
        let dir = TempDir::new().unwrap();
        let storage = MediaStorage::new(dir.path(), "/mediafiles/");

        let relative = storage
            .save_profile_picture("me.PNG", Some("image/png"), PNG_BYTES)
            .await
            .unwrap();

        assert!(relative.starts_with("uploads/profile_pictures/"));
        assert!(relative.ends_with(".png"));
        let stored = tokio::fs::read(dir.path().join(&relative)).await.unwrap();
        assert_eq!(stored, PNG_BYTES);
        assert_eq!(storage.url(&relative), format!("/mediafiles/{}", relative));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let storage = MediaStorage::new(dir.path(), "/mediafiles/");

        let result = storage
            .save_profile_picture("script.exe", Some("image/png"), PNG_BYTES)
            .await;
        assert!(matches!(result, Err(AppError::Upload(_))));
    }

    #[tokio::test]
    async fn test_rejects_non_image_content_type() {
        let dir = TempDir::new().unwrap();
        let storage = MediaStorage::new(dir.path(), "/mediafiles/");

        let result = storage
            .save_profile_picture("photo.jpg", Some("text/html"), PNG_BYTES)
            .await;
        assert!(matches!(result, Err(AppError::Upload(_))));

        let result = storage.save_profile_picture("photo.jpg", None, PNG_BYTES).await;
        assert!(matches!(result, Err(AppError::Upload(_))));
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized_files() {
        let dir = TempDir::new().unwrap();
        let storage = MediaStorage::new(dir.path(), "/mediafiles/");

        let empty = storage
            .save_profile_picture("photo.jpg", Some("image/jpeg"), &[])
            .await;
        assert!(matches!(empty, Err(AppError::Upload(_))));

        let big = vec![0u8; MAX_UPLOAD_BYTES + 1];
        let oversized = storage
            .save_profile_picture("photo.jpg", Some("image/jpeg"), &big)
            .await;
        assert!(matches!(oversized, Err(AppError::Upload(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = MediaStorage::new(dir.path(), "/mediafiles");

        let relative = storage
            .save_profile_picture("a.gif", Some("image/gif"), b"GIF89a")
            .await
            .unwrap();
        storage.delete(&relative).await.unwrap();
        assert!(!dir.path().join(&relative).exists());
        storage.delete(&relative).await.unwrap();

        assert!(storage.delete("../etc/passwd").await.is_err());
    }

    #[test]
    fn test_url_prefix_normalized() {
        let storage = MediaStorage::new("media", "/mediafiles");
        assert_eq!(storage.url("uploads/x.png"), "/mediafiles/uploads/x.png");
    }
}
