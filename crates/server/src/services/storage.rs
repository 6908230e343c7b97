// Upload storage for images attached to posts, chats, profiles and banners

use std::path::PathBuf;

use axum::extract::multipart::Field;
use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, Result};

pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;
pub const MAX_BANNER_SIZE: usize = 10 * 1024 * 1024;
/// Request body cap; a post carries up to ten images.
pub const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

/// Public URL prefix the upload directory is served under.
pub const UPLOADS_URL_PREFIX: &str = "/uploads";

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub async fn from_field(field: Field<'_>) -> Result<Self> {
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read file {file_name}: {e}")))?;

        Ok(Self {
            file_name,
            content_type,
            data: data.to_vec(),
        })
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }
}

#[derive(Clone, Debug)]
pub struct StorageService {
    base_path: PathBuf,
}

impl StorageService {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create upload directory: {e}")))?;
        Ok(())
    }

    /// Writes an image and returns its public URL.
    pub async fn save_image(&self, file: &UploadedFile, max_size: usize) -> Result<String> {
        if !file.is_image() {
            return Err(AppError::Validation("Only images are allowed".to_string()));
        }
        if file.data.len() > max_size {
            return Err(AppError::Validation(format!(
                "File size too large. Maximum size: {}MB",
                max_size / (1024 * 1024)
            )));
        }

        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(&file.file_name));
        let path = self.base_path.join(&stored_name);

        self.init().await?;
        fs::write(&path, &file.data)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write upload {stored_name}: {e}")))?;

        tracing::debug!(file = %stored_name, bytes = file.data.len(), "stored upload");

        Ok(format!("{UPLOADS_URL_PREFIX}/{stored_name}"))
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        let Some(name) = url.strip_prefix(&format!("{UPLOADS_URL_PREFIX}/")) else {
            return Ok(());
        };
        if name.contains('/') || name.contains("..") {
            return Ok(());
        }

        let path = self.base_path.join(name);
        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to delete upload: {e}")))?;
        }
        Ok(())
    }
}

/// Keeps ASCII letters, digits, dots and dashes; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches(['.', '_']).is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str, size: usize) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            data: vec![0u8; size],
        }
    }

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_file_name("photo 1.png"), "photo_1.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("фото.jpg"), "____.jpg");
        assert_eq!(sanitize_file_name(".."), "file");
    }

    #[tokio::test]
    async fn save_image_writes_under_base_path() {
        let dir = std::env::temp_dir().join(format!("vaymaster-storage-{}", Uuid::new_v4()));
        let storage = StorageService::new(&dir);

        let url = storage.save_image(&image("a b.png", 16), MAX_IMAGE_SIZE).await.unwrap();
        assert!(url.starts_with("/uploads/"));
        assert!(url.ends_with("-a_b.png"));

        let name = url.trim_start_matches("/uploads/");
        assert_eq!(std::fs::read(dir.join(name)).unwrap().len(), 16);

        storage.delete(&url).await.unwrap();
        assert!(!dir.join(name).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn save_image_rejects_non_images_and_oversized_files() {
        let dir = std::env::temp_dir().join(format!("vaymaster-storage-{}", Uuid::new_v4()));
        let storage = StorageService::new(&dir);

        let mut text = image("notes.txt", 4);
        text.content_type = Some("text/plain".to_string());
        assert!(matches!(
            storage.save_image(&text, MAX_IMAGE_SIZE).await,
            Err(AppError::Validation(_))
        ));

        assert!(matches!(
            storage.save_image(&image("big.png", 11), 10).await,
            Err(AppError::Validation(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
