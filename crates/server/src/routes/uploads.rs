use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::storage::{UploadedFile, MAX_BANNER_SIZE, MAX_IMAGE_SIZE},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(upload))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

/// Size cap for an upload purpose. Banners get the larger allowance.
fn size_limit(kind: &str) -> usize {
    if kind.eq_ignore_ascii_case("banner") {
        MAX_BANNER_SIZE
    } else {
        MAX_IMAGE_SIZE
    }
}

async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut file = None;
    let mut kind = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read multipart field: {e}")))?
    {
        match field.name() {
            Some("file") => file = Some(UploadedFile::from_field(field).await?),
            Some("type") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read type: {e}")))?;
                kind = Some(text.trim().to_string()).filter(|k| !k.is_empty());
            }
            _ => {}
        }
    }

    let (Some(file), Some(kind)) = (file, kind) else {
        return Err(AppError::Validation("File and type are required".to_string()));
    };

    let url = state.storage.save_image(&file, size_limit(&kind)).await?;
    tracing::info!(user = %user.id, kind = %kind, url = %url, "file uploaded");

    Ok(Json(UploadResponse { url }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banners_get_larger_limit() {
        assert_eq!(size_limit("banner"), MAX_BANNER_SIZE);
        assert_eq!(size_limit("Banner"), MAX_BANNER_SIZE);
        assert_eq!(size_limit("avatar"), MAX_IMAGE_SIZE);
    }
}
