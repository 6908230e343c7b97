use axum::{
    extract::{Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, SqlitePool};
use uuid::Uuid;

use crate::{
    db::{self, models::UserRole},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{
        feed::{self, PostScope, PostView},
        storage::{UploadedFile, MAX_IMAGE_SIZE},
    },
    AppState,
};

const MAX_POST_IMAGES: usize = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_post))
        .route("/feed", get(get_feed))
        .route("/favorites", get(get_favorites))
        .route("/:id", get(get_post).delete(delete_post))
        .route(
            "/:id/like",
            post(toggle_like).put(like_post).delete(unlike_post),
        )
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub page: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub posts: Vec<PostView>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub liked: bool,
    pub likes_count: i64,
}

async fn get_feed(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedResponse>> {
    let (page, offset) = feed::page_offset(query.page.and_then(|p| p.trim().parse().ok()));
    let role = match query.role.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(role) => Some(
            UserRole::parse(role)
                .ok_or_else(|| AppError::Validation("Unknown role filter".to_string()))?,
        ),
    };
    let scope = PostScope::All { role };

    let posts = feed::load_posts(
        &state.db.pool,
        scope,
        Some(&user.id),
        feed::PAGE_SIZE,
        offset,
    )
    .await?;
    let total = feed::count_posts(&state.db.pool, scope).await?;

    Ok(Json(FeedResponse {
        posts,
        has_more: feed::has_more(total, page),
    }))
}

async fn get_favorites(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<PostView>>> {
    let posts = feed::load_posts(
        &state.db.pool,
        PostScope::FollowedBy(&user.id),
        Some(&user.id),
        feed::PAGE_SIZE,
        0,
    )
    .await?;
    Ok(Json(posts))
}

async fn get_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PostView>> {
    let post = feed::load_post(&state.db.pool, &id, Some(&user.id))
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;
    Ok(Json(post))
}

async fn create_post(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<PostView>> {
    let mut content = None;
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read multipart field: {e}")))?
    {
        match field.name() {
            Some("content") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read content: {e}")))?;
                content = Some(text);
            }
            Some("images") => images.push(UploadedFile::from_field(field).await?),
            _ => {}
        }
    }

    let content = content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("Content is required".to_string()))?;
    if images.len() > MAX_POST_IMAGES {
        return Err(AppError::Validation(format!(
            "A post can have at most {MAX_POST_IMAGES} images"
        )));
    }

    // Files are written before the row; a failed insert leaves them orphaned
    let image_urls = try_join_all(
        images
            .iter()
            .map(|image| state.storage.save_image(image, MAX_IMAGE_SIZE)),
    )
    .await?;

    let post_id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO posts (id, author_id, content, images, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&post_id)
        .bind(&user.id)
        .bind(&content)
        .bind(SqlJson(&image_urls))
        .bind(db::now())
        .execute(&state.db.pool)
        .await?;

    let post = feed::load_post(&state.db.pool, &post_id, Some(&user.id))
        .await?
        .ok_or_else(|| AppError::Internal("Created post vanished".to_string()))?;
    Ok(Json(post))
}

async fn delete_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let post = sqlx::query_as::<_, (String, SqlJson<Vec<String>>)>(
        "SELECT author_id, images FROM posts WHERE id = ?",
    )
    .bind(&id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    let (author_id, SqlJson(images)) = post;

    if author_id != user.id && !user.is_admin() {
        return Err(AppError::Forbidden("You cannot delete this post".to_string()));
    }

    // Cascades to likes and comments
    sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    for url in images {
        if let Err(e) = state.storage.delete(&url).await {
            tracing::warn!(post = %id, url = %url, "failed to remove post image: {e}");
        }
    }

    Ok(Json(serde_json::json!({ "message": "Post deleted" })))
}

async fn ensure_post_exists(pool: &SqlitePool, post_id: &str) -> Result<()> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Post not found".to_string()));
    }
    Ok(())
}

async fn is_liked(pool: &SqlitePool, post_id: &str, user_id: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM post_likes WHERE post_id = ? AND user_id = ?",
    )
    .bind(post_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Brings the like edge to `liked`. A concurrent duplicate insert is a no-op.
async fn set_like(pool: &SqlitePool, post_id: &str, user_id: &str, liked: bool) -> Result<()> {
    if liked {
        sqlx::query(
            "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(post_id)
        .bind(user_id)
        .bind(db::now())
        .execute(pool)
        .await?;
    } else {
        sqlx::query("DELETE FROM post_likes WHERE post_id = ? AND user_id = ?")
            .bind(post_id)
            .bind(user_id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn like_state(pool: &SqlitePool, post_id: &str, user_id: &str) -> Result<LikeResponse> {
    let (liked, likes_count) = sqlx::query_as::<_, (bool, i64)>(
        r#"
        SELECT EXISTS (SELECT 1 FROM post_likes WHERE post_id = ?1 AND user_id = ?2),
               (SELECT COUNT(*) FROM post_likes WHERE post_id = ?1)
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(LikeResponse { liked, likes_count })
}

async fn toggle_like(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<LikeResponse>> {
    let pool = &state.db.pool;
    ensure_post_exists(pool, &post_id).await?;

    let liked = is_liked(pool, &post_id, &user.id).await?;
    set_like(pool, &post_id, &user.id, !liked).await?;

    Ok(Json(like_state(pool, &post_id, &user.id).await?))
}

async fn like_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<LikeResponse>> {
    let pool = &state.db.pool;
    ensure_post_exists(pool, &post_id).await?;
    set_like(pool, &post_id, &user.id, true).await?;
    Ok(Json(like_state(pool, &post_id, &user.id).await?))
}

async fn unlike_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<LikeResponse>> {
    let pool = &state.db.pool;
    ensure_post_exists(pool, &post_id).await?;
    set_like(pool, &post_id, &user.id, false).await?;
    Ok(Json(like_state(pool, &post_id, &user.id).await?))
}
