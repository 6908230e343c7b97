use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::{self, models::UserSummary},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn post_router() -> Router<AppState> {
    Router::new().route("/:id/comments", get(list_comments).post(create_comment))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/:id", delete(delete_comment))
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub id: String,
    pub post_id: String,
    pub content: String,
    pub created_at: String,
    pub author: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct CommentsListResponse {
    pub comments: Vec<CommentResponse>,
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    #[sqlx(rename = "comment_id")]
    id: String,
    post_id: String,
    content: String,
    created_at: String,
    #[sqlx(flatten)]
    author: UserSummary,
}

impl From<CommentRow> for CommentResponse {
    fn from(row: CommentRow) -> Self {
        CommentResponse {
            id: row.id,
            post_id: row.post_id,
            content: row.content,
            created_at: row.created_at,
            author: row.author,
        }
    }
}

const COMMENT_SELECT: &str = r#"
    SELECT c.id AS comment_id, c.post_id, c.content, c.created_at,
           u.id, u.name, u.avatar, u.role, u.city, u.first_name, u.last_name
    FROM comments c
    JOIN users u ON c.author_id = u.id
"#;

async fn ensure_post(pool: &sqlx::SqlitePool, post_id: &str) -> Result<String> {
    sqlx::query_scalar::<_, String>("SELECT author_id FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
}

async fn list_comments(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<CommentsListResponse>> {
    ensure_post(&state.db.pool, &post_id).await?;

    let rows = sqlx::query_as::<_, CommentRow>(&format!(
        "{COMMENT_SELECT} WHERE c.post_id = ? ORDER BY c.created_at ASC"
    ))
    .bind(&post_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(CommentsListResponse {
        comments: rows.into_iter().map(CommentResponse::from).collect(),
    }))
}

async fn create_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(post_id): Path<String>,
    Json(body): Json<CreateCommentRequest>,
) -> Result<Json<CommentResponse>> {
    ensure_post(&state.db.pool, &post_id).await?;

    let content = body.content.trim();
    if content.is_empty() {
        return Err(AppError::Validation(
            "Comment content is required".to_string(),
        ));
    }

    let comment_id = Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO comments (id, post_id, author_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&comment_id)
    .bind(&post_id)
    .bind(&user.id)
    .bind(content)
    .bind(db::now())
    .execute(&state.db.pool)
    .await?;

    let row = sqlx::query_as::<_, CommentRow>(&format!("{COMMENT_SELECT} WHERE c.id = ?"))
        .bind(&comment_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(row.into()))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    let comment = sqlx::query_as::<_, (String, String)>(
        "SELECT c.author_id, p.author_id FROM comments c JOIN posts p ON p.id = c.post_id WHERE c.id = ?",
    )
    .bind(&id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    let (author_id, post_author_id) = comment;

    // Comment author, post author or an admin
    if author_id != user.id && post_author_id != user.id && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Cannot delete this comment".to_string(),
        ));
    }

    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(()))
}
