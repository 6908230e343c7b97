use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::{self, models::UserSummary},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

/// Number of most recent messages returned to readers.
pub const HISTORY_LIMIT: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_messages).post(post_message))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMessageResponse {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub created_at: String,
    pub sender: UserSummary,
}

#[derive(sqlx::FromRow)]
struct GlobalMessageRow {
    #[sqlx(rename = "message_id")]
    id: String,
    content: String,
    created_at: String,
    #[sqlx(flatten)]
    sender: UserSummary,
}

impl From<GlobalMessageRow> for GlobalMessageResponse {
    fn from(row: GlobalMessageRow) -> Self {
        GlobalMessageResponse {
            id: row.id,
            content: row.content,
            sender_id: row.sender.id.clone(),
            created_at: row.created_at,
            sender: row.sender,
        }
    }
}

const MESSAGE_SELECT: &str = r#"
    SELECT g.id AS message_id, g.content, g.created_at,
           u.id, u.name, u.avatar, u.role, u.city, u.first_name, u.last_name
    FROM global_chat_messages g
    JOIN users u ON u.id = g.sender_id
"#;

async fn list_messages(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<GlobalMessageResponse>>> {
    // Newest window first, then flipped to read top to bottom
    let mut rows = sqlx::query_as::<_, GlobalMessageRow>(&format!(
        "{MESSAGE_SELECT} ORDER BY g.created_at DESC, g.rowid DESC LIMIT ?"
    ))
    .bind(HISTORY_LIMIT)
    .fetch_all(&state.db.pool)
    .await?;
    rows.reverse();

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn post_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<GlobalMessageResponse>)> {
    let content = body
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Content is required".to_string()))?;

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO global_chat_messages (id, sender_id, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&user.id)
    .bind(&content)
    .bind(db::now())
    .execute(&state.db.pool)
    .await?;

    let row = sqlx::query_as::<_, GlobalMessageRow>(&format!("{MESSAGE_SELECT} WHERE g.id = ?"))
        .bind(&id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok((StatusCode::CREATED, Json(row.into())))
}
