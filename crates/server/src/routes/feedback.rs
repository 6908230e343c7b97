use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::{self, models::UserRole},
    error::{AppError, Result},
    middleware::auth::MaybeAuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(submit_feedback))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAuthor {
    pub name: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackView {
    pub id: String,
    pub content: String,
    pub user_id: Option<String>,
    pub created_at: String,
    pub user: Option<FeedbackAuthor>,
}

// Authors are optional, so the joined columns are all nullable
#[derive(sqlx::FromRow)]
struct FeedbackRow {
    id: String,
    content: String,
    user_id: Option<String>,
    created_at: String,
    user_name: Option<String>,
    user_avatar: Option<String>,
    user_role: Option<UserRole>,
    user_first_name: Option<String>,
    user_last_name: Option<String>,
}

impl From<FeedbackRow> for FeedbackView {
    fn from(row: FeedbackRow) -> Self {
        let user = match (row.user_name, row.user_role) {
            (Some(name), Some(role)) => Some(FeedbackAuthor {
                name,
                avatar: row.user_avatar,
                role,
                first_name: row.user_first_name,
                last_name: row.user_last_name,
            }),
            _ => None,
        };

        FeedbackView {
            id: row.id,
            content: row.content,
            user_id: row.user_id,
            created_at: row.created_at,
            user,
        }
    }
}

const FEEDBACK_SELECT: &str = r#"
    SELECT f.id, f.content, f.user_id, f.created_at,
           u.name AS user_name, u.avatar AS user_avatar, u.role AS user_role,
           u.first_name AS user_first_name, u.last_name AS user_last_name
    FROM platform_feedback f
    LEFT JOIN users u ON u.id = f.user_id
"#;

/// All feedback, newest first.
pub(crate) async fn list_feedback(pool: &SqlitePool) -> Result<Vec<FeedbackView>> {
    let rows = sqlx::query_as::<_, FeedbackRow>(&format!(
        "{FEEDBACK_SELECT} ORDER BY f.created_at DESC, f.rowid DESC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

async fn submit_feedback(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Json(body): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackView>)> {
    let content = body
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("Content is required".to_string()))?;

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO platform_feedback (id, user_id, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(caller.id())
    .bind(&content)
    .bind(db::now())
    .execute(&state.db.pool)
    .await?;

    tracing::info!(feedback = %id, anonymous = caller.0.is_none(), "feedback received");

    let row = sqlx::query_as::<_, FeedbackRow>(&format!("{FEEDBACK_SELECT} WHERE f.id = ?"))
        .bind(&id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok((StatusCode::CREATED, Json(row.into())))
}
