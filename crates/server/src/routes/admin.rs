use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;

use crate::{
    db::models::UserRole,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::{
        ads,
        feedback::{self, FeedbackView},
    },
    AppState,
};

/// Everything here sits behind `admin_middleware`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", delete(delete_user))
        .route("/feedback", get(list_feedback))
        .nest("/ads", ads::admin_router())
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserView {
    pub id: String,
    pub email: String,
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: UserRole,
    pub city: String,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub rating: f64,
    pub created_at: String,
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<AdminUserView>>> {
    let users = sqlx::query_as::<_, AdminUserView>(
        r#"
        SELECT id, email, name, first_name, last_name, role, city, phone, avatar, rating, created_at
        FROM users
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(users))
}

async fn delete_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    if id == admin.id {
        return Err(AppError::Validation(
            "Admins cannot delete their own account".to_string(),
        ));
    }

    // Posts, likes, follows, chats and services cascade
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::info!(admin = %admin.id, user = %id, "user deleted");
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn list_feedback(State(state): State<AppState>) -> Result<Json<Vec<FeedbackView>>> {
    Ok(Json(feedback::list_feedback(&state.db.pool).await?))
}
