use axum::{
    extract::{Multipart, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::{
        self,
        models::{MessageRow, UserSummary},
    },
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::profile::find_role,
    services::{
        storage::{UploadedFile, MAX_IMAGE_SIZE},
        typing::TypingStatus,
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_chats).post(create_or_get_chat))
        .route(
            "/messages",
            get(list_messages).post(send_message).delete(clear_messages),
        )
        .route("/typing", get(get_typing).post(set_typing))
        .route("/upload", post(upload_attachment))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub participant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIdQuery {
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub user_id: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub read: bool,
    pub created_at: String,
    pub sender: UserSummary,
}

impl From<MessageRow> for MessageResponse {
    fn from(row: MessageRow) -> Self {
        let sender = row.sender();
        MessageResponse {
            id: row.id,
            chat_id: row.chat_id,
            sender_id: row.sender_id,
            content: row.content,
            read: row.read,
            created_at: row.created_at,
            sender,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub participants: Vec<ParticipantResponse>,
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingResponse {
    pub typing_users: Vec<TypingStatus>,
}

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.chat_id, m.sender_id, m.content, m.read, m.created_at,
           u.name AS sender_name, u.avatar AS sender_avatar, u.role AS sender_role,
           u.city AS sender_city, u.first_name AS sender_first_name, u.last_name AS sender_last_name
    FROM messages m
    JOIN users u ON u.id = m.sender_id
"#;

fn required(value: Option<String>, message: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

/// Membership gate shared by every chat operation.
async fn ensure_participant(pool: &SqlitePool, chat_id: &str, user_id: &str) -> Result<()> {
    let is_participant = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM chat_participants WHERE chat_id = ? AND user_id = ?",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    if is_participant == 0 {
        return Err(AppError::Forbidden("Not a chat participant".to_string()));
    }
    Ok(())
}

async fn touch_chat(pool: &SqlitePool, chat_id: &str) -> Result<()> {
    sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
        .bind(db::now())
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn load_messages(pool: &SqlitePool, chat_id: &str) -> Result<Vec<MessageResponse>> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "{MESSAGE_SELECT} WHERE m.chat_id = ? ORDER BY m.created_at ASC, m.rowid ASC"
    ))
    .bind(chat_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(MessageResponse::from).collect())
}

async fn load_chat(pool: &SqlitePool, chat_id: &str) -> Result<Option<ChatResponse>> {
    let Some((id, created_at, updated_at)) = sqlx::query_as::<_, (String, String, String)>(
        "SELECT id, created_at, updated_at FROM chats WHERE id = ?",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let participants = sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT u.id, u.name, u.avatar, u.role, u.city, u.first_name, u.last_name
        FROM chat_participants cp
        JOIN users u ON u.id = cp.user_id
        WHERE cp.chat_id = ?
        ORDER BY cp.rowid
        "#,
    )
    .bind(&id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|user| ParticipantResponse {
        user_id: user.id.clone(),
        user,
    })
    .collect();

    let messages = load_messages(pool, &id).await?;

    Ok(Some(ChatResponse {
        id,
        created_at,
        updated_at,
        participants,
        messages,
    }))
}

async fn list_chats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ChatResponse>>> {
    let pool = &state.db.pool;
    let chat_ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT c.id
        FROM chats c
        JOIN chat_participants cp ON cp.chat_id = c.id
        WHERE cp.user_id = ?
        ORDER BY c.updated_at DESC
        "#,
    )
    .bind(&user.id)
    .fetch_all(pool)
    .await?;

    let mut chats = Vec::with_capacity(chat_ids.len());
    for chat_id in chat_ids {
        if let Some(chat) = load_chat(pool, &chat_id).await? {
            chats.push(chat);
        }
    }

    Ok(Json(chats))
}

async fn create_or_get_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateChatRequest>,
) -> Result<Json<ChatResponse>> {
    let pool = &state.db.pool;
    let participant_id = body
        .participant_id
        .filter(|id| !id.is_empty() && *id != user.id)
        .ok_or_else(|| AppError::Validation("Invalid participant ID".to_string()))?;

    if find_role(pool, &participant_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    let mut tx = pool.begin().await?;

    // Write lock before the lookup; a concurrent first contact queues on it
    sqlx::query("UPDATE chat_participants SET user_id = user_id WHERE chat_id = ''")
        .execute(&mut *tx)
        .await?;

    let existing = sqlx::query_scalar::<_, String>(
        r#"
        SELECT a.chat_id
        FROM chat_participants a
        JOIN chat_participants b ON b.chat_id = a.chat_id
        WHERE a.user_id = ? AND b.user_id = ?
        ORDER BY a.rowid
        LIMIT 1
        "#,
    )
    .bind(&user.id)
    .bind(&participant_id)
    .fetch_optional(&mut *tx)
    .await?;

    let chat_id = match existing {
        Some(chat_id) => {
            tx.commit().await?;
            chat_id
        }
        None => {
            let chat_id = Uuid::new_v4().to_string();
            let now = db::now();

            sqlx::query("INSERT INTO chats (id, created_at, updated_at) VALUES (?, ?, ?)")
                .bind(&chat_id)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

            for member in [&user.id, &participant_id] {
                sqlx::query("INSERT INTO chat_participants (chat_id, user_id) VALUES (?, ?)")
                    .bind(&chat_id)
                    .bind(member)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            tracing::info!(chat = %chat_id, "chat created");
            chat_id
        }
    };

    let chat = load_chat(pool, &chat_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Chat {chat_id} vanished")))?;
    Ok(Json(chat))
}

async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ChatIdQuery>,
) -> Result<Json<Vec<MessageResponse>>> {
    let pool = &state.db.pool;
    let chat_id = required(query.chat_id, "Chat ID is required")?;
    ensure_participant(pool, &chat_id, &user.id).await?;

    // Reading the conversation acknowledges the other side's messages
    sqlx::query("UPDATE messages SET read = 1 WHERE chat_id = ? AND sender_id <> ? AND read = 0")
        .bind(&chat_id)
        .bind(&user.id)
        .execute(pool)
        .await?;

    Ok(Json(load_messages(pool, &chat_id).await?))
}

async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<MessageResponse>> {
    let pool = &state.db.pool;
    let (chat_id, content) = match (body.chat_id, body.content) {
        (Some(chat_id), Some(content)) if !chat_id.is_empty() && !content.trim().is_empty() => {
            (chat_id, content)
        }
        _ => {
            return Err(AppError::Validation(
                "Chat ID and content are required".to_string(),
            ))
        }
    };
    ensure_participant(pool, &chat_id, &user.id).await?;

    let message_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO messages (id, chat_id, sender_id, content, read, created_at) VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(&message_id)
    .bind(&chat_id)
    .bind(&user.id)
    .bind(&content)
    .bind(db::now())
    .execute(pool)
    .await?;

    touch_chat(pool, &chat_id).await?;

    let row = sqlx::query_as::<_, MessageRow>(&format!("{MESSAGE_SELECT} WHERE m.id = ?"))
        .bind(&message_id)
        .fetch_one(pool)
        .await?;

    Ok(Json(row.into()))
}

async fn clear_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ChatIdQuery>,
) -> Result<Json<serde_json::Value>> {
    let pool = &state.db.pool;
    let chat_id = required(body.chat_id, "Chat ID is required")?;
    ensure_participant(pool, &chat_id, &user.id).await?;

    let deleted = sqlx::query("DELETE FROM messages WHERE chat_id = ?")
        .bind(&chat_id)
        .execute(pool)
        .await?
        .rows_affected();

    touch_chat(pool, &chat_id).await?;

    tracing::info!(chat = %chat_id, user = %user.id, deleted, "chat cleared");

    Ok(Json(
        serde_json::json!({ "message": "All messages deleted successfully" }),
    ))
}

async fn set_typing(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ChatIdQuery>,
) -> Result<Json<serde_json::Value>> {
    let chat_id = required(body.chat_id, "Chat ID is required")?;
    ensure_participant(&state.db.pool, &chat_id, &user.id).await?;

    state.typing.set_typing(&chat_id, &user.id).await;

    Ok(Json(serde_json::json!({ "success": true })))
}

async fn get_typing(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ChatIdQuery>,
) -> Result<Json<TypingResponse>> {
    let chat_id = required(query.chat_id, "Chat ID is required")?;
    ensure_participant(&state.db.pool, &chat_id, &user.id).await?;

    let typing_users = state.typing.typing_users(&chat_id, &user.id).await;
    Ok(Json(TypingResponse { typing_users }))
}

async fn upload_attachment(
    State(state): State<AppState>,
    _user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read multipart field: {e}")))?
    {
        if field.name() == Some("file") {
            let file = UploadedFile::from_field(field).await?;
            let url = state.storage.save_image(&file, MAX_IMAGE_SIZE).await?;
            return Ok(Json(serde_json::json!({ "url": url })));
        }
    }

    Err(AppError::Validation("No file uploaded".to_string()))
}
