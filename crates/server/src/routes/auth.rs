use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::{self, models::UserRole},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::profile::{load_profile, ProfileResponse},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Routes that need a session; mounted behind the auth middleware.
pub fn session_router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub role: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub exp: usize,
}

pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn create_token(user: &UserResponse, secret: &str, ttl_days: i64) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::days(ttl_days))
        .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

/// Display name from an explicit name, or first and last name joined.
fn display_name(
    name: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Option<String> {
    if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
        return Some(name.to_string());
    }
    let joined = format!(
        "{} {}",
        first_name.unwrap_or_default().trim(),
        last_name.unwrap_or_default().trim()
    );
    let joined = joined.trim();
    (!joined.is_empty()).then(|| joined.to_string())
}

/// A concurrent registration can pass the lookup and lose on the unique index.
fn duplicate_email(err: sqlx::Error) -> AppError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Validation("A user with this email already exists".to_string())
        }
        other => AppError::Database(other),
    }
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    let role = UserRole::parse(&body.role)
        .filter(|r| r.is_self_registrable())
        .ok_or_else(|| AppError::Validation("Invalid role".to_string()))?;
    let name = display_name(
        body.name.as_deref(),
        body.first_name.as_deref(),
        body.last_name.as_deref(),
    )
    .ok_or_else(|| AppError::Validation("Name is required".to_string()))?;

    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(&state.db.pool)
        .await?;

    if existing > 0 {
        return Err(AppError::Validation(
            "A user with this email already exists".to_string(),
        ));
    }

    let password_hash = hash_password(&body.password)?;
    let user_id = Uuid::new_v4().to_string();
    let now = db::now();

    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, name, first_name, last_name, role, city, phone, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user_id)
    .bind(&email)
    .bind(&password_hash)
    .bind(&name)
    .bind(&body.first_name)
    .bind(&body.last_name)
    .bind(role)
    .bind(body.city.as_deref().unwrap_or_default().trim())
    .bind(&body.phone)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await
    .map_err(duplicate_email)?;

    tracing::info!(user_id = %user_id, role = role.as_str(), "user registered");

    Ok(Json(RegisterResponse {
        success: true,
        role,
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = sqlx::query_as::<_, (String, String, String, UserRole, String)>(
        "SELECT id, email, name, role, password_hash FROM users WHERE email = ?",
    )
    .bind(body.email.trim().to_lowercase())
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    let (id, email, name, role, password_hash) = user;

    if !verify_password(&body.password, &password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let user = UserResponse {
        id,
        email,
        name,
        role,
    };
    let token = create_token(&user, &state.config.jwt_secret, state.config.jwt_ttl_days)?;

    Ok(Json(AuthResponse { token, user }))
}

async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<ProfileResponse>> {
    let profile = load_profile(&state.db.pool, &user.id, Some(&user.id))
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(profile))
}

/// Creates the configured admin account unless that email is already taken.
pub async fn seed_admin(state: &AppState) -> Result<()> {
    let (Some(email), Some(password)) = (&state.config.admin_email, &state.config.admin_password)
    else {
        return Ok(());
    };
    let email = email.trim().to_lowercase();

    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(&state.db.pool)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let now = db::now();
    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, name, role, is_setup_complete, created_at, updated_at)
        VALUES (?, ?, ?, 'Admin', 'ADMIN', 1, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&email)
    .bind(hash_password(password)?)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(email = %email, "seeded admin user");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_explicit_name() {
        assert_eq!(
            display_name(Some(" Ivan "), Some("A"), Some("B")).as_deref(),
            Some("Ivan")
        );
        assert_eq!(
            display_name(None, Some("Anna"), Some("Petrova")).as_deref(),
            Some("Anna Petrova")
        );
        assert_eq!(display_name(Some(""), None, Some("Petrova")).as_deref(), Some("Petrova"));
        assert_eq!(display_name(None, None, None), None);
    }

    #[tokio::test]
    async fn email_collision_on_insert_is_a_validation_error() {
        let db = crate::db::Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let insert = |id: &'static str| {
            sqlx::query(
                "INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at) VALUES (?, 'same@example.com', 'x', 'N', 'CLIENT', '', '')",
            )
            .bind(id)
        };
        insert("u1").execute(&db.pool).await.unwrap();
        let err = insert("u2")
            .execute(&db.pool)
            .await
            .map_err(duplicate_email)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("already exists")));

        assert!(matches!(
            duplicate_email(sqlx::Error::RowNotFound),
            AppError::Database(_)
        ));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }
}
