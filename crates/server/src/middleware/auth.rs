use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use sqlx::SqlitePool;

use crate::{
    db::models::UserRole,
    error::{AppError, Result},
    routes::auth::Claims,
    AppState,
};

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

fn decode_claims(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Resolves a token to its user. The account must still exist; identity and
/// role come from the live row rather than the token.
async fn authenticate(pool: &SqlitePool, token: &str, secret: &str) -> Result<Option<AuthUser>> {
    let Some(claims) = decode_claims(token, secret) else {
        return Ok(None);
    };

    let user = sqlx::query_as::<_, (String, String, String, UserRole)>(
        "SELECT id, email, name, role FROM users WHERE id = ?",
    )
    .bind(&claims.sub)
    .fetch_optional(pool)
    .await?
    .map(|(id, email, name, role)| AuthUser {
        id,
        email,
        name,
        role,
    });

    Ok(user)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AppError::Unauthorized)?;
    let user = authenticate(&state.db.pool, bearer.token(), &state.config.jwt_secret)
        .await?
        .ok_or(AppError::Unauthorized)?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Must run after `auth_middleware`.
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AppError::Unauthorized)?;

    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    Ok(next.run(request).await)
}

// Extractor for getting the authenticated user from request extensions
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// Caller identity on public routes. A missing or invalid token yields an
/// anonymous caller instead of a rejection.
#[derive(Clone, Debug)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    pub fn id(&self) -> Option<&str> {
        self.0.as_ref().map(|u| u.id.as_str())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = Option::<TypedHeader<Authorization<Bearer>>>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::Unauthorized)?;

        let user = match bearer {
            Some(TypedHeader(Authorization(b))) => {
                authenticate(&state.db.pool, b.token(), &state.config.jwt_secret).await?
            }
            None => None,
        };

        Ok(MaybeAuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "middleware_test_secret";

    fn token_for(id: &str, role: UserRole) -> String {
        let claims = Claims {
            sub: id.to_string(),
            email: "old@example.com".to_string(),
            name: "Old Name".to_string(),
            role,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn identity_comes_from_the_stored_account() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let token = token_for("u1", UserRole::Client);
        assert!(authenticate(&db.pool, &token, SECRET).await.unwrap().is_none());

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at) VALUES ('u1', 'new@example.com', 'x', 'New Name', 'MASTER', '', '')",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let user = authenticate(&db.pool, &token, SECRET).await.unwrap().unwrap();
        assert_eq!(user.role, UserRole::Master);
        assert_eq!(user.email, "new@example.com");
        assert_eq!(user.name, "New Name");

        assert!(authenticate(&db.pool, &token, "other_secret").await.unwrap().is_none());
        assert!(authenticate(&db.pool, "garbage", SECRET).await.unwrap().is_none());
    }
}
