use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{types::Json as SqlJson, QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    db::{
        self,
        models::{Product, RoleDetails, Service, ServiceCategory, User, UserRole},
    },
    error::{AppError, Result},
    middleware::auth::{AuthUser, MaybeAuthUser},
    services::feed::{self, PostScope, PostView},
    AppState,
};

/// Profile pages are readable without a session.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_profile))
        .route("/:id/following", get(list_following))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/update", put(update_profile))
        .route("/services", post(replace_services))
        .route("/:id/follow", post(toggle_follow))
}

pub(crate) const USER_COLUMNS: &str = "id, email, password_hash, name, first_name, last_name, role, city, phone, avatar, banner, description, social_links, rating, is_setup_complete, has_delivery, ready_to_travel, service_area, address, working_hours, created_at";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub city: String,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub description: Option<String>,
    pub social_links: Option<serde_json::Value>,
    pub rating: f64,
    pub created_at: String,
    #[serde(flatten)]
    pub details: RoleDetails,
    pub followers_count: i64,
    pub following_count: i64,
    pub posts_count: i64,
    pub is_following: bool,
    pub services: Vec<Service>,
    pub products: Vec<Product>,
    pub posts: Vec<PostView>,
}

pub(crate) async fn find_user(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub(crate) async fn find_role(pool: &SqlitePool, id: &str) -> Result<Option<UserRole>> {
    let role = sqlx::query_scalar::<_, UserRole>("SELECT role FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(role)
}

/// Loads a profile with its counts, latest posts and role-specific listings,
/// all relative to `viewer_id`.
pub async fn load_profile(
    pool: &SqlitePool,
    user_id: &str,
    viewer_id: Option<&str>,
) -> Result<Option<ProfileResponse>> {
    let Some(user) = find_user(pool, user_id).await? else {
        return Ok(None);
    };

    let (followers_count, following_count, posts_count, is_following) =
        sqlx::query_as::<_, (i64, i64, i64, bool)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM follows WHERE following_id = ?1),
                (SELECT COUNT(*) FROM follows WHERE follower_id = ?1),
                (SELECT COUNT(*) FROM posts WHERE author_id = ?1),
                EXISTS (SELECT 1 FROM follows WHERE following_id = ?1 AND follower_id = ?2)
            "#,
        )
        .bind(&user.id)
        .bind(viewer_id)
        .fetch_one(pool)
        .await?;

    let services = if user.role == UserRole::Master {
        sqlx::query_as::<_, Service>(
            "SELECT id, master_id, category, specialization_id, title FROM services WHERE master_id = ? ORDER BY rowid",
        )
        .bind(&user.id)
        .fetch_all(pool)
        .await?
    } else {
        Vec::new()
    };

    let products = if user.role == UserRole::Shop {
        sqlx::query_as::<_, Product>(
            "SELECT id, shop_id, name, image, description, price, category, available, created_at, updated_at FROM products WHERE shop_id = ? ORDER BY created_at DESC",
        )
        .bind(&user.id)
        .fetch_all(pool)
        .await?
    } else {
        Vec::new()
    };

    let posts = feed::load_posts(
        pool,
        PostScope::Author(&user.id),
        viewer_id,
        feed::PAGE_SIZE,
        0,
    )
    .await?;

    let details = user.details();
    Ok(Some(ProfileResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        first_name: user.first_name,
        last_name: user.last_name,
        city: user.city,
        phone: user.phone,
        avatar: user.avatar,
        banner: user.banner,
        description: user.description,
        social_links: user.social_links.map(|links| links.0),
        rating: user.rating,
        created_at: user.created_at,
        details,
        followers_count,
        following_count,
        posts_count,
        is_following,
        services,
        products,
        posts,
    }))
}

async fn get_profile(
    State(state): State<AppState>,
    viewer: MaybeAuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>> {
    let profile = load_profile(&state.db.pool, &id, viewer.id())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(profile))
}

#[derive(Debug, Serialize)]
pub struct FollowCounts {
    pub followers: i64,
    pub following: i64,
}

#[derive(Debug, Serialize)]
pub struct FollowingEntry {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub city: String,
    #[serde(rename = "_count")]
    pub count: FollowCounts,
}

async fn list_following(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FollowingEntry>>> {
    let rows = sqlx::query_as::<_, (String, String, Option<String>, UserRole, String, i64, i64)>(
        r#"
        SELECT u.id, u.name, u.avatar, u.role, u.city,
               (SELECT COUNT(*) FROM follows f2 WHERE f2.following_id = u.id),
               (SELECT COUNT(*) FROM follows f3 WHERE f3.follower_id = u.id)
        FROM follows f
        JOIN users u ON u.id = f.following_id
        WHERE f.follower_id = ?
        ORDER BY f.created_at DESC
        "#,
    )
    .bind(&id)
    .fetch_all(&state.db.pool)
    .await?;

    let following = rows
        .into_iter()
        .map(
            |(id, name, avatar, role, city, followers, following)| FollowingEntry {
                id,
                name,
                avatar,
                role,
                city,
                count: FollowCounts {
                    followers,
                    following,
                },
            },
        )
        .collect();

    Ok(Json(following))
}

async fn toggle_follow(
    State(state): State<AppState>,
    user: AuthUser,
    Path(target_id): Path<String>,
) -> Result<Json<ProfileResponse>> {
    let pool = &state.db.pool;

    if target_id == user.id {
        return Err(AppError::Validation("You cannot follow yourself".to_string()));
    }

    let target_role = find_role(pool, &target_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    let requester_role = find_role(pool, &user.id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !requester_role.can_follow(target_role) {
        return Err(AppError::Forbidden(
            "Following this user is not allowed by platform rules".to_string(),
        ));
    }

    let existed = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM follows WHERE follower_id = ? AND following_id = ?",
    )
    .bind(&user.id)
    .bind(&target_id)
    .fetch_one(pool)
    .await?
        > 0;

    if existed {
        sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
            .bind(&user.id)
            .bind(&target_id)
            .execute(pool)
            .await?;
    } else {
        sqlx::query(
            "INSERT INTO follows (follower_id, following_id, created_at) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(&user.id)
        .bind(&target_id)
        .bind(db::now())
        .execute(pool)
        .await?;
    }

    tracing::debug!(follower = %user.id, following = %target_id, followed = !existed, "follow toggled");

    let mut profile = load_profile(pool, &target_id, Some(&user.id))
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    // Reported from the pre-toggle lookup rather than re-read
    profile.is_following = !existed;

    Ok(Json(profile))
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn nullable<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub first_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub last_name: Option<Option<String>>,
    pub city: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub avatar: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub banner: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub social_links: Option<Option<serde_json::Value>>,
    // Masters only
    pub ready_to_travel: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub service_area: Option<Option<serde_json::Value>>,
    // Shops only
    pub has_delivery: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub working_hours: Option<Option<String>>,
}

fn push_set<'a, T>(qb: &mut QueryBuilder<'a, Sqlite>, column: &str, value: Option<T>)
where
    T: 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite> + Send,
{
    if let Some(value) = value {
        qb.push(format!(", {column} = ")).push_bind(value);
    }
}

/// Builds the UPDATE for the fields present in `body`; `None` means "leave as is".
fn build_profile_update<'a>(
    user_id: &str,
    role: UserRole,
    body: UpdateProfileRequest,
) -> Result<QueryBuilder<'a, Sqlite>> {
    if let Some(name) = body.name.as_deref() {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Name cannot be empty".to_string()));
        }
    }

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE users SET updated_at = ");
    qb.push_bind(db::now());

    push_set(&mut qb, "name", body.name.map(|n| n.trim().to_string()));
    push_set(&mut qb, "first_name", body.first_name);
    push_set(&mut qb, "last_name", body.last_name);
    push_set(&mut qb, "city", body.city.map(|c| c.trim().to_string()));
    push_set(&mut qb, "phone", body.phone);
    push_set(&mut qb, "avatar", body.avatar);
    push_set(&mut qb, "banner", body.banner);
    push_set(&mut qb, "description", body.description);
    push_set(
        &mut qb,
        "social_links",
        body.social_links.map(|links| links.map(SqlJson)),
    );

    match role {
        UserRole::Master => {
            push_set(&mut qb, "ready_to_travel", body.ready_to_travel);
            push_set(
                &mut qb,
                "service_area",
                body.service_area.map(|area| area.map(SqlJson)),
            );
        }
        UserRole::Shop => {
            push_set(&mut qb, "has_delivery", body.has_delivery);
            push_set(&mut qb, "address", body.address);
            push_set(&mut qb, "working_hours", body.working_hours);
        }
        UserRole::Client | UserRole::Admin => {}
    }

    qb.push(" WHERE id = ").push_bind(user_id.to_string());
    Ok(qb)
}

async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>> {
    let pool = &state.db.pool;
    let role = find_role(pool, &user.id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let mut qb = build_profile_update(&user.id, role, body)?;
    qb.build().execute(pool).await?;

    let profile = load_profile(pool, &user.id, Some(&user.id))
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInput {
    pub title: String,
    pub category: ServiceCategory,
    pub specialization_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceServicesRequest {
    pub services: Vec<ServiceInput>,
}

#[derive(Debug, Serialize)]
pub struct ReplaceServicesResponse {
    pub success: bool,
    pub services: Vec<Service>,
}

async fn replace_services(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ReplaceServicesRequest>,
) -> Result<Json<ReplaceServicesResponse>> {
    let role = find_role(&state.db.pool, &user.id).await?;
    if role != Some(UserRole::Master) {
        return Err(AppError::Forbidden("Only masters can add services".to_string()));
    }
    if body.services.is_empty() {
        return Err(AppError::Validation(
            "At least one service is required".to_string(),
        ));
    }
    if body
        .services
        .iter()
        .any(|s| s.specialization_id.trim().is_empty())
    {
        return Err(AppError::Validation(
            "Every service needs a specialization".to_string(),
        ));
    }

    let mut tx = state.db.pool.begin().await?;

    sqlx::query("DELETE FROM services WHERE master_id = ?")
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;

    let mut services = Vec::with_capacity(body.services.len());
    for input in body.services {
        let service = Service {
            id: Uuid::new_v4().to_string(),
            master_id: user.id.clone(),
            category: input.category,
            specialization_id: input.specialization_id.trim().to_string(),
            title: input.title.trim().to_string(),
        };
        sqlx::query(
            "INSERT INTO services (id, master_id, category, specialization_id, title) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&service.id)
        .bind(&service.master_id)
        .bind(service.category)
        .bind(&service.specialization_id)
        .bind(&service.title)
        .execute(&mut *tx)
        .await?;
        services.push(service);
    }

    sqlx::query("UPDATE users SET is_setup_complete = 1, updated_at = ? WHERE id = ?")
        .bind(db::now())
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(master = %user.id, count = services.len(), "services replaced");

    Ok(Json(ReplaceServicesResponse {
        success: true,
        services,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_null_fields_differ() {
        let body: UpdateProfileRequest =
            serde_json::from_value(serde_json::json!({ "phone": null, "city": "Kazan" })).unwrap();
        assert_eq!(body.phone, Some(None));
        assert_eq!(body.description, None);
        assert_eq!(body.city.as_deref(), Some("Kazan"));

        let body: UpdateProfileRequest =
            serde_json::from_value(serde_json::json!({ "phone": "+7 900" })).unwrap();
        assert_eq!(body.phone, Some(Some("+7 900".to_string())));
    }

    #[test]
    fn update_skips_fields_of_other_roles() {
        let body = UpdateProfileRequest {
            has_delivery: Some(true),
            ready_to_travel: Some(true),
            ..Default::default()
        };
        let qb = build_profile_update("u1", UserRole::Client, body).unwrap();
        let sql = qb.sql();
        assert!(!sql.contains("has_delivery"));
        assert!(!sql.contains("ready_to_travel"));

        let body = UpdateProfileRequest {
            ready_to_travel: Some(true),
            ..Default::default()
        };
        let qb = build_profile_update("u1", UserRole::Master, body).unwrap();
        assert!(qb.sql().contains("ready_to_travel"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let body = UpdateProfileRequest {
            name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            build_profile_update("u1", UserRole::Client, body),
            Err(AppError::Validation(_))
        ));
    }
}
