use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;
use sqlx::{types::Json as SqlJson, SqlitePool};
use uuid::Uuid;

use crate::{
    db::{self, models::Banner},
    error::{AppError, Result},
    routes::profile::nullable,
    AppState,
};

/// Banner slots on the home page.
pub const BANNER_POSITIONS: std::ops::RangeInclusive<i64> = 1..=7;

const BANNER_COLUMNS: &str =
    "id, position, image, link, images, links, active, mobile_only, created_at, updated_at";

pub fn public_router() -> Router<AppState> {
    Router::new().route("/", get(list_active_banners))
}

/// Mounted under the admin guard.
pub fn admin_router() -> Router<AppState> {
    Router::new().route(
        "/",
        get(list_banners)
            .post(upsert_banner)
            .put(update_banner)
            .delete(delete_banner),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerInput {
    pub id: Option<String>,
    pub position: Option<i64>,
    pub image: Option<String>,
    pub link: Option<String>,
    pub images: Option<Vec<String>>,
    pub links: Option<Vec<String>>,
    pub active: Option<bool>,
    pub mobile_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBannerRequest {
    pub id: Option<String>,
}

fn check_position(position: i64) -> Result<()> {
    if !BANNER_POSITIONS.contains(&position) {
        return Err(AppError::Validation(format!(
            "Position must be between {} and {}",
            BANNER_POSITIONS.start(),
            BANNER_POSITIONS.end()
        )));
    }
    Ok(())
}

async fn find_banner(pool: &SqlitePool, id: &str) -> Result<Option<Banner>> {
    let banner = sqlx::query_as::<_, Banner>(&format!(
        "SELECT {BANNER_COLUMNS} FROM banners WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(banner)
}

async fn list_active_banners(State(state): State<AppState>) -> Result<Json<Vec<Banner>>> {
    let banners = sqlx::query_as::<_, Banner>(&format!(
        "SELECT {BANNER_COLUMNS} FROM banners WHERE active = 1 ORDER BY position ASC"
    ))
    .fetch_all(&state.db.pool)
    .await?;
    Ok(Json(banners))
}

async fn list_banners(State(state): State<AppState>) -> Result<Json<Vec<Banner>>> {
    let banners = sqlx::query_as::<_, Banner>(&format!(
        "SELECT {BANNER_COLUMNS} FROM banners ORDER BY position ASC"
    ))
    .fetch_all(&state.db.pool)
    .await?;
    Ok(Json(banners))
}

/// Creates the banner for a slot, or updates the one already there. An
/// occupied slot keeps its banner id and any field the request leaves out.
pub(crate) async fn upsert_at_position(pool: &SqlitePool, input: BannerInput) -> Result<Banner> {
    let position = input
        .position
        .ok_or_else(|| AppError::Validation("Position is required".to_string()))?;
    check_position(position)?;

    sqlx::query(
        r#"
        INSERT INTO banners (id, position, image, link, images, links, active, mobile_only, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, COALESCE(?5, '[]'), COALESCE(?6, '[]'), COALESCE(?7, 1), COALESCE(?8, 0), ?9, ?9)
        ON CONFLICT(position) DO UPDATE SET
            image = COALESCE(?3, image),
            link = COALESCE(?4, link),
            images = COALESCE(?5, images),
            links = COALESCE(?6, links),
            active = COALESCE(?7, active),
            mobile_only = COALESCE(?8, mobile_only),
            updated_at = ?9
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(position)
    .bind(&input.image)
    .bind(&input.link)
    .bind(input.images.map(SqlJson))
    .bind(input.links.map(SqlJson))
    .bind(input.active)
    .bind(input.mobile_only)
    .bind(db::now())
    .execute(pool)
    .await?;

    let banner = sqlx::query_as::<_, Banner>(&format!(
        "SELECT {BANNER_COLUMNS} FROM banners WHERE position = ?"
    ))
    .bind(position)
    .fetch_one(pool)
    .await?;

    tracing::info!(banner = %banner.id, position, "banner saved");
    Ok(banner)
}

async fn upsert_banner(
    State(state): State<AppState>,
    Json(body): Json<BannerInput>,
) -> Result<Json<Banner>> {
    Ok(Json(upsert_at_position(&state.db.pool, body).await?))
}

/// Edit of an existing banner. `image` and `link` may be sent as `null` to clear them.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerUpdate {
    pub id: Option<String>,
    pub position: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub image: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub link: Option<Option<String>>,
    pub images: Option<Vec<String>>,
    pub links: Option<Vec<String>>,
    pub active: Option<bool>,
    pub mobile_only: Option<bool>,
}

pub(crate) async fn update_by_id(pool: &SqlitePool, input: BannerUpdate) -> Result<Banner> {
    let id = input
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("ID required".to_string()))?;

    let existing = find_banner(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Banner not found".to_string()))?;

    if let Some(position) = input.position.filter(|p| *p != existing.position) {
        check_position(position)?;
        let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM banners WHERE position = ?")
            .bind(position)
            .fetch_one(pool)
            .await?;
        if taken > 0 {
            return Err(AppError::Validation("Position is already taken".to_string()));
        }
    }

    sqlx::query(
        r#"
        UPDATE banners
        SET position = ?, image = ?, link = ?, images = ?, links = ?, active = ?, mobile_only = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(input.position.unwrap_or(existing.position))
    .bind(input.image.unwrap_or(existing.image))
    .bind(input.link.unwrap_or(existing.link))
    .bind(input.images.map(SqlJson).unwrap_or(existing.images))
    .bind(input.links.map(SqlJson).unwrap_or(existing.links))
    .bind(input.active.unwrap_or(existing.active))
    .bind(input.mobile_only.unwrap_or(existing.mobile_only))
    .bind(db::now())
    .bind(id)
    .execute(pool)
    .await?;

    find_banner(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Banner not found".to_string()))
}

async fn update_banner(
    State(state): State<AppState>,
    Json(body): Json<BannerUpdate>,
) -> Result<Json<Banner>> {
    Ok(Json(update_by_id(&state.db.pool, body).await?))
}

async fn delete_banner(
    State(state): State<AppState>,
    Json(body): Json<DeleteBannerRequest>,
) -> Result<Json<serde_json::Value>> {
    let id = body
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("ID required".to_string()))?;

    let result = sqlx::query("DELETE FROM banners WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Banner not found".to_string()));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn positions_are_bounded() {
        assert!(check_position(1).is_ok());
        assert!(check_position(7).is_ok());
        assert!(check_position(0).is_err());
        assert!(check_position(8).is_err());
    }

    #[tokio::test]
    async fn upsert_keeps_id_of_occupied_slot() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let first = upsert_at_position(
            &db.pool,
            BannerInput {
                position: Some(3),
                image: Some("/uploads/a.png".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let second = upsert_at_position(
            &db.pool,
            BannerInput {
                position: Some(3),
                link: Some("https://example.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.image.as_deref(), Some("/uploads/a.png"));
        assert_eq!(second.link.as_deref(), Some("https://example.com"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM banners")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn explicit_null_differs_from_absent() {
        let update: BannerUpdate =
            serde_json::from_str(r#"{"id":"b1","image":null}"#).unwrap();
        assert_eq!(update.image, Some(None));
        assert_eq!(update.link, None);
    }

    #[tokio::test]
    async fn update_can_clear_image_and_link() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let banner = upsert_at_position(
            &db.pool,
            BannerInput {
                position: Some(2),
                image: Some("/uploads/b.png".into()),
                link: Some("https://example.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let cleared = update_by_id(
            &db.pool,
            BannerUpdate {
                id: Some(banner.id.clone()),
                image: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(cleared.image, None);
        assert_eq!(cleared.link.as_deref(), Some("https://example.com"));
        assert_eq!(cleared.position, 2);

        let cleared = update_by_id(
            &db.pool,
            BannerUpdate {
                id: Some(banner.id),
                link: Some(None),
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(cleared.link, None);
        assert!(!cleared.active);
    }
}
