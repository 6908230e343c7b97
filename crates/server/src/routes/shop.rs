use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::{
        self,
        models::{Product, ProductCategory, UserRole},
    },
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

const PRODUCT_COLUMNS: &str =
    "id, shop_id, name, image, description, price, category, available, created_at, updated_at";

/// Product management for the signed-in shop.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_own_products).post(create_product))
        .route("/products/:id", put(update_product).delete(delete_product))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/:id/products", get(list_shop_products))
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub category: Option<ProductCategory>,
    #[serde(default)]
    pub available: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub image: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub category: Option<ProductCategory>,
    pub available: Option<bool>,
}

fn require_shop(user: &AuthUser) -> Result<()> {
    if user.role != UserRole::Shop {
        return Err(AppError::Forbidden(
            "Only shops can manage products".to_string(),
        ));
    }
    Ok(())
}

fn validate_price(price: Option<f64>) -> Result<()> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => {
            Err(AppError::Validation("Price must be a non-negative number".to_string()))
        }
        _ => Ok(()),
    }
}

async fn find_own_product(pool: &SqlitePool, id: &str, shop_id: &str) -> Result<Product> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ? AND shop_id = ?"
    ))
    .bind(id)
    .bind(shop_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Product not found".to_string()))
}

async fn list_own_products(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Product>>> {
    require_shop(&user)?;

    let products = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE shop_id = ? ORDER BY created_at DESC"
    ))
    .bind(&user.id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(products))
}

async fn list_shop_products(
    State(state): State<AppState>,
    Path(shop_id): Path<String>,
) -> Result<Json<Vec<Product>>> {
    let role = sqlx::query_scalar::<_, UserRole>("SELECT role FROM users WHERE id = ?")
        .bind(&shop_id)
        .fetch_optional(&state.db.pool)
        .await?;
    if role != Some(UserRole::Shop) {
        return Err(AppError::NotFound("Shop not found".to_string()));
    }

    let products = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE shop_id = ? AND available = 1 ORDER BY created_at DESC"
    ))
    .bind(&shop_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(products))
}

async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>)> {
    require_shop(&user)?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Product name is required".to_string()));
    }
    validate_price(body.price)?;

    let id = Uuid::new_v4().to_string();
    let now = db::now();

    sqlx::query(
        r#"
        INSERT INTO products (id, shop_id, name, image, description, price, category, available, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&user.id)
    .bind(name)
    .bind(body.image.unwrap_or_default())
    .bind(&body.description)
    .bind(body.price)
    .bind(body.category)
    .bind(body.available.unwrap_or(true))
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(shop = %user.id, product = %id, "product created");

    let product = find_own_product(&state.db.pool, &id, &user.id).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateProductRequest>,
) -> Result<Json<Product>> {
    require_shop(&user)?;
    let existing = find_own_product(&state.db.pool, &id, &user.id).await?;

    let name = match body.name {
        Some(name) if name.trim().is_empty() => {
            return Err(AppError::Validation("Product name is required".to_string()))
        }
        Some(name) => name.trim().to_string(),
        None => existing.name,
    };
    validate_price(body.price)?;

    sqlx::query(
        r#"
        UPDATE products
        SET name = ?, image = ?, description = ?, price = ?, category = ?, available = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(name)
    .bind(body.image.unwrap_or(existing.image))
    .bind(body.description.or(existing.description))
    .bind(body.price.or(existing.price))
    .bind(body.category.or(existing.category))
    .bind(body.available.unwrap_or(existing.available))
    .bind(db::now())
    .bind(&id)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(find_own_product(&state.db.pool, &id, &user.id).await?))
}

async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    require_shop(&user)?;

    let result = sqlx::query("DELETE FROM products WHERE id = ? AND shop_id = ?")
        .bind(&id)
        .bind(&user.id)
        .execute(&state.db.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Product not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
