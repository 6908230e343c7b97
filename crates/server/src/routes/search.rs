use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::{types::Json as SqlJson, QueryBuilder, Sqlite, SqlitePool};

use crate::{
    db::models::{Product, ProductCategory, Service, ServiceCategory, UserRole},
    error::{AppError, Result},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/masters", get(search_masters))
        .route("/shops", get(search_shops))
}

#[derive(Debug, Default, Deserialize)]
pub struct MasterSearchQuery {
    pub query: Option<String>,
    pub category: Option<String>,
    pub specialization: Option<String>,
    pub city: Option<String>,
    pub rating: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopSearchQuery {
    pub name: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "productType")]
    pub product: Option<String>,
    pub city: Option<String>,
    pub rating: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterResult {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub city: String,
    pub phone: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub rating: f64,
    pub social_links: Option<serde_json::Value>,
    pub services: Vec<Service>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopResult {
    pub id: String,
    pub name: String,
    pub city: String,
    pub logo: Option<String>,
    pub rating: f64,
    pub categories: Vec<ProductCategory>,
    pub address: Option<String>,
    pub working_hours: Option<String>,
    pub has_delivery: bool,
    pub in_stock: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct MasterRow {
    id: String,
    name: String,
    email: String,
    city: String,
    phone: Option<String>,
    description: Option<String>,
    avatar: Option<String>,
    rating: f64,
    social_links: Option<SqlJson<serde_json::Value>>,
}

#[derive(sqlx::FromRow)]
struct ShopRow {
    id: String,
    name: String,
    city: String,
    avatar: Option<String>,
    rating: f64,
    address: Option<String>,
    working_hours: Option<String>,
    has_delivery: bool,
}

/// A present, non-blank query parameter.
fn filter_value(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_enum<T: DeserializeOwned>(value: &Option<String>, what: &str) -> Result<Option<T>> {
    filter_value(value)
        .map(|v| {
            serde_json::from_value(serde_json::Value::String(v.to_ascii_uppercase()))
                .map_err(|_| AppError::Validation(format!("Unknown {what}")))
        })
        .transpose()
}

/// Minimum rating; `0` imposes no constraint.
fn parse_min_rating(value: &Option<String>) -> Result<Option<f64>> {
    let Some(raw) = filter_value(value) else {
        return Ok(None);
    };
    let rating: f64 = raw
        .parse()
        .map_err(|_| AppError::Validation("Invalid rating".to_string()))?;
    Ok((rating > 0.0).then_some(rating))
}

/// Case-insensitive substring match that also folds non-ASCII letters.
fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

async fn services_by_master(
    pool: &SqlitePool,
    master_ids: &[String],
) -> Result<HashMap<String, Vec<Service>>> {
    let mut by_master: HashMap<String, Vec<Service>> = HashMap::new();
    if master_ids.is_empty() {
        return Ok(by_master);
    }

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, master_id, category, specialization_id, title FROM services WHERE master_id IN (",
    );
    let mut ids = qb.separated(", ");
    for id in master_ids {
        ids.push_bind(id.clone());
    }
    ids.push_unseparated(") ORDER BY rowid");

    for service in qb.build_query_as::<Service>().fetch_all(pool).await? {
        by_master
            .entry(service.master_id.clone())
            .or_default()
            .push(service);
    }
    Ok(by_master)
}

async fn products_by_shop(
    pool: &SqlitePool,
    shop_ids: &[String],
) -> Result<HashMap<String, Vec<Product>>> {
    let mut by_shop: HashMap<String, Vec<Product>> = HashMap::new();
    if shop_ids.is_empty() {
        return Ok(by_shop);
    }

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, shop_id, name, image, description, price, category, available, created_at, updated_at FROM products WHERE shop_id IN (",
    );
    let mut ids = qb.separated(", ");
    for id in shop_ids {
        ids.push_bind(id.clone());
    }
    ids.push_unseparated(") ORDER BY created_at");

    for product in qb.build_query_as::<Product>().fetch_all(pool).await? {
        by_shop.entry(product.shop_id.clone()).or_default().push(product);
    }
    Ok(by_shop)
}

pub(crate) async fn find_masters(
    pool: &SqlitePool,
    query: &MasterSearchQuery,
) -> Result<Vec<MasterResult>> {
    let category: Option<ServiceCategory> = parse_enum(&query.category, "category")?;
    let specialization = filter_value(&query.specialization);
    let min_rating = parse_min_rating(&query.rating)?;
    let text = filter_value(&query.query);
    let city = filter_value(&query.city);

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT u.id, u.name, u.email, u.city, u.phone, u.description, u.avatar, u.rating, u.social_links FROM users u WHERE u.role = 'MASTER'",
    );
    if let Some(rating) = min_rating {
        qb.push(" AND u.rating >= ").push_bind(rating);
    }
    if specialization.is_some() || category.is_some() {
        qb.push(" AND EXISTS (SELECT 1 FROM services s WHERE s.master_id = u.id");
        if let Some(specialization) = specialization {
            qb.push(" AND s.specialization_id = ")
                .push_bind(specialization.to_string());
        }
        if let Some(category) = category {
            qb.push(" AND s.category = ").push_bind(category);
        }
        qb.push(")");
    }
    qb.push(" ORDER BY u.rating DESC, u.name ASC");

    let rows = qb.build_query_as::<MasterRow>().fetch_all(pool).await?;
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut services = services_by_master(pool, &ids).await?;

    let masters = rows
        .into_iter()
        .filter_map(|row| {
            // Masters who never declared services are not listed
            let services = services.remove(&row.id).filter(|s| !s.is_empty())?;

            if let Some(city) = city {
                if !contains_ci(&row.city, city) {
                    return None;
                }
            }
            if let Some(text) = text {
                let matches = contains_ci(&row.name, text)
                    || services.iter().any(|s| contains_ci(&s.title, text));
                if !matches {
                    return None;
                }
            }

            Some(MasterResult {
                id: row.id,
                name: row.name,
                email: row.email,
                role: UserRole::Master,
                city: row.city,
                phone: row.phone,
                description: row.description,
                avatar: row.avatar,
                rating: row.rating,
                social_links: row.social_links.map(|links| links.0),
                services,
            })
        })
        .collect();

    Ok(masters)
}

async fn search_masters(
    State(state): State<AppState>,
    Query(query): Query<MasterSearchQuery>,
) -> Result<Json<Vec<MasterResult>>> {
    let masters = find_masters(&state.db.pool, &query).await?;
    tracing::debug!(?query, found = masters.len(), "master search");
    Ok(Json(masters))
}

pub(crate) async fn find_shops(pool: &SqlitePool, query: &ShopSearchQuery) -> Result<Vec<ShopResult>> {
    let category: Option<ProductCategory> = parse_enum(&query.category, "category")?;
    let min_rating = parse_min_rating(&query.rating)?;
    let name = filter_value(&query.name);
    let product = filter_value(&query.product);
    let city = filter_value(&query.city);

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT u.id, u.name, u.city, u.avatar, u.rating, u.address, u.working_hours, u.has_delivery FROM users u WHERE u.role = 'SHOP'",
    );
    if let Some(rating) = min_rating {
        qb.push(" AND u.rating >= ").push_bind(rating);
    }
    if let Some(category) = category {
        qb.push(" AND EXISTS (SELECT 1 FROM products p WHERE p.shop_id = u.id AND p.category = ")
            .push_bind(category)
            .push(")");
    }
    qb.push(" ORDER BY u.rating DESC, u.name ASC");

    let rows = qb.build_query_as::<ShopRow>().fetch_all(pool).await?;
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut products = products_by_shop(pool, &ids).await?;

    let shops = rows
        .into_iter()
        .filter_map(|row| {
            let products = products.remove(&row.id).unwrap_or_default();

            if name.is_some_and(|name| !contains_ci(&row.name, name))
                || city.is_some_and(|city| !contains_ci(&row.city, city))
            {
                return None;
            }
            if let Some(product) = product {
                if !products.iter().any(|p| contains_ci(&p.name, product)) {
                    return None;
                }
            }

            let mut categories: Vec<ProductCategory> = Vec::new();
            for category in products.iter().filter_map(|p| p.category) {
                if !categories.contains(&category) {
                    categories.push(category);
                }
            }
            let in_stock = products
                .into_iter()
                .filter(|p| p.available)
                .map(|p| p.name)
                .collect();

            Some(ShopResult {
                id: row.id,
                name: row.name,
                city: row.city,
                logo: row.avatar,
                rating: row.rating,
                categories,
                address: row.address,
                working_hours: row.working_hours,
                has_delivery: row.has_delivery,
                in_stock,
            })
        })
        .collect();

    Ok(shops)
}

async fn search_shops(
    State(state): State<AppState>,
    Query(query): Query<ShopSearchQuery>,
) -> Result<Json<Vec<ShopResult>>> {
    let shops = find_shops(&state.db.pool, &query).await?;
    tracing::debug!(?query, found = shops.len(), "shop search");
    Ok(Json(shops))
}
