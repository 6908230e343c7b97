use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;

use services::{
    storage::{StorageService, MAX_REQUEST_BODY},
    typing::{InMemoryTypingStore, TypingStore},
};

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    pub storage: StorageService,
    pub typing: Arc<dyn TypingStore>,
}

impl AppState {
    pub fn new(db: db::Database, config: config::Config) -> Self {
        let storage = StorageService::new(&config.upload_dir);
        let typing = Arc::new(InMemoryTypingStore::new(config.typing_ttl));

        Self {
            db,
            config,
            storage,
            typing,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Routes that require a session
    let protected_routes = Router::new()
        .nest("/auth", routes::auth::session_router())
        .nest("/profile", routes::profile::router())
        .nest(
            "/posts",
            routes::posts::router().merge(routes::comments::post_router()),
        )
        .nest("/comments", routes::comments::router())
        .nest("/chat", routes::chat::router())
        .nest("/global-chat", routes::global_chat::router())
        .nest("/shop", routes::shop::router())
        .nest("/upload", routes::uploads::router())
        .nest(
            "/admin",
            routes::admin::router().route_layer(axum_middleware::from_fn(
                middleware::auth::admin_middleware,
            )),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let public_routes = Router::new()
        .nest("/auth", routes::auth::router())
        .nest("/profile", routes::profile::public_router())
        .nest("/search", routes::search::router())
        .nest("/ads", routes::ads::public_router())
        .nest("/feedback", routes::feedback::router())
        .nest("/shop", routes::shop::public_router());

    let api_router = public_routes.merge(protected_routes);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .nest_service("/uploads", ServeDir::new(state.storage.base_path()))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY)),
        )
}

async fn health_check() -> &'static str {
    "OK"
}
