// Shared harness for the integration tests

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use sqlx::SqlitePool;
use vaymaster_server::{build_router, config::Config, db::Database, AppState};

pub struct TestApp {
    pub address: String,
    pub pool: SqlitePool,
    pub client: reqwest::Client,
}

pub struct TestUser {
    pub id: String,
    pub token: String,
}

/// Spawns the app on a random port against a fresh in-memory database.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let db = Database::in_memory()
        .await
        .expect("Failed to open in-memory database");
    spawn_on(db, "sqlite::memory:".to_string(), configure).await
}

/// Spawns the app against a database file with a multi-connection pool, so
/// concurrent requests really hit SQLite from separate connections.
pub async fn spawn_app_on_disk() -> TestApp {
    let dir = std::env::temp_dir().join(format!("vaymaster-db-{}", uuid::Uuid::new_v4()));
    let url = format!("sqlite:{}?mode=rwc", dir.join("test.db").display());
    let db = Database::connect(&url)
        .await
        .expect("Failed to open database file");
    spawn_on(db, url, |_| {}).await
}

async fn spawn_on(db: Database, database_url: String, configure: impl FnOnce(&mut Config)) -> TestApp {
    db.run_migrations().await.expect("Failed to migrate database");

    let upload_dir = std::env::temp_dir().join(format!("vaymaster-test-{}", uuid::Uuid::new_v4()));
    let mut config = Config {
        port: 0,
        database_url,
        upload_dir: upload_dir.to_string_lossy().into_owned(),
        jwt_secret: "integration_test_secret".to_string(),
        jwt_ttl_days: 1,
        typing_ttl: Duration::from_millis(300),
        admin_email: None,
        admin_password: None,
    };
    configure(&mut config);

    let pool = db.pool.clone();
    let state = AppState::new(db, config);
    state.storage.init().await.expect("Failed to create upload dir");
    vaymaster_server::routes::auth::seed_admin(&state)
        .await
        .expect("Failed to seed admin");
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        pool,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn register(&self, email: &str, role: &str, name: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "email": email,
                "password": "password123",
                "role": role,
                "name": name,
                "city": "Bishkek"
            }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn login(&self, email: &str, password: &str) -> TestUser {
        let body: Value = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request")
            .json()
            .await
            .unwrap();

        TestUser {
            id: body["user"]["id"].as_str().unwrap().to_string(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// Registers a user and signs them in.
    pub async fn create_user(&self, email: &str, role: &str, name: &str) -> TestUser {
        let response = self.register(email, role, name).await;
        assert_eq!(response.status().as_u16(), 200, "register {email}");
        self.login(email, "password123").await
    }

    pub async fn get(&self, user: &TestUser, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(&user.token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_json(&self, user: &TestUser, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(&user.token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn create_post(&self, user: &TestUser, content: &str) -> Value {
        let form = reqwest::multipart::Form::new().text("content", content.to_string());
        let response = self
            .client
            .post(self.url("/api/posts"))
            .bearer_auth(&user.token)
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.unwrap()
    }
}
