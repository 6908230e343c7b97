use std::{env, time::Duration};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub upload_dir: String,
    pub jwt_secret: String,
    pub jwt_ttl_days: i64,
    /// How long a typing notification stays active.
    pub typing_ttl: Duration,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/vaymaster.db?mode=rwc".to_string()),
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "./data/uploads".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            jwt_ttl_days: env::var("JWT_TTL_DAYS")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(7),
            typing_ttl: Duration::from_millis(
                env::var("TYPING_TTL_MS")
                    .ok()
                    .and_then(|ms| ms.parse().ok())
                    .unwrap_or(3000),
            ),
            admin_email: env::var("ADMIN_EMAIL").ok().filter(|v| !v.is_empty()),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|v| !v.is_empty()),
        }
    }
}
