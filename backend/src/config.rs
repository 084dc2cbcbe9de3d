use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/gestion_requetes";
pub const DEFAULT_JWT_SECRET: &str = "secret";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_days: i64,
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub cors_allowed_origin: Option<String>,
}

impl AppConfig {
    /// Built-in settings used when the environment does not override them.
    pub fn defaults() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            database_max_pool_size: DEFAULT_MAX_POOL_SIZE,
            server_host: "0.0.0.0".to_string(),
            server_port: 5000,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_issuer: "campus-requests".to_string(),
            jwt_audience: "campus-requests-clients".to_string(),
            jwt_expiry_days: 7,
            uploads_dir: PathBuf::from("uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            cors_allowed_origin: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::defaults();

        let database_url = env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(defaults.database_max_pool_size);
        let server_host = env::var("SERVER_HOST").unwrap_or(defaults.server_host);
        let server_port = match env::var("PORT").or_else(|_| env::var("SERVER_PORT")) {
            Ok(value) => value.parse().context("PORT must be a valid u16")?,
            Err(_) => defaults.server_port,
        };
        let jwt_secret = env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret);
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer);
        let jwt_audience = env::var("JWT_AUDIENCE").unwrap_or(defaults.jwt_audience);
        let jwt_expiry_days = match env::var("JWT_EXPIRY_DAYS") {
            Ok(value) => value
                .parse()
                .context("JWT_EXPIRY_DAYS must be an integer")?,
            Err(_) => defaults.jwt_expiry_days,
        };
        let uploads_dir = env::var("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.uploads_dir);
        let max_upload_bytes = match env::var("MAX_UPLOAD_BYTES") {
            Ok(value) => value
                .parse()
                .context("MAX_UPLOAD_BYTES must be an integer")?,
            Err(_) => defaults.max_upload_bytes,
        };
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_days,
            uploads_dir,
            max_upload_bytes,
            cors_allowed_origin,
        })
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
