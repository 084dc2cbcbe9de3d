use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use campus_requests::auth::{jwt::JwtService, password, roles::Role};
use campus_requests::config::AppConfig;
use campus_requests::db::{self, PgPool, MIGRATIONS};
use campus_requests::models::{NewDocument, NewRequestType, NewUser, USER_STATUS_ACTIVE};
use campus_requests::routes;
use campus_requests::schema::{documents, request_types, users};
use campus_requests::state::AppState;
use campus_requests::storage::{FileStorage, LocalDiskStorage};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl FileStorage for FakeStorage {
    async fn put_file(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let path = format!("memory://{name}");
        self.files.lock().await.insert(path.clone(), bytes);
        Ok(path)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("file {path} missing"))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.files.lock().await.remove(path);
        Ok(())
    }

    fn is_stored_path(&self, path: &str) -> bool {
        path.strip_prefix("memory://")
            .is_some_and(|name| !name.is_empty() && !name.contains('/'))
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn file_count(&self) -> usize {
        self.files.lock().await.len()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let storage = Arc::new(FakeStorage::default());
        Self::build(storage.clone(), storage).await
    }

    /// Same app, but files go to a real uploads directory under `root`.
    #[allow(dead_code)]
    pub async fn with_local_disk(root: &Path) -> Result<Self> {
        let disk: Arc<dyn FileStorage> = Arc::new(LocalDiskStorage::new(root).await?);
        Self::build(disk, Arc::new(FakeStorage::default())).await
    }

    async fn build(file_storage: Arc<dyn FileStorage>, storage: Arc<FakeStorage>) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            uploads_dir: PathBuf::from("unused-test-uploads"),
            ..AppConfig::defaults()
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, file_storage, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_user(&self, email: &str, password_value: &str, role: Role) -> Result<Uuid> {
        let email = email.trim().to_lowercase();
        let password_value = password_value.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                matricule: format!("M-{}", &Uuid::new_v4().simple().to_string()[..8]),
                last_name: "Test".to_string(),
                first_name: role.as_str().to_string(),
                email,
                phone: None,
                password_hash: password::hash_password(&password_value)?,
                role: role.as_str().to_string(),
                faculty: None,
                department: None,
                status: USER_STATUS_ACTIVE.to_string(),
            };
            diesel::insert_into(users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_request_type(&self, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let row = NewRequestType {
                id: Uuid::new_v4(),
                name,
                description: None,
                standard_delay_days: 7,
                required_documents: vec!["Carte étudiant".to_string()],
                form_schema: None,
            };
            diesel::insert_into(request_types::table)
                .values(&row)
                .execute(conn)
                .context("failed to insert request type")?;
            Ok(row.id)
        })
        .await
    }

    /// Writes a document row directly, bypassing the route's path checks.
    #[allow(dead_code)]
    pub async fn insert_document_row(&self, storage_path: &str) -> Result<Uuid> {
        let storage_path = storage_path.to_string();
        self.with_conn(move |conn| {
            let row = NewDocument {
                id: Uuid::new_v4(),
                filename: "legacy.pdf".to_string(),
                storage_path,
                mime_type: "application/pdf".to_string(),
                size_bytes: 0,
                request_id: None,
                uploaded_by: None,
            };
            diesel::insert_into(documents::table)
                .values(&row)
                .execute(conn)
                .context("failed to insert document")?;
            Ok(row.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn document_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            documents::table
                .count()
                .get_result(conn)
                .context("failed to count documents")
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password_value: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/auth/login",
                &json!({ "email": email, "mot_de_passe": password_value }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        let body = json_body(response).await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response has no token"))
    }

    /// Inserts a user with `role` and returns its id and a fresh token.
    #[allow(dead_code)]
    pub async fn user_with_token(&self, email: &str, role: Role) -> Result<(Uuid, String)> {
        let id = self.insert_user(email, "password-123", role).await?;
        let token = self.login_token(email, "password-123").await?;
        Ok((id, token))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::POST, path, Some(body), token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::PUT, path, Some(body), token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(Method::PATCH, path, Some(body), token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn upload_document(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        request_id: Option<Uuid>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");

        if let Some(request_id) = request_id {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"requete_id\"\r\n\r\n");
            body.extend(request_id.to_string().as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/documents/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE status_history, message_documents, messages, request_documents, documents, requests, request_types, users CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
