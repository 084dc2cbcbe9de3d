use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::{Api, ClientResult};
use crate::routes::users::UserResponse;

/// Where the bearer token lives between runs.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;

    fn save(&self, token: &str) -> io::Result<()>;

    fn clear(&self) -> io::Result<()>;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, token: &str) -> io::Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Keeps the token in a single file; a missing or empty file means no token.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .map(|contents| contents.trim().to_string())
            .filter(|token| !token.is_empty())
    }

    fn save(&self, token: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)
    }

    fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// The signed-in user and their token.
pub struct AuthSession {
    api: Arc<dyn Api>,
    tokens: Arc<dyn TokenStore>,
    user: Option<UserResponse>,
    last_error: Option<String>,
}

impl AuthSession {
    pub fn new(api: Arc<dyn Api>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            api,
            tokens,
            user: None,
            last_error: None,
        }
    }

    pub fn user(&self) -> Option<&UserResponse> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Reloads the user behind a stored token. A rejected token leaves the
    /// session signed out but keeps the token in the store.
    pub async fn restore(&mut self) -> Option<&UserResponse> {
        if self.tokens.load().is_none() {
            self.user = None;
            return None;
        }
        match self.api.current_user().await {
            Ok(user) => self.user = Some(user),
            Err(err) => {
                tracing::debug!(error = %err, "stored token rejected");
                self.user = None;
            }
        }
        self.user.as_ref()
    }

    pub async fn login(&mut self, email: &str, password: &str) -> ClientResult<UserResponse> {
        self.last_error = None;
        match self.api.login(email, password).await {
            Ok(response) => {
                self.tokens.save(&response.token)?;
                self.user = Some(response.user.clone());
                Ok(response.user)
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.user = None;
                Err(err)
            }
        }
    }

    pub async fn register(&mut self, body: Value) -> ClientResult<UserResponse> {
        self.last_error = None;
        match self.api.register(body).await {
            Ok(response) => {
                self.tokens.save(&response.token)?;
                self.user = Some(response.user.clone());
                Ok(response.user)
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.user = None;
                Err(err)
            }
        }
    }

    pub fn logout(&mut self) -> ClientResult<()> {
        self.user = None;
        self.tokens.clear()?;
        Ok(())
    }
}
