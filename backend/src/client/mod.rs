//! Client-side state services for front ends talking to the REST API.
//!
//! [`AuthSession`], [`RequestsStore`] and [`NotificationCenter`] hold the
//! state a UI needs between calls. The first two reach the server only
//! through the [`Api`] trait; [`HttpApi`] is the network implementation.

pub mod http;
pub mod notifications;
pub mod requests_store;
pub mod session;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::routes::{
    auth::LoginResponse, request_types::RequestTypeResponse, requests::RequestResponse,
    users::UserResponse,
};

pub use http::HttpApi;
pub use notifications::{Notification, NotificationCenter, NotificationKind};
pub use requests_store::{NewRequestInput, RequestFilters, RequestsStore};
pub use session::{AuthSession, FileTokenStore, MemoryTokenStore, TokenStore};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid API URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("token store failed: {0}")]
    TokenStore(#[from] std::io::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// The subset of the REST API the client services use.
#[async_trait]
pub trait Api: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> ClientResult<LoginResponse>;

    async fn register(&self, body: Value) -> ClientResult<LoginResponse>;

    async fn current_user(&self) -> ClientResult<UserResponse>;

    async fn list_requests(&self) -> ClientResult<Vec<RequestResponse>>;

    async fn list_request_types(&self) -> ClientResult<Vec<RequestTypeResponse>>;

    async fn create_request(&self, body: Value) -> ClientResult<RequestResponse>;

    async fn update_request(&self, id: Uuid, body: Value) -> ClientResult<RequestResponse>;

    async fn delete_request(&self, id: Uuid) -> ClientResult<()>;
}
