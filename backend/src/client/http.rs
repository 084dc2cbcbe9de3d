use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use super::{Api, ClientError, ClientResult, TokenStore};
use crate::routes::{
    auth::LoginResponse, request_types::RequestTypeResponse, requests::RequestResponse,
    users::UserResponse,
};

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// [`Api`] over HTTP; attaches the stored bearer token to every call.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenStore>,
}

impl HttpApi {
    /// `base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: &str, tokens: Arc<dyn TokenStore>) -> ClientResult<Self> {
        Self::with_client(reqwest::Client::new(), base_url, tokens)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        tokens: Arc<dyn TokenStore>,
    ) -> ClientResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    pub fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.load() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn ensure_success(response: reqwest::Response) -> ClientResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|parsed| parsed.message)
            .unwrap_or(body);
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let request = self.authorize(self.client.get(self.endpoint(path)?));
        Self::parse_response(request.send().await?).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
    ) -> ClientResult<T> {
        let request = self
            .authorize(self.client.request(method, self.endpoint(path)?))
            .json(body);
        Self::parse_response(request.send().await?).await
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn login(&self, email: &str, password: &str) -> ClientResult<LoginResponse> {
        let body = json!({ "email": email, "mot_de_passe": password });
        self.send_json(reqwest::Method::POST, "auth/login", &body).await
    }

    async fn register(&self, body: Value) -> ClientResult<LoginResponse> {
        self.send_json(reqwest::Method::POST, "auth/register", &body).await
    }

    async fn current_user(&self) -> ClientResult<UserResponse> {
        self.get("auth/me").await
    }

    async fn list_requests(&self) -> ClientResult<Vec<RequestResponse>> {
        self.get("requests").await
    }

    async fn list_request_types(&self) -> ClientResult<Vec<RequestTypeResponse>> {
        self.get("request-types").await
    }

    async fn create_request(&self, body: Value) -> ClientResult<RequestResponse> {
        self.send_json(reqwest::Method::POST, "requests", &body).await
    }

    async fn update_request(&self, id: Uuid, body: Value) -> ClientResult<RequestResponse> {
        self.send_json(reqwest::Method::PUT, &format!("requests/{id}"), &body)
            .await
    }

    async fn delete_request(&self, id: Uuid) -> ClientResult<()> {
        let request = self.authorize(self.client.delete(self.endpoint(&format!("requests/{id}"))?));
        Self::ensure_success(request.send().await?).await?;
        Ok(())
    }
}
