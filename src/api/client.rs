use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::http_client::{
    HttpClient, HttpMethod, HttpRequest, MultipartForm, RequestBody, SimpleHttpResponse,
};
use crate::auth::refresh::RefreshCoordinator;
use crate::auth::storage::TokenStore;
use crate::auth::token::bearer;
use crate::error::{ClientError, ClientResult};

/// Which dispatch of a logical request this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Original dispatch
    First,
    /// The single re-dispatch after a 401
    Retry,
}

/// A request relative to the API base URL.
///
/// The body is owned and cloneable so the request can be sent a second time
/// after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: RequestBody,
    /// Refresh the token and retry once when the API answers 401
    pub refresh_on_unauthorized: bool,
}

impl ApiRequest {
    /// Create a new request
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: RequestBody::Empty,
            refresh_on_unauthorized: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::DELETE, path)
    }

    /// Set a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Serialize `value` as the JSON body
    pub fn with_json<T: Serialize>(self, value: &T) -> ClientResult<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.with_body(RequestBody::Json(value)))
    }

    /// Use a multipart form as the body
    pub fn with_form(self, form: MultipartForm) -> Self {
        self.with_body(RequestBody::Multipart(form))
    }

    /// Surface a 401 as-is instead of refreshing the session
    pub fn skip_auth_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }
}

/// HTTP client that authenticates requests with the stored access token and
/// recovers from an expired token by refreshing it once.
pub struct AuthenticatedClient {
    http: Arc<dyn HttpClient>,
    base_url: Url,
    tokens: Arc<TokenStore>,
    refresher: RefreshCoordinator,
    /// Fallback `Authorization` token used when the store holds none
    default_token: RwLock<Option<String>>,
}

impl AuthenticatedClient {
    /// Create a new client. `base_url` should end with `/`.
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: Url,
        tokens: Arc<TokenStore>,
        refresher: RefreshCoordinator,
    ) -> Self {
        Self {
            http,
            base_url,
            tokens,
            refresher,
            default_token: RwLock::new(None),
        }
    }

    /// API base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path against the API base
    pub fn url_for(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::validation(format!("invalid request path '{}': {}", path, e)))
    }

    /// Set or remove the default bearer token
    pub fn set_auth_token(&self, token: Option<String>) {
        let mut default_token = self
            .default_token
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *default_token = token;
    }

    /// Send a request, refreshing the session and retrying once on 401.
    ///
    /// Non-2xx responses are returned as `ClientError::Api`.
    pub async fn send(&self, request: ApiRequest) -> ClientResult<SimpleHttpResponse> {
        let url = self.url_for(&request.path)?;
        let request_id = Uuid::new_v4();

        let mut token = self.current_token()?;
        let mut attempt = Attempt::First;

        loop {
            let response = self
                .dispatch(&request, &url, token.as_deref(), attempt, request_id)
                .await?;

            if !response.is_unauthorized() {
                return into_result(response);
            }

            match attempt {
                Attempt::Retry => {
                    warn!(
                        request_id = %request_id,
                        path = %request.path,
                        "Request still unauthorized after token refresh"
                    );
                    return Err(ClientError::AuthenticationFailed {
                        status: response.status(),
                    });
                }
                Attempt::First if !request.refresh_on_unauthorized => {
                    return into_result(response);
                }
                Attempt::First => {
                    info!(
                        request_id = %request_id,
                        path = %request.path,
                        "Request unauthorized, refreshing session"
                    );
                    token = Some(self.token_for_retry(token.as_deref(), request_id).await?);
                    attempt = Attempt::Retry;
                }
            }
        }
    }

    /// GET a path
    pub async fn get(&self, path: &str) -> ClientResult<SimpleHttpResponse> {
        self.send(ApiRequest::get(path)).await
    }

    /// POST a body to a path
    pub async fn post(&self, path: &str, body: RequestBody) -> ClientResult<SimpleHttpResponse> {
        self.send(ApiRequest::post(path).with_body(body)).await
    }

    /// PUT a body to a path
    pub async fn put(&self, path: &str, body: RequestBody) -> ClientResult<SimpleHttpResponse> {
        self.send(ApiRequest::put(path).with_body(body)).await
    }

    /// DELETE a path
    pub async fn delete(&self, path: &str) -> ClientResult<SimpleHttpResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    /// GET a path and decode the JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    /// Send a request and decode the JSON response
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> ClientResult<T> {
        self.send(request).await?.json()
    }

    fn current_token(&self) -> ClientResult<Option<String>> {
        if let Some(token) = self.tokens.access_token()? {
            return Ok(Some(token));
        }
        let default_token = self
            .default_token
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(default_token.clone())
    }

    /// Token to retry with: the stored one if another request already
    /// refreshed it, otherwise a freshly refreshed one.
    async fn token_for_retry(&self, sent: Option<&str>, request_id: Uuid) -> ClientResult<String> {
        if let Some(stored) = self.tokens.access_token()? {
            if Some(stored.as_str()) != sent {
                debug!(
                    request_id = %request_id,
                    "Access token changed since dispatch, retrying without refresh"
                );
                return Ok(stored);
            }
        }

        let pair = self.refresher.refresh().await?;
        Ok(pair.access_token)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        url: &Url,
        token: Option<&str>,
        attempt: Attempt,
        request_id: Uuid,
    ) -> ClientResult<SimpleHttpResponse> {
        let mut outgoing = HttpRequest::new(request.method, url.as_str())
            .with_body(request.body.clone());
        outgoing.headers = request.headers.clone();
        if matches!(request.body, RequestBody::Json(_)) && outgoing.header("Content-Type").is_none()
        {
            outgoing = outgoing.with_header("Content-Type", "application/json");
        }
        outgoing
            .headers
            .retain(|name, _| !name.eq_ignore_ascii_case("Authorization"));
        if let Some(token) = token {
            outgoing = outgoing.with_header("Authorization", bearer(token));
        }

        debug!(
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
            attempt = ?attempt,
            authenticated = token.is_some(),
            "Dispatching API request"
        );

        let response = self.http.execute(outgoing).await.map_err(|e| {
            warn!(request_id = %request_id, error = %e, "API request failed");
            e
        })?;

        debug!(
            request_id = %request_id,
            status = response.status(),
            "API response received"
        );
        Ok(response)
    }
}

fn into_result(response: SimpleHttpResponse) -> ClientResult<SimpleHttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        let status = response.status();
        Err(ClientError::api(status, response.text()))
    }
}
