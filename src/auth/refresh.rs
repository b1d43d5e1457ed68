use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::adapters::http_client::{HttpClient, HttpMethod, HttpRequest, RequestBody};
use crate::auth::storage::TokenStore;
use crate::auth::token::{token_preview, AuthEvent, RefreshResponse, TokenPair};
use crate::error::{ClientError, ClientResult};

/// Relative path of the refresh endpoint
pub const REFRESH_PATH: &str = "token/refresh/";

type SharedRefresh = Shared<BoxFuture<'static, ClientResult<TokenPair>>>;

/// Told about a refresh failure that discarded the tokens, before the failure
/// is handed back to any caller.
#[async_trait::async_trait]
pub trait SessionExpiry: Send + Sync {
    async fn session_expired(&self, error: &ClientError);
}

/// Settings for the refresh protocol
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Absolute URL of `token/refresh/`
    pub refresh_url: String,
    /// Discard the tokens when the refresh endpoint cannot be reached
    pub clear_on_transient_failure: bool,
}

struct RefreshInner {
    http: Arc<dyn HttpClient>,
    tokens: Arc<TokenStore>,
    settings: RefreshSettings,
    events: broadcast::Sender<AuthEvent>,
    expiry: RwLock<Option<Weak<dyn SessionExpiry>>>,
    in_flight: Mutex<Option<(u64, SharedRefresh)>>,
    next_attempt: AtomicU64,
}

/// Exchanges the refresh token for a new pair.
///
/// At most one refresh is in flight at a time; callers arriving while one is
/// running wait for it and receive its outcome. Each attempt runs as its own
/// task, so it finishes even if every caller stops waiting.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<RefreshInner>,
}

impl RefreshCoordinator {
    /// Create a new coordinator
    pub fn new(
        http: Arc<dyn HttpClient>,
        tokens: Arc<TokenStore>,
        settings: RefreshSettings,
        events: broadcast::Sender<AuthEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                http,
                tokens,
                settings,
                events,
                expiry: RwLock::new(None),
                in_flight: Mutex::new(None),
                next_attempt: AtomicU64::new(1),
            }),
        }
    }

    /// Register the session to end when a refresh discards the tokens
    pub fn set_expiry_hook(&self, hook: Weak<dyn SessionExpiry>) {
        *self
            .inner
            .expiry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Refresh the token pair, joining an attempt already in flight
    pub async fn refresh(&self) -> ClientResult<TokenPair> {
        self.join_or_start().await
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn join_or_start(&self) -> SharedRefresh {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some((attempt, pending)) = slot.as_ref() {
            debug!(attempt, "Joining in-flight token refresh");
            return pending.clone();
        }

        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = inner.perform(attempt).await;
            inner.release(attempt);
            result
        });

        let inner = Arc::clone(&self.inner);
        let pending = async move {
            task.await.unwrap_or_else(|e| {
                error!(attempt, error = %e, "Token refresh task died");
                inner.release(attempt);
                Err(ClientError::RefreshFailed {
                    reason: format!("refresh task failed: {}", e),
                    terminal: false,
                })
            })
        }
        .boxed()
        .shared();

        *slot = Some((attempt, pending.clone()));
        pending
    }
}

impl RefreshInner {
    async fn perform(&self, attempt: u64) -> ClientResult<TokenPair> {
        let generation = self.tokens.generation();

        let refresh_token = match self.tokens.refresh_token()? {
            Some(token) => token,
            None => {
                warn!(attempt, "Token refresh requested without a refresh token");
                return Err(self.fail(ClientError::NoRefreshToken).await);
            }
        };

        info!(
            attempt,
            refresh = %token_preview(&refresh_token),
            "Refreshing access token"
        );

        let request = HttpRequest::new(HttpMethod::POST, &self.settings.refresh_url)
            .with_header("Content-Type", "application/json")
            .with_body(RequestBody::Json(json!({ "refresh": refresh_token })));

        let outcome = match self.http.execute(request).await {
            Ok(response) if response.is_success() => response
                .json::<RefreshResponse>()
                .map(|body| body.into_token_pair(&refresh_token))
                .and_then(|pair| pair.validate().map(|_| pair))
                .map_err(|e| (format!("malformed refresh response: {}", e), true)),
            Ok(response) => Err((
                format!("HTTP {}: {}", response.status(), response.body()),
                true,
            )),
            Err(ClientError::Network(message)) => {
                Err((message, self.settings.clear_on_transient_failure))
            }
            Err(other) => Err((other.to_string(), true)),
        };

        match outcome {
            Ok(pair) => {
                if !self.tokens.save_if_generation(&pair, generation)? {
                    info!(attempt, "Session changed during refresh, dropping new tokens");
                    return Err(ClientError::RefreshFailed {
                        reason: "session changed during refresh".to_string(),
                        terminal: false,
                    });
                }
                info!(
                    attempt,
                    access = %token_preview(&pair.access_token),
                    "Access token refreshed"
                );
                let _ = self.events.send(AuthEvent::TokenRefreshed { at: Utc::now() });
                Ok(pair)
            }
            Err((reason, discard)) => {
                // Another writer may have replaced the session in the meantime
                let terminal = discard && self.tokens.clear_if_generation(generation)?;
                warn!(attempt, terminal, reason = %reason, "Token refresh failed");
                Err(self.fail(ClientError::RefreshFailed { reason, terminal }).await)
            }
        }
    }

    async fn fail(&self, error: ClientError) -> ClientError {
        if error.forces_logout() {
            let hook = self
                .expiry
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .and_then(Weak::upgrade);
            if let Some(hook) = hook {
                hook.session_expired(&error).await;
            }
        }
        let _ = self.events.send(AuthEvent::RefreshFailed {
            error: error.clone(),
            at: Utc::now(),
        });
        error
    }

    fn release(&self, attempt: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.as_ref(), Some((current, _)) if *current == attempt) {
            *slot = None;
        }
    }
}
