use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::client::AuthenticatedClient;
use crate::auth::refresh::{RefreshCoordinator, SessionExpiry};
use crate::auth::storage::{IdentityCache, TokenStore};
use crate::auth::token::{AuthEvent, AuthState, Identity, LogoutReason, TokenPair};
use crate::error::{ClientError, ClientResult};

struct SessionInner {
    state: RwLock<AuthState>,
    tokens: Arc<TokenStore>,
    identities: IdentityCache,
    client: Arc<AuthenticatedClient>,
    refresher: RefreshCoordinator,
    events: broadcast::Sender<AuthEvent>,
    refresh_interval: Duration,
}

/// Process-wide session state.
///
/// Owns the logged-in identity and the token lifecycle, and runs the periodic
/// background refresh while logged in. A refresh that discards the tokens ends
/// the session before its error reaches any caller. The background task stops
/// on `shutdown` or when the context is dropped.
pub struct SessionContext {
    inner: Arc<SessionInner>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionContext {
    /// Create the context, restoring a session persisted by an earlier run
    pub fn new(
        tokens: Arc<TokenStore>,
        identities: IdentityCache,
        client: Arc<AuthenticatedClient>,
        refresher: RefreshCoordinator,
        events: broadcast::Sender<AuthEvent>,
        refresh_interval: Duration,
    ) -> ClientResult<Self> {
        let initial = restore(&tokens, &identities, &client)?;

        let inner = Arc::new(SessionInner {
            state: RwLock::new(initial),
            tokens,
            identities,
            client,
            refresher,
            events,
            refresh_interval,
        });
        let hook: Weak<dyn SessionExpiry> = Arc::downgrade(&inner) as Weak<SessionInner>;
        inner.refresher.set_expiry_hook(hook);

        Ok(Self {
            inner,
            refresh_task: Mutex::new(None),
        })
    }

    /// Current state
    pub async fn state(&self) -> AuthState {
        self.inner.state.read().await.clone()
    }

    /// The logged-in identity, if any
    pub async fn current_identity(&self) -> Option<Identity> {
        self.inner.state.read().await.identity().cloned()
    }

    pub async fn is_logged_in(&self) -> bool {
        matches!(*self.inner.state.read().await, AuthState::LoggedIn(_))
    }

    /// Guard for operations that need a session
    pub async fn require_identity(&self) -> ClientResult<Identity> {
        self.current_identity()
            .await
            .ok_or(ClientError::NotAuthenticated)
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Start a session: persist the pair, cache the identity and switch to
    /// `LoggedIn`.
    pub async fn login(&self, identity: Identity, pair: TokenPair) -> ClientResult<()> {
        pair.validate()?;
        let inner = &self.inner;
        let mut state = inner.state.write().await;

        inner.tokens.save(&pair)?;
        if let Err(e) = inner.identities.save(&identity) {
            // Never leave tokens without the identity they belong to
            if let Err(rollback) = inner.tokens.clear() {
                error!(error = %rollback, "Failed to roll back tokens after login error");
            }
            return Err(e);
        }
        inner.client.set_auth_token(Some(pair.access_token.clone()));
        *state = AuthState::LoggedIn(identity.clone());
        drop(state);

        info!(username = %identity.username, "Logged in");
        let _ = inner.events.send(AuthEvent::LoggedIn {
            identity,
            at: Utc::now(),
        });
        Ok(())
    }

    /// End the session. Idempotent.
    pub async fn logout(&self) -> ClientResult<()> {
        let state = self.inner.state.write().await;
        self.inner.end_session(state, LogoutReason::UserRequested)
    }

    /// Start the periodic refresh. Calling it again while running is a no-op.
    pub fn start_background_refresh(&self) {
        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Background refresh already running");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = inner.refresh_interval;
        info!(interval_secs = period.as_secs(), "Starting background token refresh");

        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.refresh_tick().await;
            }
        }));
    }

    /// Start background session maintenance
    pub fn start(&self) {
        self.start_background_refresh();
    }

    /// Stop the background refresh. In-flight refreshes run to completion.
    pub fn shutdown(&self) {
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            debug!("Background token refresh stopped");
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SessionInner {
    async fn refresh_tick(&self) {
        let logged_in = matches!(*self.state.read().await, AuthState::LoggedIn(_));
        if !logged_in {
            debug!("Not logged in, skipping scheduled refresh");
            return;
        }

        // Terminal failures have already ended the session through the hook
        match self.refresher.refresh().await {
            Ok(_) => debug!("Scheduled token refresh succeeded"),
            Err(e) if e.forces_logout() => {
                warn!(error = %e, "Scheduled token refresh ended the session")
            }
            Err(e) => warn!(error = %e, "Scheduled token refresh failed, keeping session"),
        }
    }

    /// Forced logout after the refresh coordinator discarded the tokens.
    ///
    /// Skipped when tokens are present again, i.e. a new login happened after
    /// the failure.
    async fn expire_session(&self) -> ClientResult<()> {
        let state = self.state.write().await;
        if self.tokens.load()?.is_some() {
            debug!("Session was replaced after refresh failure, keeping it");
            return Ok(());
        }
        self.end_session(state, LogoutReason::SessionExpired)
    }

    fn end_session(
        &self,
        mut state: RwLockWriteGuard<'_, AuthState>,
        reason: LogoutReason,
    ) -> ClientResult<()> {
        let was_logged_in = matches!(*state, AuthState::LoggedIn(_));
        *state = AuthState::LoggedOut;
        self.client.set_auth_token(None);
        let cleared = self.tokens.clear().and(self.identities.clear());
        drop(state);

        if was_logged_in {
            info!(reason = ?reason, "Logged out");
            let _ = self.events.send(AuthEvent::LoggedOut {
                reason,
                at: Utc::now(),
            });
        }
        cleared
    }
}

#[async_trait::async_trait]
impl SessionExpiry for SessionInner {
    async fn session_expired(&self, error: &ClientError) {
        info!(error = %error, "Token refresh discarded the session, logging out");
        if let Err(e) = self.expire_session().await {
            error!(error = %e, "Failed to end expired session");
        }
    }
}

fn restore(
    tokens: &TokenStore,
    identities: &IdentityCache,
    client: &AuthenticatedClient,
) -> ClientResult<AuthState> {
    let pair = tokens.load()?;
    let identity = identities.load().unwrap_or_else(|e| {
        warn!(error = %e, "Discarding unreadable cached identity");
        None
    });

    match (identity, pair) {
        (Some(identity), Some(pair)) => {
            info!(username = %identity.username, "Restored session from storage");
            client.set_auth_token(Some(pair.access_token));
            Ok(AuthState::LoggedIn(identity))
        }
        (identity, pair) => {
            if identity.is_some() || pair.is_some() {
                warn!("Found an incomplete session in storage, clearing it");
            }
            // Also drops half-written token pairs that `load` ignored
            tokens.clear()?;
            identities.clear()?;
            Ok(AuthState::LoggedOut)
        }
    }
}
