use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

// Export modules
pub mod adapters;
pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod serde_utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use adapters::{HttpClient, ReqwestHttpClient};
pub use api::{ApiRequest, AuthenticatedClient, BlogApi, Page};
pub use auth::{
    AuthEvent, AuthState, Credentials, FileStore, Identity, KeyValueStore, LogoutReason,
    MemoryStore, RefreshCoordinator, SessionContext, TokenPair, TokenStore,
};
pub use config::{Config, ConfigManager};
pub use error::{ClientError, ClientResult, ErrorCategory, ErrorCode};

use auth::refresh::RefreshSettings;
use auth::storage::IdentityCache;

/// Capacity of the auth event channel
pub const AUTH_EVENT_CAPACITY: usize = 64;

/// Everything one process needs to talk to the blog API.
///
/// Wires the transport, durable store, refresh coordinator, authenticated
/// client and session context together.
pub struct ClientState {
    config: Config,
    tokens: Arc<TokenStore>,
    client: Arc<AuthenticatedClient>,
    api: BlogApi,
    session: Arc<SessionContext>,
}

impl ClientState {
    /// Build the production stack: reqwest transport and the on-disk store
    pub fn new(config: Config) -> ClientResult<Self> {
        config.validate()?;
        let http: Arc<dyn HttpClient> =
            Arc::new(ReqwestHttpClient::with_timeout(config.http_timeout())?);
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.storage.path)?);
        Self::with_components(config, http, store)
    }

    /// Build the stack over a given transport and store
    pub fn with_components(
        config: Config,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn KeyValueStore>,
    ) -> ClientResult<Self> {
        let base_url = config.api_base_url()?;
        let media_base = config.media_base_url()?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        let tokens = Arc::new(TokenStore::new(Arc::clone(&store)));
        let refresher = RefreshCoordinator::new(
            Arc::clone(&http),
            Arc::clone(&tokens),
            RefreshSettings {
                refresh_url: config.refresh_url()?.to_string(),
                clear_on_transient_failure: config.auth.clear_on_transient_failure,
            },
            events.clone(),
        );
        let client = Arc::new(AuthenticatedClient::new(
            http,
            base_url.clone(),
            Arc::clone(&tokens),
            refresher.clone(),
        ));
        let session = Arc::new(SessionContext::new(
            Arc::clone(&tokens),
            IdentityCache::new(store),
            Arc::clone(&client),
            refresher,
            events,
            config.refresh_interval(),
        )?);
        let api = BlogApi::new(Arc::clone(&client), media_base);

        info!(base_url = %base_url, "Client state initialized");

        Ok(Self {
            config,
            tokens,
            client,
            api,
            session,
        })
    }

    /// Start background session maintenance
    pub fn start(&self) {
        self.session.start();
    }

    /// Stop background session maintenance
    pub fn shutdown(&self) {
        self.session.shutdown();
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.session.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &BlogApi {
        &self.api
    }

    pub fn client(&self) -> &Arc<AuthenticatedClient> {
        &self.client
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }
}
