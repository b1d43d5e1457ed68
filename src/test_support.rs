//! Shared fixtures for unit tests

use std::ops::Deref;
use std::sync::Arc;

use crate::adapters::http_client::mock::MockHttpClient;
use crate::auth::storage::{KeyValueStore, MemoryStore};
use crate::auth::token::{Identity, TokenPair};
use crate::config::Config;
use crate::ClientState;

pub const API_BASE: &str = "https://api.test/api/";

/// Absolute URL of an API path
pub fn api_url(path: &str) -> String {
    format!("{}{}", API_BASE, path)
}

/// A `ClientState` over a mock transport and an in-memory store
pub struct TestStack {
    pub http: Arc<MockHttpClient>,
    pub backend: Arc<MemoryStore>,
    pub state: ClientState,
}

impl TestStack {
    pub fn new() -> Self {
        Self::build(Arc::new(MemoryStore::new()), |_| {})
    }

    pub fn with_backend(backend: Arc<MemoryStore>) -> Self {
        Self::build(backend, |_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::build(Arc::new(MemoryStore::new()), adjust)
    }

    fn build(backend: Arc<MemoryStore>, adjust: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::for_api_base(API_BASE);
        config.api.media_base_url = None;
        config.auth.refresh_interval_seconds = 15 * 60;
        config.auth.clear_on_transient_failure = true;
        adjust(&mut config);

        let http = Arc::new(MockHttpClient::new());
        let store: Arc<dyn KeyValueStore> = backend.clone();
        let state = ClientState::with_components(config, http.clone(), store)
            .expect("test client state builds");
        Self {
            http,
            backend,
            state,
        }
    }

    /// Put the session in `LoggedIn` without going through the API
    pub async fn login_as(&self, username: &str, access: &str, refresh: &str) {
        self.state
            .session()
            .login(Identity::new(username, None), TokenPair::new(access, refresh))
            .await
            .expect("test login succeeds");
    }
}

// Fields of `ClientState` are reachable as `stack.session`, `stack.api`, ...
impl Deref for TestStack {
    type Target = ClientState;

    fn deref(&self) -> &ClientState {
        &self.state
    }
}
