//! Integration test harness for Quill
//! Runs the real client stack against a mockito server and an on-disk store

use std::path::PathBuf;

use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;
use tempfile::TempDir;

use quill_lib::{ClientState, Config};

/// Mock API server plus a client wired to it
pub struct TestEnvironment {
    /// Mock blog API
    pub server: ServerGuard,
    /// Client under test
    pub state: ClientState,
    /// Session store location
    pub store_path: PathBuf,
    _dir: TempDir,
}

impl TestEnvironment {
    /// Create a new test environment
    pub async fn new() -> Self {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().expect("temp dir");
        let store_path = dir.path().join("session.json");

        let config = config_for(&server, &store_path);
        let state = ClientState::new(config).expect("client state");

        Self {
            server,
            state,
            store_path,
            _dir: dir,
        }
    }

    /// A second client over the same store, as after a process restart
    pub fn restart(&self) -> ClientState {
        ClientState::new(config_for(&self.server, &self.store_path)).expect("client state")
    }

    /// Mock a successful login for `username`
    pub async fn mock_login(&mut self, username: &str, access: &str, refresh: &str) -> Mock {
        self.server
            .mock("POST", "/api/login/")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::PartialJson(json!({ "username": username })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "access": access, "refresh": refresh, "userId": 7 }).to_string())
            .create_async()
            .await
    }

    /// Mock the refresh endpoint exchanging `old_refresh` for a new pair
    pub async fn mock_refresh(
        &mut self,
        old_refresh: &str,
        access: &str,
        refresh: &str,
    ) -> Mock {
        self.server
            .mock("POST", "/api/token/refresh/")
            .match_body(Matcher::Json(json!({ "refresh": old_refresh })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "access": access, "refresh": refresh }).to_string())
            .create_async()
            .await
    }

    /// Mock `path` answering 401 to requests carrying `token`
    pub async fn mock_expired(&mut self, method: &str, path: &str, token: &str) -> Mock {
        self.server
            .mock(method, path)
            .match_header("authorization", format!("Bearer {}", token).as_str())
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail":"Given token not valid for any token type","code":"token_not_valid"}"#)
            .create_async()
            .await
    }
}

fn config_for(server: &ServerGuard, store_path: &PathBuf) -> Config {
    let mut config = Config::for_api_base(format!("{}/api/", server.url()));
    config.api.media_base_url = None;
    config.api.timeout_seconds = 5;
    config.auth.clear_on_transient_failure = true;
    config.storage.path = store_path.clone();
    config
}

/// Minimal post payload as the API renders it
pub fn post_json(id: u64, title: &str, author: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "content": "<p>body</p>",
        "tags": "rust",
        "image": format!("/media/blog_images/{}.png", id),
        "author": 1,
        "author_username": author,
        "created_at": "2024-09-01T10:00:00.000000Z",
        "updated_at": "2024-09-01T10:00:00.000000Z"
    })
}
