//! Session lifecycle against a live HTTP server

use mockito::Matcher;
use serde_json::json;

use quill_lib::{commands, AuthState, ClientError, Identity, TokenPair};

use crate::test_harness::TestEnvironment;

#[tokio::test]
async fn login_persists_session_across_restart() {
    //* Given
    let mut env = TestEnvironment::new().await;
    let login = env.mock_login("alice", "A1", "R1").await;

    //* When
    let identity = commands::login(&env.state, "alice", "pw")
        .await
        .expect("login succeeds");

    //* Then
    login.assert_async().await;
    assert_eq!(identity, Identity::new("alice", Some("7".into())));

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&env.store_path).unwrap()).unwrap();
    assert_eq!(raw["accessToken"], "A1");
    assert_eq!(raw["refreshToken"], "R1");

    let restarted = env.restart();
    assert_eq!(
        restarted.session().state().await,
        AuthState::LoggedIn(identity)
    );
    assert_eq!(
        restarted.tokens().load().unwrap(),
        Some(TokenPair::new("A1", "R1"))
    );
}

#[tokio::test]
async fn wrong_password_does_not_refresh() {
    //* Given
    let mut env = TestEnvironment::new().await;
    let login = env
        .server
        .mock("POST", "/api/login/")
        .with_status(401)
        .with_body(r#"{"detail":"Invalid credentials"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = env
        .server
        .mock("POST", "/api/token/refresh/")
        .expect(0)
        .create_async()
        .await;

    //* When
    let err = commands::login(&env.state, "alice", "wrong").await.unwrap_err();

    //* Then
    login.assert_async().await;
    refresh.assert_async().await;
    assert_eq!(err.status(), Some(401));
    assert!(!env.state.session().is_logged_in().await);
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried() {
    //* Given
    let mut env = TestEnvironment::new().await;
    env.state
        .session()
        .login(Identity::new("alice", None), TokenPair::new("A1", "R1"))
        .await
        .unwrap();

    let expired = env.mock_expired("GET", "/api/profile/", "A1").await;
    let refresh = env.mock_refresh("R1", "A2", "R2").await;
    let profile = env
        .server
        .mock("GET", "/api/profile/")
        .match_header("authorization", "Bearer A2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":1,"bio":"hello","location":"Lisbon","birth_date":"1990-04-02","profile_picture":null}"#)
        .expect(1)
        .create_async()
        .await;

    //* When
    let result = commands::show_profile(&env.state).await;

    //* Then
    expired.assert_async().await;
    refresh.assert_async().await;
    profile.assert_async().await;
    assert_eq!(result.unwrap().location.as_deref(), Some("Lisbon"));
    assert_eq!(
        env.state.tokens().load().unwrap(),
        Some(TokenPair::new("A2", "R2"))
    );
}

#[tokio::test]
async fn second_unauthorized_fails_without_another_refresh() {
    //* Given
    let mut env = TestEnvironment::new().await;
    env.state
        .session()
        .login(Identity::new("alice", None), TokenPair::new("A1", "R1"))
        .await
        .unwrap();

    let first = env.mock_expired("GET", "/api/profile/", "A1").await;
    let second = env.mock_expired("GET", "/api/profile/", "A2").await;
    let refresh = env
        .server
        .mock("POST", "/api/token/refresh/")
        .with_status(200)
        .with_body(json!({"access": "A2", "refresh": "R2"}).to_string())
        .expect(1)
        .create_async()
        .await;

    //* When
    let err = env.state.api().get_profile().await.unwrap_err();

    //* Then
    first.assert_async().await;
    second.assert_async().await;
    refresh.assert_async().await;
    assert_eq!(err, ClientError::AuthenticationFailed { status: 401 });
}

#[tokio::test]
async fn rejected_refresh_logs_out() {
    //* Given
    let mut env = TestEnvironment::new().await;
    env.state
        .session()
        .login(Identity::new("alice", None), TokenPair::new("A1", "R1"))
        .await
        .unwrap();

    let _expired = env.mock_expired("GET", "/api/profile/", "A1").await;
    let refresh = env
        .server
        .mock("POST", "/api/token/refresh/")
        .with_status(401)
        .with_body(r#"{"detail":"Token is blacklisted","code":"token_not_valid"}"#)
        .expect(1)
        .create_async()
        .await;

    //* When
    let err = env.state.api().get_profile().await.unwrap_err();

    //* Then
    refresh.assert_async().await;
    assert!(matches!(err, ClientError::RefreshFailed { terminal: true, .. }));
    assert_eq!(env.state.session().state().await, AuthState::LoggedOut);
    assert_eq!(env.state.tokens().load().unwrap(), None);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&env.store_path).unwrap()).unwrap();
    assert_eq!(raw, json!({}));
    assert_eq!(env.restart().session().state().await, AuthState::LoggedOut);
}

#[tokio::test]
async fn concurrent_expired_requests_share_one_refresh() {
    //* Given
    let mut env = TestEnvironment::new().await;
    env.state
        .session()
        .login(Identity::new("alice", None), TokenPair::new("A1", "R1"))
        .await
        .unwrap();

    let _posts_expired = env.mock_expired("GET", "/api/posts/", "A1").await;
    let _profile_expired = env.mock_expired("GET", "/api/profile/", "A1").await;
    let refresh = env
        .server
        .mock("POST", "/api/token/refresh/")
        .with_status(200)
        .with_body(json!({"access": "A2", "refresh": "R2"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let posts = env
        .server
        .mock("GET", "/api/posts/")
        .match_header("authorization", "Bearer A2")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;
    let profile = env
        .server
        .mock("GET", "/api/profile/")
        .match_header("authorization", "Bearer A2")
        .with_status(200)
        .with_body(r#"{"id":1}"#)
        .create_async()
        .await;

    //* When
    let (list, me) = tokio::join!(env.state.api().list_posts(), env.state.api().get_profile());

    //* Then
    list.expect("posts after refresh");
    me.expect("profile after refresh");
    refresh.assert_async().await;
    posts.assert_async().await;
    profile.assert_async().await;
}

#[tokio::test]
async fn logout_clears_store() {
    //* Given
    let mut env = TestEnvironment::new().await;
    let _login = env.mock_login("alice", "A1", "R1").await;
    commands::login(&env.state, "alice", "pw").await.unwrap();

    //* When
    commands::logout(&env.state).await.unwrap();

    //* Then
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&env.store_path).unwrap()).unwrap();
    assert_eq!(raw, json!({}));

    // Requests now go out without credentials
    let anonymous = env
        .server
        .mock("GET", "/api/posts/")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;
    env.state.api().list_posts().await.unwrap();
    anonymous.assert_async().await;
}
