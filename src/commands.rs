//! Validated entry points for user actions.
//!
//! Each handler checks its input and the session before touching the API, so
//! callers never see a request go out for input that was bound to fail.

use serde_json::Value;
use tracing::{info, warn};

use crate::api::pagination::Page;
use crate::api::types::{Post, PostDraft, Profile, ProfileUpdate, RegisteredUser, Registration};
use crate::auth::token::{Credentials, Identity};
use crate::error::{ClientError, ClientResult};
use crate::ClientState;

/// Log in and start a session
pub async fn login(state: &ClientState, username: &str, password: &str) -> ClientResult<Identity> {
    let credentials = Credentials::new(username.trim(), password)?;
    let response = state.api().login(&credentials).await?;

    let identity = Identity::new(credentials.username.clone(), response.user_id.clone());
    state
        .session()
        .login(identity.clone(), response.token_pair())
        .await?;
    Ok(identity)
}

/// Create an account. Does not log in.
pub async fn register(
    state: &ClientState,
    registration: &Registration,
) -> ClientResult<RegisteredUser> {
    registration.validate()?;
    match state.api().register(registration).await {
        Ok(user) => {
            info!(username = %user.username, "Account registered");
            Ok(user)
        }
        Err(ClientError::Api { status, body }) => match first_field_error(&body, "username") {
            Some(message) => Err(ClientError::Validation(message)),
            None => Err(ClientError::Api { status, body }),
        },
        Err(e) => Err(e),
    }
}

/// End the session
pub async fn logout(state: &ClientState) -> ClientResult<()> {
    state.session().logout().await
}

/// The logged-in identity, if any
pub async fn whoami(state: &ClientState) -> Option<Identity> {
    state.session().current_identity().await
}

/// One page of the post listing
pub async fn list_posts(state: &ClientState, page: usize, per_page: usize) -> ClientResult<Page<Post>> {
    state.api().list_posts_page(page, per_page).await
}

pub async fn show_post(state: &ClientState, id: u64) -> ClientResult<Post> {
    state.api().get_post(id).await
}

pub async fn create_post(state: &ClientState, draft: &PostDraft) -> ClientResult<Post> {
    draft.validate()?;
    state.session().require_identity().await?;
    let post = state.api().create_post(draft).await?;
    info!(post_id = post.id, "Post created");
    Ok(post)
}

/// Replace a post's content. Only its author may edit it.
pub async fn update_post(state: &ClientState, id: u64, draft: &PostDraft) -> ClientResult<Post> {
    draft.validate()?;
    let identity = state.session().require_identity().await?;
    let existing = owned_post(state, id, &identity).await?;

    // Full updates must carry the author back
    let mut draft = draft.clone();
    if draft.author.is_none() {
        draft.author = existing.author;
    }
    let post = state.api().update_post(id, &draft).await?;
    info!(post_id = post.id, "Post updated");
    Ok(post)
}

/// Delete a post. Only its author may delete it.
pub async fn delete_post(state: &ClientState, id: u64) -> ClientResult<()> {
    let identity = state.session().require_identity().await?;
    owned_post(state, id, &identity).await?;
    state.api().delete_post(id).await?;
    info!(post_id = id, "Post deleted");
    Ok(())
}

pub async fn show_profile(state: &ClientState) -> ClientResult<Profile> {
    state.session().require_identity().await?;
    state.api().get_profile().await
}

pub async fn update_profile(state: &ClientState, update: &ProfileUpdate) -> ClientResult<Profile> {
    state.session().require_identity().await?;
    state.api().update_profile(update).await
}

async fn owned_post(state: &ClientState, id: u64, identity: &Identity) -> ClientResult<Post> {
    let post = state.api().get_post(id).await?;
    if post.author_username.is_some() && !post.is_authored_by(identity) {
        warn!(post_id = id, username = %identity.username, "Refusing to modify another user's post");
        return Err(ClientError::validation(
            "only the author can modify this post",
        ));
    }
    Ok(post)
}

/// First message for `field` in a `{"field": ["message", ...]}` error body
fn first_field_error(body: &str, field: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    match parsed.get(field)? {
        Value::Array(messages) => messages.first()?.as_str().map(str::to_string),
        Value::String(message) => Some(message.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http_client::{HttpMethod, RequestBody};
    use crate::auth::token::{AuthState, TokenPair};
    use crate::test_support::{api_url, TestStack};
    use serde_json::json;

    fn post_by(id: u64, author: &str) -> Value {
        json!({
            "id": id,
            "title": "Title",
            "content": "Body",
            "author": 1,
            "author_username": author
        })
    }

    #[tokio::test]
    async fn test_login_scenario() {
        let stack = TestStack::new();
        stack.http.mock_json(
            api_url("login/"),
            200,
            &json!({"access": "A1", "refresh": "R1", "userId": 7}),
        );

        let identity = login(&stack, "alice", "pw").await.unwrap();
        assert_eq!(identity, Identity::new("alice", Some("7".into())));
        assert_eq!(stack.session.state().await, AuthState::LoggedIn(identity));
        assert_eq!(stack.tokens.load().unwrap(), Some(TokenPair::new("A1", "R1")));
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let stack = TestStack::new();
        assert!(matches!(
            login(&stack, "", "pw").await,
            Err(ClientError::Validation(_))
        ));
        assert!(stack.http.get_requests().is_empty());

        stack.http.mock_response(
            api_url("login/"),
            401,
            r#"{"detail":"Invalid credentials"}"#,
        );
        let err = login(&stack, "alice", "wrong").await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(stack.http.request_count(&api_url("token/refresh/")), 0);
        assert!(!stack.session.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_register_surfaces_username_error() {
        let stack = TestStack::new();
        stack.http.mock_response(
            api_url("register/"),
            400,
            r#"{"username":["A user with that username already exists."]}"#,
        );

        let err = register(&stack, &Registration::new("alice", "a@example.com", "pw"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::Validation("A user with that username already exists.".into())
        );

        let request = &stack.http.requests_to(&api_url("register/"))[0];
        assert!(matches!(&request.body, RequestBody::Multipart(form) if form.text_value("email") == Some("a@example.com")));
    }

    #[tokio::test]
    async fn test_register_passes_other_errors_through() {
        let stack = TestStack::new();
        stack
            .http
            .mock_response(api_url("register/"), 400, r#"{"email":["Enter a valid email address."]}"#);

        let err = register(&stack, &Registration::new("alice", "nope", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));

        assert!(matches!(
            register(&stack, &Registration::new("alice", "", "pw")).await,
            Err(ClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_post_commands_require_session() {
        let stack = TestStack::new();
        let draft = PostDraft::new("Title", "Body");

        assert_eq!(
            create_post(&stack, &draft).await.unwrap_err(),
            ClientError::NotAuthenticated
        );
        assert_eq!(
            delete_post(&stack, 1).await.unwrap_err(),
            ClientError::NotAuthenticated
        );
        assert_eq!(
            update_profile(&stack, &ProfileUpdate::default()).await.unwrap_err(),
            ClientError::NotAuthenticated
        );
        assert!(stack.http.get_requests().is_empty());

        // Input is checked before the session
        assert!(matches!(
            create_post(&stack, &PostDraft::new("Title", "")).await,
            Err(ClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_post_carries_author() {
        let stack = TestStack::new();
        stack.login_as("alice", "A1", "R1").await;
        stack.http.mock_json(api_url("posts/3/"), 200, &post_by(3, "alice"));

        update_post(&stack, 3, &PostDraft::new("New", "Body"))
            .await
            .unwrap();

        let requests = stack.http.requests_to(&api_url("posts/3/"));
        assert_eq!(requests[1].method, HttpMethod::PUT);
        assert!(matches!(&requests[1].body, RequestBody::Multipart(form) if form.text_value("author") == Some("1")));
    }

    #[tokio::test]
    async fn test_only_author_may_modify_post() {
        let stack = TestStack::new();
        stack.login_as("bob", "A1", "R1").await;
        stack.http.mock_json(api_url("posts/3/"), 200, &post_by(3, "alice"));

        assert!(matches!(
            delete_post(&stack, 3).await,
            Err(ClientError::Validation(_))
        ));
        let methods: Vec<_> = stack
            .http
            .requests_to(&api_url("posts/3/"))
            .iter()
            .map(|r| r.method)
            .collect();
        assert_eq!(methods, vec![HttpMethod::GET]);
    }

    #[tokio::test]
    async fn test_logout_command() {
        let stack = TestStack::new();
        stack.login_as("alice", "A1", "R1").await;
        assert!(whoami(&stack).await.is_some());

        logout(&stack).await.unwrap();
        assert_eq!(whoami(&stack).await, None);
    }

    #[test]
    fn test_first_field_error() {
        assert_eq!(
            first_field_error(r#"{"username":["taken","too short"]}"#, "username"),
            Some("taken".to_string())
        );
        assert_eq!(first_field_error(r#"{"email":["bad"]}"#, "username"), None);
        assert_eq!(first_field_error("<html>", "username"), None);
    }
}
