//! Blog endpoints over real HTTP

use chrono::NaiveDate;
use mockito::Matcher;
use serde_json::json;

use quill_lib::api::{PostDraft, ProfileUpdate, Registration, Upload};
use quill_lib::{commands, ClientError, Identity, TokenPair};

use crate::test_harness::{post_json, TestEnvironment};

async fn logged_in_env() -> TestEnvironment {
    let env = TestEnvironment::new().await;
    env.state
        .session()
        .login(Identity::new("alice", None), TokenPair::new("A1", "R1"))
        .await
        .unwrap();
    env
}

#[tokio::test]
async fn list_posts_paginates_client_side() {
    //* Given
    let mut env = TestEnvironment::new().await;
    let posts: Vec<_> = (1..=12)
        .map(|id| post_json(id, &format!("Post {}", id), "alice"))
        .collect();
    let list = env
        .server
        .mock("GET", "/api/posts/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::to_string(&posts).unwrap())
        .expect(2)
        .create_async()
        .await;

    //* When
    let third = commands::list_posts(&env.state, 3, 5).await.unwrap();
    let beyond = commands::list_posts(&env.state, 4, 5).await.unwrap();

    //* Then
    list.assert_async().await;
    assert_eq!(third.items.iter().map(|p| p.id).collect::<Vec<_>>(), vec![11, 12]);
    assert_eq!(third.total_pages, 3);
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total_items, 12);

    let image = third.items[0].image.as_deref().unwrap();
    assert_eq!(
        env.state.api().media_url(image).unwrap().as_str(),
        format!("{}/media/blog_images/11.png", env.server.url())
    );
}

#[tokio::test]
async fn create_post_sends_multipart_form() {
    //* Given
    let mut env = logged_in_env().await;
    let create = env
        .server
        .mock("POST", "/api/posts/")
        .match_header("authorization", "Bearer A1")
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data; boundary=".to_string()),
        )
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="title""#.to_string()),
            Matcher::Regex("Hello world".to_string()),
            Matcher::Regex(r#"filename="cat.png""#.to_string()),
        ]))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(post_json(21, "Hello world", "alice").to_string())
        .expect(1)
        .create_async()
        .await;

    let draft = PostDraft::new("Hello world", "<p>First post</p>")
        .with_tags("intro")
        .with_image(Upload::new("cat.png", Some("image/png".into()), b"\x89PNG".to_vec()));

    //* When
    let post = commands::create_post(&env.state, &draft).await.unwrap();

    //* Then
    create.assert_async().await;
    assert_eq!(post.id, 21);
}

#[tokio::test]
async fn delete_post_checks_author_first() {
    //* Given
    let mut env = logged_in_env().await;
    let fetch = env
        .server
        .mock("GET", "/api/posts/5/")
        .with_status(200)
        .with_body(post_json(5, "Mine", "alice").to_string())
        .expect(1)
        .create_async()
        .await;
    let delete = env
        .server
        .mock("DELETE", "/api/posts/5/")
        .match_header("authorization", "Bearer A1")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    //* When
    commands::delete_post(&env.state, 5).await.unwrap();

    //* Then
    fetch.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn forbidden_update_passes_through() {
    //* Given
    let mut env = logged_in_env().await;
    let _fetch = env
        .server
        .mock("GET", "/api/posts/5/")
        .with_status(200)
        .with_body(json!({"id": 5, "title": "Mine", "content": "x", "author": 1}).to_string())
        .create_async()
        .await;
    let _update = env
        .server
        .mock("PUT", "/api/posts/5/")
        .with_status(403)
        .with_body(r#"{"detail":"You do not have permission to edit this post."}"#)
        .create_async()
        .await;

    //* When
    let err = commands::update_post(&env.state, 5, &PostDraft::new("New", "Body"))
        .await
        .unwrap_err();

    //* Then
    assert_eq!(
        err,
        ClientError::api(403, r#"{"detail":"You do not have permission to edit this post."}"#)
    );
    assert!(env.state.session().is_logged_in().await);
}

#[tokio::test]
async fn update_profile_sends_only_changed_fields() {
    //* Given
    let mut env = logged_in_env().await;
    let update = env
        .server
        .mock("PUT", "/api/profile/")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="birth_date""#.to_string()),
            Matcher::Regex("1990-04-02".to_string()),
        ]))
        .with_status(200)
        .with_body(
            json!({"id": 1, "bio": "", "location": "", "birth_date": "1990-04-02", "profile_picture": null})
                .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    //* When
    let profile = commands::update_profile(
        &env.state,
        &ProfileUpdate {
            birth_date: NaiveDate::from_ymd_opt(1990, 4, 2),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    //* Then
    update.assert_async().await;
    assert_eq!(profile.birth_date, NaiveDate::from_ymd_opt(1990, 4, 2));
}

#[tokio::test]
async fn register_reports_taken_username() {
    //* Given
    let mut env = TestEnvironment::new().await;
    let register = env
        .server
        .mock("POST", "/api/register/")
        .match_header("authorization", Matcher::Missing)
        .with_status(400)
        .with_body(r#"{"username":["A user with that username already exists."]}"#)
        .expect(1)
        .create_async()
        .await;

    //* When
    let err = commands::register(
        &env.state,
        &Registration::new("alice", "alice@example.com", "pw"),
    )
    .await
    .unwrap_err();

    //* Then
    register.assert_async().await;
    assert_eq!(
        err,
        ClientError::Validation("A user with that username already exists.".into())
    );
}
