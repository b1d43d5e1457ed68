use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::client::{ApiRequest, AuthenticatedClient};
use crate::api::pagination::{paginate, Page};
use crate::api::types::{Post, PostDraft, Profile, ProfileUpdate, RegisteredUser, Registration};
use crate::auth::token::{Credentials, LoginResponse};
use crate::error::{ClientError, ClientResult};

/// Typed calls for every blog endpoint
#[derive(Clone)]
pub struct BlogApi {
    client: Arc<AuthenticatedClient>,
    media_base: Url,
}

impl BlogApi {
    /// Create a new API facade
    pub fn new(client: Arc<AuthenticatedClient>, media_base: Url) -> Self {
        Self { client, media_base }
    }

    /// The underlying authenticated client
    pub fn client(&self) -> &Arc<AuthenticatedClient> {
        &self.client
    }

    /// Exchange credentials for a token pair.
    ///
    /// A rejected login surfaces as `Api { status: 401 }`; it never triggers a
    /// token refresh.
    pub async fn login(&self, credentials: &Credentials) -> ClientResult<LoginResponse> {
        info!(username = %credentials.username, "Logging in");
        let request = ApiRequest::post("login/")
            .with_json(credentials)?
            .skip_auth_refresh();
        self.client.send_json(request).await
    }

    /// Create an account
    pub async fn register(&self, registration: &Registration) -> ClientResult<RegisteredUser> {
        registration.validate()?;
        info!(username = %registration.username, "Registering account");
        let request = ApiRequest::post("register/")
            .with_form(registration.to_form())
            .skip_auth_refresh();
        self.client.send_json(request).await
    }

    /// All posts, in server order
    pub async fn list_posts(&self) -> ClientResult<Vec<Post>> {
        self.client.get_json("posts/").await
    }

    /// One page of the post listing
    pub async fn list_posts_page(&self, page: usize, per_page: usize) -> ClientResult<Page<Post>> {
        let posts = self.list_posts().await?;
        debug!(total = posts.len(), page, per_page, "Paginating posts");
        Ok(paginate(posts, page, per_page))
    }

    pub async fn get_post(&self, id: u64) -> ClientResult<Post> {
        self.client.get_json(&post_path(id)).await
    }

    pub async fn create_post(&self, draft: &PostDraft) -> ClientResult<Post> {
        draft.validate()?;
        let request = ApiRequest::post("posts/").with_form(draft.to_form());
        self.client.send_json(request).await
    }

    pub async fn update_post(&self, id: u64, draft: &PostDraft) -> ClientResult<Post> {
        draft.validate()?;
        let request = ApiRequest::put(post_path(id)).with_form(draft.to_form());
        self.client.send_json(request).await
    }

    pub async fn delete_post(&self, id: u64) -> ClientResult<()> {
        self.client.delete(&post_path(id)).await?;
        Ok(())
    }

    /// The logged-in user's profile
    pub async fn get_profile(&self) -> ClientResult<Profile> {
        self.client.get_json("profile/").await
    }

    /// Apply a partial profile update and return the stored profile
    pub async fn update_profile(&self, update: &ProfileUpdate) -> ClientResult<Profile> {
        if update.is_empty() {
            return Err(ClientError::validation("nothing to update"));
        }
        let request = ApiRequest::put("profile/").with_form(update.to_form());
        self.client.send_json(request).await
    }

    /// Absolute URL of an uploaded file.
    ///
    /// The API returns media paths like `/media/blog_images/cat.png`; absolute
    /// URLs are passed through.
    pub fn media_url(&self, path: &str) -> ClientResult<Url> {
        self.media_base
            .join(path.trim())
            .map_err(|e| ClientError::validation(format!("invalid media path '{}': {}", path, e)))
    }
}

fn post_path(id: u64) -> String {
    format!("posts/{}/", id)
}
