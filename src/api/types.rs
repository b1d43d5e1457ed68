use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::adapters::http_client::MultipartForm;
use crate::auth::token::Identity;
use crate::error::{ClientError, ClientResult};

/// A file attached to a multipart request
#[derive(Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    /// Create an upload from memory
    pub fn new(file_name: impl Into<String>, mime: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime,
            bytes: bytes.into(),
        }
    }

    /// Read an upload from disk, guessing the image type from the extension
    pub async fn from_path(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ClientError::validation(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ClientError::validation(format!("{} is not a file", path.display())))?;
        let mime = image_mime(path).map(str::to_string);
        Ok(Self::new(file_name, mime, bytes))
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

fn attach(form: MultipartForm, field: &str, upload: &Upload) -> MultipartForm {
    form.file(
        field,
        upload.file_name.clone(),
        upload.mime.clone(),
        upload.bytes.clone(),
    )
}

/// A blog post as returned by `posts/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Option<String>,
    /// Media-relative image path
    #[serde(default)]
    pub image: Option<String>,
    /// Author's user id
    #[serde(default)]
    pub author: Option<u64>,
    #[serde(default)]
    pub author_username: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Whether `identity` wrote this post
    pub fn is_authored_by(&self, identity: &Identity) -> bool {
        self.author_username.as_deref() == Some(identity.username.as_str())
    }
}

/// Fields submitted when creating or editing a post
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostDraft {
    pub title: String,
    /// Opaque rich-text markup
    pub content: String,
    pub tags: Option<String>,
    pub image: Option<Upload>,
    /// Author id, echoed back on full updates
    pub author: Option<u64>,
}

impl PostDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn with_image(mut self, image: Upload) -> Self {
        self.image = Some(image);
        self
    }

    /// Reject drafts without a title or content
    pub fn validate(&self) -> ClientResult<()> {
        if self.title.trim().is_empty() {
            return Err(ClientError::validation("title is required"));
        }
        if self.content.trim().is_empty() {
            return Err(ClientError::validation("content is required"));
        }
        Ok(())
    }

    /// Multipart body for `posts/`
    pub fn to_form(&self) -> MultipartForm {
        let mut form = MultipartForm::new()
            .text("title", self.title.clone())
            .text("content", self.content.clone());
        if let Some(tags) = &self.tags {
            form = form.text("tags", tags.clone());
        }
        if let Some(author) = self.author {
            form = form.text("author", author.to_string());
        }
        if let Some(image) = &self.image {
            form = attach(form, "image", image);
        }
        form
    }
}

/// The logged-in user's profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    /// Media-relative picture path
    #[serde(default)]
    pub profile_picture: Option<String>,
}

/// Partial profile update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub location: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub profile_picture: Option<Upload>,
}

impl ProfileUpdate {
    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        self.bio.is_none()
            && self.location.is_none()
            && self.birth_date.is_none()
            && self.profile_picture.is_none()
    }

    /// Multipart body for `profile/`
    pub fn to_form(&self) -> MultipartForm {
        let mut form = MultipartForm::new();
        if let Some(bio) = &self.bio {
            form = form.text("bio", bio.clone());
        }
        if let Some(location) = &self.location {
            form = form.text("location", location.clone());
        }
        if let Some(birth_date) = self.birth_date {
            form = form.text("birth_date", birth_date.format("%Y-%m-%d").to_string());
        }
        if let Some(picture) = &self.profile_picture {
            form = attach(form, "profile_picture", picture);
        }
        form
    }
}

/// Account registration form
#[derive(Clone, Default, PartialEq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub bio: String,
    pub location: String,
    pub birth_date: Option<NaiveDate>,
    pub profile_picture: Option<Upload>,
}

impl Registration {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Username, email and password are mandatory
    pub fn validate(&self) -> ClientResult<()> {
        if self.username.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password.is_empty()
        {
            return Err(ClientError::validation(
                "username, email and password are required",
            ));
        }
        Ok(())
    }

    /// Multipart body for `register/`
    pub fn to_form(&self) -> MultipartForm {
        let mut form = MultipartForm::new()
            .text("username", self.username.clone())
            .text("email", self.email.clone())
            .text("password", self.password.clone())
            .text("bio", self.bio.clone())
            .text("location", self.location.clone());
        if let Some(birth_date) = self.birth_date {
            form = form.text("birth_date", birth_date.format("%Y-%m-%d").to_string());
        }
        if let Some(picture) = &self.profile_picture {
            form = attach(form, "profile_picture", picture);
        }
        form
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("bio", &self.bio)
            .field("location", &self.location)
            .field("birth_date", &self.birth_date)
            .field("profile_picture", &self.profile_picture)
            .finish()
    }
}

/// Account returned by `register/`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisteredUser {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}
