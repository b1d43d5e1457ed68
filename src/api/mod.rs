pub mod blog;
pub mod client;
pub mod pagination;
pub mod types;

pub use blog::BlogApi;
pub use client::{ApiRequest, Attempt, AuthenticatedClient};
pub use pagination::{paginate, Page, DEFAULT_PER_PAGE};
pub use types::{Post, PostDraft, Profile, ProfileUpdate, RegisteredUser, Registration, Upload};
