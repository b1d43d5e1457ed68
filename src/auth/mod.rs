pub mod refresh;
pub mod session;
pub mod storage;
pub mod token;

pub use refresh::{RefreshCoordinator, RefreshSettings, SessionExpiry};
pub use session::SessionContext;
pub use storage::{FileStore, IdentityCache, KeyValueStore, MemoryStore, TokenStore};
pub use token::{AuthEvent, AuthState, Credentials, Identity, LogoutReason, TokenPair};
