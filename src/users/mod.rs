pub mod repo;
pub mod repo_types;

pub use repo::{SqliteUserStore, StoreError, UniqueField, UserStore};
pub use repo_types::{PublicUser, User};
