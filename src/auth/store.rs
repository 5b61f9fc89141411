use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user not found")]
    NotFound,
    /// Pool exhausted or connection lost; safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(String),
}

/// Durable keyed storage of user records.
///
/// Lookups return `Ok(None)` when nothing matches. Each write is a single atomic
/// operation, so dropping the future never leaves a half-applied change.
/// Implementations must reject a second user with an existing email with
/// [`StoreError::DuplicateEmail`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Writes the profile columns (names, birthday, phone, `updated_at`) of an
    /// existing user. Email, status, role and credential are left as stored.
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;

    /// Sets `last_login` and `updated_at` to `at`.
    async fn update_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError>;
}
