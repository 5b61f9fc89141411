use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo_types::{NewUser, User};
use super::store::{StoreError, UserStore};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    // unique index on email
    emails: HashMap<String, Uuid>,
}

/// Process-local [`UserStore`]. A single write lock makes the email check and
/// the insert one step, which is what the Postgres unique index gives us.
#[derive(Default)]
pub struct MemoryUserStore {
    tables: RwLock<Tables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.tables.read().await.users.len()
    }

    #[cfg(test)]
    pub async fn set_active(&self, id: Uuid, active: bool) {
        if let Some(user) = self.tables.write().await.users.get_mut(&id) {
            user.is_active = active;
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.emails.contains_key(&user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let id = Uuid::new_v4();
        let user = user.into_user(id);
        tables.emails.insert(user.email.clone(), id);
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .emails
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let stored = tables.users.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        stored.first_name = user.first_name.clone();
        stored.surname = user.surname.clone();
        stored.birthday = user.birthday;
        stored.phone = user.phone.clone();
        stored.updated_at = user.updated_at;
        Ok(())
    }

    async fn update_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.last_login = Some(at);
        user.updated_at = at;
        Ok(())
    }
}
